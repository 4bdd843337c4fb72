//! `archive`: record an archive operation for a task.

use anyhow::Result;

use crate::domain::ports::ArchiveSink;
use crate::services::Controller;

pub async fn handle_archive(
    controller: &Controller,
    sink: &dyn ArchiveSink,
    task_id: i64,
    json: bool,
) -> Result<()> {
    let operation_id = controller.archive(sink, task_id).await?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "archive_operation_id": operation_id })
        );
    } else {
        println!("Archive operation {} recorded", operation_id);
    }
    Ok(())
}
