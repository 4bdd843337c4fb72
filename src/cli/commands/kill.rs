//! `kill`: cancel scheduler jobs and fail non-terminal tasks.

use anyhow::Result;

use crate::domain::ports::SchedulerBridge;
use crate::services::Controller;

pub async fn handle_kill(
    controller: &Controller,
    bridge: &dyn SchedulerBridge,
    workflow_id: Option<i64>,
    submission_id: Option<i64>,
    json: bool,
) -> Result<()> {
    let swept = controller.kill(bridge, workflow_id, submission_id).await?;
    if json {
        println!("{}", serde_json::json!({ "tasks_failed": swept }));
    } else {
        println!("Cancelled; {} task(s) marked failed", swept);
    }
    Ok(())
}
