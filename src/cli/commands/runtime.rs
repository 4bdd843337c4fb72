//! Runtime hooks invoked from jobscripts: `write-cmd`, `set-task-start`
//! and `set-task-end`.

use anyhow::Result;

use crate::services::Controller;

pub async fn handle_write_cmd(
    controller: &Controller,
    jobscript_id: i64,
    task_index: i64,
    json: bool,
) -> Result<()> {
    let path = controller.write_cmd(jobscript_id, task_index).await?;
    if json {
        println!("{}", serde_json::json!({ "command_file": path }));
    } else {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

pub async fn handle_set_task_start(
    controller: &Controller,
    jobscript_id: i64,
    task_index: i64,
) -> Result<()> {
    controller.set_task_start(jobscript_id, task_index).await
}

pub async fn handle_set_task_end(
    controller: &Controller,
    jobscript_id: i64,
    task_index: i64,
    exit_status: i64,
) -> Result<()> {
    controller
        .set_task_end(jobscript_id, task_index, exit_status)
        .await
}
