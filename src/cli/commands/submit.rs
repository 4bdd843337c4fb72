//! `submit`: make if needed, then dispatch with hold chains.

use std::path::PathBuf;

use anyhow::Result;

use crate::domain::models::{GroupOverrides, TaskRange};
use crate::domain::ports::SchedulerBridge;
use crate::services::{Controller, SubmitTarget};

use super::make::load_spec;

pub async fn handle_submit(
    controller: &Controller,
    bridge: &dyn SchedulerBridge,
    workflow: Option<i64>,
    spec: Option<PathBuf>,
    tasks: Option<String>,
    iterate: bool,
    json: bool,
) -> Result<()> {
    let target = match workflow {
        Some(id) => SubmitTarget::WorkflowId(id),
        None => {
            let path = spec.unwrap_or_else(|| controller.workdir().join("workflow.yml"));
            SubmitTarget::Spec(Box::new(load_spec(&path)?), GroupOverrides::default())
        }
    };

    let ranges = tasks.as_deref().map(parse_ranges).transpose()?;
    let submission_id = controller
        .submit_workflow(bridge, target, ranges, iterate)
        .await?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "submission_id": submission_id })
        );
    } else {
        println!("Submission {} dispatched", submission_id);
    }
    Ok(())
}

/// Parse the `-t` argument: one range per channel, comma-separated.
pub fn parse_ranges(raw: &str) -> Result<Vec<TaskRange>> {
    raw.split(',')
        .map(|part| TaskRange::parse(part).map_err(Into::into))
        .collect()
}
