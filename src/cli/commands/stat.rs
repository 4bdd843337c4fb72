//! `stat` and `show-stats`: read-only reporting from the store.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::adapters::sqlite::TaskStatRow;
use crate::services::Controller;

/// Per-workflow status summary.
pub async fn handle_stat(
    controller: &Controller,
    workflow_id: Option<i64>,
    json: bool,
) -> Result<()> {
    let rows = controller.stats(workflow_id).await?;

    // workflow id -> status -> count
    let mut summary: BTreeMap<i64, BTreeMap<&'static str, usize>> = BTreeMap::new();
    for row in &rows {
        *summary
            .entry(row.workflow_id)
            .or_default()
            .entry(row.task.status.as_str())
            .or_default() += 1;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if summary.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }
    for (workflow, counts) in &summary {
        let total: usize = counts.values().sum();
        let detail: Vec<String> = counts
            .iter()
            .map(|(status, count)| format!("{} {}", count, status))
            .collect();
        println!(
            "Workflow {}: {} task(s) ({})",
            workflow,
            total,
            detail.join(", ")
        );
    }
    Ok(())
}

/// Full per-task listing.
pub async fn handle_show_stats(
    controller: &Controller,
    workflow_id: Option<i64>,
    json: bool,
) -> Result<()> {
    let rows = controller.stats(workflow_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    println!(
        "{:>4} {:>6} {:>4} {:>5} {:>4} {:<9} {:>20} {:>12} {:>5}",
        "wf", "sub", "it", "group", "task", "status", "start", "duration", "exit"
    );
    for row in &rows {
        println!("{}", format_row(row));
    }
    Ok(())
}

fn format_row(row: &TaskStatRow) -> String {
    let start = row
        .task
        .started_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".into());
    let duration = row
        .task
        .duration()
        .map(format_duration)
        .unwrap_or_else(|| "-".into());
    let exit = row
        .task
        .exit_status
        .map(|code| code.to_string())
        .unwrap_or_else(|| "-".into());
    format!(
        "{:>4} {:>6} {:>4} {:>5} {:>4} {:<9} {:>20} {:>12} {:>5}",
        row.workflow_id,
        row.submission_id,
        row.iteration,
        row.group_index,
        row.task.task_index,
        row.task.status.as_str(),
        start,
        duration,
        exit
    )
}

fn format_duration(duration: chrono::Duration) -> String {
    let seconds = duration.num_seconds();
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
