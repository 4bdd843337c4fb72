//! Direct-execution bridge: runs jobscripts on the local host.
//!
//! Used when no batch scheduler is available (and in development). Hold
//! dependencies are honoured trivially because the submission controller
//! dispatches in dependency order and this bridge runs each script to
//! completion before returning.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::domain::error::BridgeError;
use crate::domain::ports::{HeaderSpec, SchedulerBridge};

pub struct DirectBridge {
    next_job_id: AtomicI64,
}

impl DirectBridge {
    pub fn new() -> Self {
        Self {
            next_job_id: AtomicI64::new(1),
        }
    }
}

impl Default for DirectBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchedulerBridge for DirectBridge {
    fn render_header(&self, header: &HeaderSpec) -> Vec<String> {
        // No vendor dialect; keep the metadata visible in the script.
        let mut lines = vec![format!("# job: {}", header.name)];
        for (key, value) in &header.options {
            lines.push(format!("# option: {} {}", key, value).trim_end().to_string());
        }
        if let Some((first, last)) = header.array {
            lines.push(format!("# array: {}-{}", first, last));
        }
        lines
    }

    fn task_id_expr(&self) -> &str {
        "${BATCHFLOW_TASK_ID:-1}"
    }

    async fn submit(&self, script: &Path, holds: &[i64]) -> Result<i64, BridgeError> {
        debug!(script = %script.display(), ?holds, "direct dispatch");

        let text = std::fs::read_to_string(script).map_err(|e| BridgeError::DispatchFailed {
            path: script.display().to_string(),
            detail: e.to_string(),
        })?;
        // The array header line is only present for job-array groups; a
        // loop-mode script runs exactly once.
        let num_tasks = text
            .lines()
            .find_map(|line| line.strip_prefix("# array: "))
            .and_then(|raw| raw.split('-').nth(1))
            .and_then(|last| last.trim().parse::<i64>().ok())
            .unwrap_or(1);

        for task_id in 1..=num_tasks {
            let status = Command::new("bash")
                .arg(script)
                .env("BATCHFLOW_TASK_ID", task_id.to_string())
                .status()
                .await
                .map_err(|e| BridgeError::DispatchFailed {
                    path: script.display().to_string(),
                    detail: e.to_string(),
                })?;
            if !status.success() {
                debug!(task_id, code = ?status.code(), "direct task exited non-zero");
            }
        }

        Ok(self.next_job_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn cancel(&self, _job_ids: &[i64]) -> Result<(), BridgeError> {
        // Scripts run synchronously; nothing is left to cancel.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[test]
    fn test_header_rendering() {
        let bridge = DirectBridge::new();
        let header = HeaderSpec {
            name: "bf_0_0".into(),
            options: BTreeMap::from([("l".to_string(), "short".to_string())]),
            modules: vec![],
            array: Some((1, 5)),
            workdir: PathBuf::from("/work"),
        };
        let lines = bridge.render_header(&header);
        assert_eq!(lines[0], "# job: bf_0_0");
        assert!(lines.contains(&"# option: l short".to_string()));
        assert!(lines.contains(&"# array: 1-5".to_string()));
    }

    #[tokio::test]
    async fn test_submit_runs_every_array_task() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("js.sh");
        let marker_dir = dir.path().display().to_string();
        std::fs::write(
            &script,
            format!(
                "#!/bin/bash\n# array: 1-3\ntouch {}/ran_${{BATCHFLOW_TASK_ID}}\n",
                marker_dir
            ),
        )
        .unwrap();

        let bridge = DirectBridge::new();
        let job_id = bridge.submit(&script, &[]).await.unwrap();
        assert_eq!(job_id, 1);
        for task_id in 1..=3 {
            assert!(dir.path().join(format!("ran_{}", task_id)).exists());
        }
    }

    #[tokio::test]
    async fn test_submit_runs_loop_script_once() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("js.sh");
        std::fs::write(
            &script,
            format!(
                "#!/bin/bash\nMAX_NUM_TASKS=5\necho run >> {}/count\n",
                dir.path().display()
            ),
        )
        .unwrap();

        let bridge = DirectBridge::new();
        bridge.submit(&script, &[]).await.unwrap();
        let count = std::fs::read_to_string(dir.path().join("count")).unwrap();
        assert_eq!(count.lines().count(), 1);
    }
}
