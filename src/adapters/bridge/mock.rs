//! Recording bridge for tests: captures dispatch order and hold chains
//! without executing anything, and can fail on demand to exercise
//! partial-dispatch recovery.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::error::BridgeError;
use crate::domain::ports::{HeaderSpec, SchedulerBridge};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSubmit {
    pub script: PathBuf,
    pub holds: Vec<i64>,
    pub job_id: i64,
}

#[derive(Default)]
pub struct RecordingBridge {
    next_job_id: AtomicI64,
    /// Submissions accepted so far
    pub submits: Mutex<Vec<RecordedSubmit>>,
    /// Cancelled scheduler job ids
    pub cancels: Mutex<Vec<i64>>,
    /// Fail the Nth submit (0-based) once, then succeed
    fail_at: Mutex<Option<usize>>,
    calls: AtomicUsize,
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self {
            next_job_id: AtomicI64::new(100),
            ..Default::default()
        }
    }

    pub fn fail_at(self, call: usize) -> Self {
        *self.fail_at.lock().unwrap() = Some(call);
        self
    }

    pub fn submitted_scripts(&self) -> Vec<PathBuf> {
        self.submits
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.script.clone())
            .collect()
    }
}

#[async_trait]
impl SchedulerBridge for RecordingBridge {
    fn render_header(&self, header: &HeaderSpec) -> Vec<String> {
        let mut lines = vec![format!("# job: {}", header.name)];
        if let Some((first, last)) = header.array {
            lines.push(format!("# array: {}-{}", first, last));
        }
        lines
    }

    fn task_id_expr(&self) -> &str {
        "${BATCHFLOW_TASK_ID:-1}"
    }

    async fn submit(&self, script: &Path, holds: &[i64]) -> Result<i64, BridgeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut fail_at = self.fail_at.lock().unwrap();
        if *fail_at == Some(call) {
            *fail_at = None;
            return Err(BridgeError::DispatchFailed {
                path: script.display().to_string(),
                detail: "injected failure".into(),
            });
        }
        drop(fail_at);

        let job_id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        self.submits.lock().unwrap().push(RecordedSubmit {
            script: script.to_path_buf(),
            holds: holds.to_vec(),
            job_id,
        });
        Ok(job_id)
    }

    async fn cancel(&self, job_ids: &[i64]) -> Result<(), BridgeError> {
        self.cancels.lock().unwrap().extend_from_slice(job_ids);
        Ok(())
    }
}
