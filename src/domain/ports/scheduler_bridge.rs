//! Scheduler bridge port.
//!
//! The core emits abstract jobscript descriptions; a bridge renders the
//! vendor header dialect, submits scripts with hold dependencies, and
//! cancels jobs. The core never speaks a scheduler dialect itself.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::error::BridgeError;

/// Scheduler-facing header metadata for one jobscript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSpec {
    /// Job name shown to the scheduler
    pub name: String,
    /// Opaque scheduler options from the command group
    pub options: BTreeMap<String, String>,
    /// Environment modules to load
    pub modules: Vec<String>,
    /// 1-based inclusive array range, when the group runs as a job array
    pub array: Option<(usize, usize)>,
    /// Directory the script must run from
    pub workdir: PathBuf,
}

/// Translates abstract jobscripts into a concrete scheduler's terms.
#[async_trait]
pub trait SchedulerBridge: Send + Sync {
    /// Render the vendor-specific header lines for a jobscript.
    fn render_header(&self, header: &HeaderSpec) -> Vec<String>;

    /// Shell expression yielding the 1-based array task id at runtime.
    fn task_id_expr(&self) -> &str;

    /// Submit a script, held on the given scheduler job ids; returns the
    /// new scheduler job id.
    async fn submit(&self, script: &Path, holds: &[i64]) -> Result<i64, BridgeError>;

    /// Best-effort cancellation of scheduler jobs.
    async fn cancel(&self, job_ids: &[i64]) -> Result<(), BridgeError>;
}
