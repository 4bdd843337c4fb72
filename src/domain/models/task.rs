//! Task model and status state machine.
//!
//! A task is one execution of a command group at one row of its variable
//! value matrix. Status flows `pending -> submitted -> running ->
//! (complete | failed)`; the archived tag is orthogonal and applies only
//! after a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created with its submission, not yet handed to the scheduler
    Pending,
    /// Dispatched to the scheduler, not yet started
    Submitted,
    /// The jobscript reported task start
    Running,
    /// Finished with exit status zero
    Complete,
    /// Finished with non-zero exit status, resolution failure, or cancel
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "submitted" => Some(Self::Submitted),
            "running" => Some(Self::Running),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> Vec<TaskStatus> {
        match self {
            Self::Pending => vec![Self::Submitted, Self::Failed],
            Self::Submitted => vec![Self::Running, Self::Failed],
            Self::Running => vec![Self::Complete, Self::Failed],
            Self::Complete | Self::Failed => vec![],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// One task row as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub jobscript_id: i64,
    pub iteration_id: i64,
    /// 0-based index within the command group's task vector
    pub task_index: i64,
    pub status: TaskStatus,
    /// Task id as understood by the scheduler, once submitted
    pub scheduler_task_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_status: Option<i64>,
    pub failure_reason: Option<String>,
    pub archived: bool,
}

impl Task {
    /// Wall-clock duration, once both timestamps exist.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
