//! Submission-side models: task ranges, jobscripts, submissions,
//! iterations and archive operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::DeclarationError;

/// A selection of tasks within one channel: 0-based start, inclusive end
/// (None = to the channel's last task) and step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRange {
    pub start: usize,
    pub end: Option<usize>,
    pub step: usize,
}

impl TaskRange {
    /// The whole channel.
    pub fn all() -> Self {
        Self {
            start: 0,
            end: None,
            step: 1,
        }
    }

    /// Parse a range expression: `all`, `N`, `N-M` or `N-M:S`.
    pub fn parse(raw: &str) -> Result<Self, DeclarationError> {
        let bad = || DeclarationError::BadRangeSyntax(raw.to_string());
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(bad());
        }
        if raw == "all" {
            return Ok(Self::all());
        }

        let (span, step) = match raw.split_once(':') {
            Some((span, step)) => (span, step.parse::<usize>().map_err(|_| bad())?),
            None => (raw, 1),
        };
        if step == 0 {
            return Err(bad());
        }

        match span.split_once('-') {
            Some((start, end)) => {
                let start = start.parse().map_err(|_| bad())?;
                let end: usize = end.parse().map_err(|_| bad())?;
                if end < start {
                    return Err(bad());
                }
                Ok(Self {
                    start,
                    end: Some(end),
                    step,
                })
            }
            None => {
                let only: usize = span.parse().map_err(|_| bad())?;
                Ok(Self {
                    start: only,
                    end: Some(only),
                    step,
                })
            }
        }
    }

    /// Concrete task indices within a channel of `len` tasks.
    pub fn indices(&self, channel: usize, len: usize) -> Result<Vec<usize>, DeclarationError> {
        let end = self.end.unwrap_or(len.saturating_sub(1));
        if len == 0 || self.start >= len || end >= len {
            return Err(DeclarationError::RangeOutOfBounds {
                channel,
                start: self.start,
                end,
                len,
            });
        }
        Ok((self.start..=end).step_by(self.step).collect())
    }
}

/// One emitted jobscript: the unit the scheduler executes for a command
/// group within a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobscriptRecord {
    pub id: i64,
    pub submission_id: i64,
    pub command_group_id: i64,
    /// Derived channel identity
    pub channel: i64,
    pub num_tasks: i64,
    /// Jobscript ids whose completion gates this one
    pub depends_on: Vec<i64>,
    /// Path of the emitted script, relative to the workflow directory
    pub path: String,
    /// Handle returned by the scheduler bridge once dispatched
    pub scheduler_job_id: Option<i64>,
}

impl JobscriptRecord {
    pub fn is_dispatched(&self) -> bool {
        self.scheduler_job_id.is_some()
    }
}

/// One act of pushing (part of) a workflow to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub workflow_id: i64,
    pub iteration_id: i64,
    pub submitted_at: DateTime<Utc>,
    /// One range per channel at the first exec_order
    pub task_ranges: Vec<TaskRange>,
}

/// A re-run wrapper: iterations share the workflow skeleton but own
/// independent task rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    pub id: i64,
    pub workflow_id: i64,
    pub ordinal: i64,
    pub created_at: DateTime<Utc>,
}

/// Archive bookkeeping for one task; an operation with no end time acts
/// as the per-task archive lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveOperation {
    pub id: i64,
    pub task_id: i64,
    pub destination: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all() {
        assert_eq!(TaskRange::parse("all").unwrap(), TaskRange::all());
    }

    #[test]
    fn test_parse_span_and_step() {
        assert_eq!(
            TaskRange::parse("0-4").unwrap(),
            TaskRange {
                start: 0,
                end: Some(4),
                step: 1
            }
        );
        assert_eq!(
            TaskRange::parse("2-8:2").unwrap(),
            TaskRange {
                start: 2,
                end: Some(8),
                step: 2
            }
        );
        assert_eq!(
            TaskRange::parse("3").unwrap(),
            TaskRange {
                start: 3,
                end: Some(3),
                step: 1
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for raw in ["", "a-b", "4-2", "1-3:0", "-1"] {
            assert!(TaskRange::parse(raw).is_err(), "accepted {:?}", raw);
        }
    }

    #[test]
    fn test_indices_inclusive() {
        let range = TaskRange::parse("0-2").unwrap();
        assert_eq!(range.indices(0, 5).unwrap(), vec![0, 1, 2]);

        let range = TaskRange::parse("0-4:2").unwrap();
        assert_eq!(range.indices(0, 5).unwrap(), vec![0, 2, 4]);
    }

    #[test]
    fn test_indices_all() {
        assert_eq!(TaskRange::all().indices(0, 3).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_indices_out_of_bounds() {
        let range = TaskRange::parse("0-5").unwrap();
        assert!(matches!(
            range.indices(1, 5).unwrap_err(),
            DeclarationError::RangeOutOfBounds { channel: 1, .. }
        ));
    }

    #[test]
    fn test_jobscript_dispatch_state() {
        let mut js = JobscriptRecord {
            id: 1,
            submission_id: 1,
            command_group_id: 1,
            channel: 0,
            num_tasks: 5,
            depends_on: vec![],
            path: "js_0_0.sh".into(),
            scheduler_job_id: None,
        };
        assert!(!js.is_dispatched());
        js.scheduler_job_id = Some(991);
        assert!(js.is_dispatched());
    }
}
