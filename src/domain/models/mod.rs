//! Domain models.

pub mod command_group;
pub mod config;
pub mod submission;
pub mod task;
pub mod variable;
pub mod workflow;

pub use command_group::CommandGroup;
pub use config::Config;
pub use submission::{ArchiveOperation, Iteration, JobscriptRecord, Submission, TaskRange};
pub use task::{Task, TaskStatus};
pub use variable::{BaseValues, FileRegex, ValueKind, VarDefinition, VarSource};
pub use workflow::{CommandGroupSpec, GroupOverrides, VariableSpec, Workflow, WorkflowSpec};
