//! batchflow: a workflow-submission engine for HPC clusters.
//!
//! A declarative document of command groups and variables expands into a
//! persisted workflow of concrete tasks. Submission emits jobscripts with
//! scheduler hold chains enforcing inter-group order; at runtime each
//! jobscript resolves its variables and writes the concrete command file
//! it executes.
//!
//! # Architecture
//!
//! - [`domain`]: models (workflow, command group, variable, task,
//!   submission), the template machinery, ports and the error taxonomy
//! - [`services`]: the two-phase variable resolver, channel scheduler,
//!   jobscript emitter and submission controller
//! - [`adapters`]: the SQLite workflow store and the scheduler bridges
//! - [`infrastructure`]: configuration loading and logging
//! - [`cli`]: the command-line surface

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::models::{Task, TaskStatus, Workflow, WorkflowSpec};
pub use services::{Controller, SubmitTarget};
