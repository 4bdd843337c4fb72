//! SQLite-backed workflow store.

pub mod connection;
pub mod migrations;
pub mod retry;
pub mod submission_repository;
pub mod task_repository;
pub mod workflow_repository;

pub use connection::{create_pool, create_test_pool, schema_present};
pub use migrations::Migrator;
pub use retry::RetryPolicy;
pub use submission_repository::{JobscriptContext, NewJobscript, SubmissionRepository};
pub use task_repository::{TaskRepository, TaskStatRow};
pub use workflow_repository::WorkflowRepository;
