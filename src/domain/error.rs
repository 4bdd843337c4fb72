//! Error types for the batchflow engine.
//!
//! Each enum covers one failure domain; `is_transient` marks errors that
//! may succeed on retry. Exit-code mapping (2 for declaration errors,
//! 3 for store errors) happens in `main`.

use thiserror::Error;

/// Errors raised while validating a workflow declaration. Fatal at `make`
/// time; no workflow is persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    /// A command or variable template references an undefined variable
    #[error("Undefined variable reference: <<{0}>>")]
    UndefinedVariable(String),

    /// The variable reference graph contains a cycle
    #[error("Cyclic variable references involving: {0}")]
    CyclicVariables(String),

    /// A variable carries base values but its template has no positional
    /// format specifier
    #[error("Variable '{0}' has base values but no positional specifier in its template")]
    MissingPositionalSpecifier(String),

    /// A format specifier could not be parsed or applied
    #[error("Variable '{name}': bad format specifier: {detail}")]
    BadFormatSpecifier { name: String, detail: String },

    /// A base variable was declared with an empty value list
    #[error("Variable '{0}' has an empty value list")]
    EmptyData(String),

    /// A command group declared no commands, or an empty command
    #[error("Command group {0} must declare at least one non-empty command")]
    EmptyCommands(usize),

    /// sub_order values within one exec_order must be contiguous from zero
    #[error("exec_order {exec_order}: sub_order values must be contiguous from 0, got {got:?}")]
    NonContiguousChannels { exec_order: i64, got: Vec<i64> },

    /// exec_order values must start at zero and increase by at most one
    #[error("exec_order values must start at 0 and increase by 0 or 1, got {0:?}")]
    BadExecOrders(Vec<i64>),

    /// More channels at a later exec_order than its parent level (a split),
    /// or a channel reappearing after being absent
    #[error("exec_order {exec_order}: {channels} channels cannot derive from {parents} parents")]
    ChannelSplit {
        exec_order: i64,
        channels: usize,
        parents: usize,
    },

    /// A file-regex pattern failed to compile
    #[error("Variable '{name}': invalid file regex: {detail}")]
    BadFileRegex { name: String, detail: String },

    /// The number of supplied task ranges must equal the channel width
    #[error("Expected {expected} task ranges (one per channel), got {got}")]
    BadRangeCount { expected: usize, got: usize },

    /// A task range fell outside the channel's task vector
    #[error("Task range {start}-{end} out of bounds for channel {channel} with {len} tasks")]
    RangeOutOfBounds {
        channel: usize,
        start: usize,
        end: usize,
        len: usize,
    },

    /// A malformed range expression on the command line
    #[error("Cannot parse task range: {0:?}")]
    BadRangeSyntax(String),
}

/// Errors raised while resolving variable values. Fatal at the moment they
/// surface: submit time for Phase A, runtime for Phase B (the affected
/// task is marked failed).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    /// A file-regex scan matched nothing in a populated directory
    #[error("Variable '{name}' matched no files in {directory}")]
    EmptyScan { name: String, directory: String },

    /// The scan directory does not exist at runtime
    #[error("Variable '{name}': scan directory {directory} does not exist")]
    MissingDirectory { name: String, directory: String },

    /// A captured value could not be cast to the declared kind
    #[error("Variable '{name}': cannot cast {value:?} to {kind}")]
    CastFailed {
        name: String,
        value: String,
        kind: String,
    },

    /// A value of the wrong type reached a typed format specifier
    #[error("Variable '{name}': value {value:?} does not fit specifier {spec:?}")]
    FormatMismatch {
        name: String,
        value: String,
        spec: String,
    },

    /// A variable required at runtime is still unresolved
    #[error("Variable '{0}' is unresolved")]
    Unresolved(String),
}

/// Errors from the workflow store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The schema has not been created; only `make` and `submit` may
    /// initialize it
    #[error("Workflow store not initialized in this directory (run `make` or `submit` first)")]
    SchemaMissing,

    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// The database was locked by a concurrent writer
    #[error("Store locked: {0}")]
    Locked(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Workflow {0} not found")]
    WorkflowNotFound(i64),

    #[error("Submission {0} not found")]
    SubmissionNotFound(i64),

    #[error("Jobscript {0} not found")]
    JobscriptNotFound(i64),

    #[error("Task not found: jobscript {jobscript_id}, index {task_index}")]
    TaskNotFound { jobscript_id: i64, task_index: i64 },

    /// An archive is already running for this task
    #[error("Task {0} already has an active archive operation")]
    ArchiveActive(i64),
}

impl StoreError {
    /// True if a retry with backoff may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Locked(_) | Self::ConnectionFailed(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let msg = db.message().to_string();
                if msg.contains("locked") || msg.contains("busy") {
                    StoreError::Locked(msg)
                } else if msg.contains("UNIQUE") || msg.contains("FOREIGN KEY") {
                    StoreError::ConstraintViolation(msg)
                } else {
                    StoreError::QueryFailed(msg)
                }
            }
            sqlx::Error::RowNotFound => StoreError::QueryFailed("row not found".into()),
            sqlx::Error::PoolTimedOut => StoreError::Locked("pool acquire timed out".into()),
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

/// Errors from the scheduler bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to dispatch jobscript {path}: {detail}")]
    DispatchFailed { path: String, detail: String },

    #[error("Could not parse a job id from scheduler output: {0:?}")]
    BadJobId(String),

    #[error("Cancellation failed: {0}")]
    CancelFailed(String),
}
