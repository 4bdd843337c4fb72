//! Boundary interfaces the core depends on.

pub mod archive;
pub mod scheduler_bridge;

pub use archive::{ArchiveError, ArchiveSink, NullArchive};
pub use scheduler_bridge::{HeaderSpec, SchedulerBridge};
