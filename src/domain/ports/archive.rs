//! Archive sink port.
//!
//! Archiving a task's working directory is a boundary concern; failures
//! here are recorded on the archive operation row and never propagate
//! into task state.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive copy failed: {0}")]
    CopyFailed(String),

    #[error("Archive destination unavailable: {0}")]
    DestinationUnavailable(String),
}

/// Copies a working directory to an external location.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    /// Human-readable destination label recorded with the operation.
    fn destination(&self) -> &str;

    async fn archive(&self, source: &Path, excludes: &[String]) -> Result<(), ArchiveError>;
}

/// The default sink: records the operation but moves no bytes.
#[derive(Debug, Clone, Default)]
pub struct NullArchive;

#[async_trait]
impl ArchiveSink for NullArchive {
    fn destination(&self) -> &str {
        "null"
    }

    async fn archive(&self, _source: &Path, _excludes: &[String]) -> Result<(), ArchiveError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_archive_always_succeeds() {
        let sink = NullArchive;
        assert_eq!(sink.destination(), "null");
        assert!(sink.archive(Path::new("/nowhere"), &[]).await.is_ok());
    }
}
