//! SQLite connection pool management for the workflow store.
//!
//! The store lives on the shared filesystem next to the working directory.
//! WAL journaling plus a generous busy timeout lets hundreds of array-task
//! workers write start/end events without serialization failures; readers
//! stay non-blocking.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;

use crate::domain::error::StoreError;
use crate::domain::models::config::DatabaseConfig;

/// Open the store at `db_path`.
///
/// Only `make` and `submit` may create the store (`create = true`); every
/// other operation fails fast with `SchemaMissing` when it is absent.
pub async fn create_pool(
    db_path: &Path,
    config: &DatabaseConfig,
    create: bool,
) -> Result<SqlitePool, StoreError> {
    if !create && !db_path.exists() {
        return Err(StoreError::SchemaMissing);
    }

    if create {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
            }
        }
    }

    let connect_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(connect_options)
        .await
        .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

    Ok(pool)
}

/// In-memory pool for tests. A single connection keeps the database alive
/// for the pool's lifetime.
pub async fn create_test_pool() -> Result<SqlitePool, StoreError> {
    let connect_options = SqliteConnectOptions::new()
        .filename(":memory:")
        .journal_mode(SqliteJournalMode::Memory)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options)
        .await
        .map_err(|e| StoreError::ConnectionFailed(e.to_string()))
}

/// True once the schema's root table exists.
pub async fn schema_present(pool: &SqlitePool) -> Result<bool, StoreError> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'workflow'",
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}
