//! Embedded schema migrations.
//!
//! Invoked only from the `make` and `submit` paths; every other operation
//! requires the schema to already exist.

use sqlx::SqlitePool;

use crate::domain::error::StoreError;

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

pub fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema",
        sql: include_str!("../../../migrations/001_initial_schema.sql"),
    }]
}

pub struct Migrator<'a> {
    pool: &'a SqlitePool,
}

impl<'a> Migrator<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply all pending migrations; returns how many ran.
    pub async fn run(&self) -> Result<usize, StoreError> {
        self.ensure_migrations_table().await?;
        let current = self.current_version().await?;
        let pending: Vec<Migration> = all_migrations()
            .into_iter()
            .filter(|m| m.version > current)
            .collect();

        for migration in &pending {
            sqlx::raw_sql(migration.sql)
                .execute(self.pool)
                .await
                .map_err(|e| {
                    StoreError::MigrationFailed(format!("version {}: {}", migration.version, e))
                })?;
            sqlx::query(
                "INSERT INTO schema_migrations (version, description) VALUES (?1, ?2)",
            )
            .bind(migration.version)
            .bind(migration.description)
            .execute(self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        }

        Ok(pending.len())
    }

    async fn ensure_migrations_table(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now')),
                description TEXT
            )",
        )
        .execute(self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        Ok(())
    }

    pub async fn current_version(&self) -> Result<i64, StoreError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_test_pool;

    #[tokio::test]
    async fn test_migrations_apply_once() {
        let pool = create_test_pool().await.unwrap();
        let migrator = Migrator::new(&pool);
        assert_eq!(migrator.run().await.unwrap(), 1);
        assert_eq!(migrator.run().await.unwrap(), 0);
        assert_eq!(migrator.current_version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_migrations_create_core_tables() {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(&pool).run().await.unwrap();

        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table'
             AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = rows.iter().map(|(n,)| n.as_str()).collect();

        for table in [
            "archive_operation",
            "command_group",
            "iteration",
            "jobscript",
            "submission",
            "task",
            "variable_definition",
            "variable_value",
            "workflow",
        ] {
            assert!(names.contains(&table), "missing table {}", table);
        }
    }
}
