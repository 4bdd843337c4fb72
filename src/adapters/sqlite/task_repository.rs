//! Task state persistence.
//!
//! Start/end writes arrive concurrently from array workers on many nodes;
//! every mutation here is a single short statement (or a two-statement
//! transaction) retried with backoff on lock contention. Timestamps are
//! COALESCE-guarded so a retried hook never overwrites the first event.

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::domain::error::StoreError;
use crate::domain::models::{ArchiveOperation, Task, TaskStatus};

use super::retry::RetryPolicy;
use super::workflow_repository::parse_timestamp;

pub struct TaskRepository {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl TaskRepository {
    pub fn new(pool: SqlitePool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }

    /// Record a task start. Idempotent: a second call keeps the first
    /// timestamp and the status stays `running`.
    pub async fn set_task_start(
        &self,
        jobscript_id: i64,
        task_index: i64,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let pool = self.pool.clone();
        let affected = self
            .retry
            .execute(|| {
                let pool = pool.clone();
                let now = now.clone();
                async move {
                    let result = sqlx::query(
                        "UPDATE task SET
                             started_at = COALESCE(started_at, ?1),
                             status = CASE WHEN status IN ('pending', 'submitted')
                                           THEN 'running' ELSE status END
                         WHERE jobscript_id = ?2 AND task_index = ?3",
                    )
                    .bind(&now)
                    .bind(jobscript_id)
                    .bind(task_index)
                    .execute(&pool)
                    .await?;
                    Ok(result.rows_affected())
                }
            })
            .await?;

        if affected == 0 {
            return Err(StoreError::TaskNotFound {
                jobscript_id,
                task_index,
            });
        }
        Ok(())
    }

    /// Record a task end with its exit status. Idempotent on retries; a
    /// task already terminal keeps its first outcome.
    pub async fn set_task_end(
        &self,
        jobscript_id: i64,
        task_index: i64,
        exit_status: i64,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let status = if exit_status == 0 { "complete" } else { "failed" };
        let pool = self.pool.clone();
        let affected = self
            .retry
            .execute(|| {
                let pool = pool.clone();
                let now = now.clone();
                async move {
                    let result = sqlx::query(
                        "UPDATE task SET
                             ended_at = COALESCE(ended_at, ?1),
                             exit_status = COALESCE(exit_status, ?2),
                             status = CASE WHEN status IN ('complete', 'failed')
                                           THEN status ELSE ?3 END
                         WHERE jobscript_id = ?4 AND task_index = ?5",
                    )
                    .bind(&now)
                    .bind(exit_status)
                    .bind(status)
                    .bind(jobscript_id)
                    .bind(task_index)
                    .execute(&pool)
                    .await?;
                    Ok(result.rows_affected())
                }
            })
            .await?;

        if affected == 0 {
            return Err(StoreError::TaskNotFound {
                jobscript_id,
                task_index,
            });
        }
        Ok(())
    }

    /// Fail a task outside the normal exit path (resolution error,
    /// cancellation of a running task). Sibling tasks are untouched.
    pub async fn mark_failed(
        &self,
        jobscript_id: i64,
        task_index: i64,
        reason: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let pool = self.pool.clone();
        self.retry
            .execute(|| {
                let pool = pool.clone();
                let now = now.clone();
                let reason = reason.to_string();
                async move {
                    sqlx::query(
                        "UPDATE task SET
                             status = 'failed',
                             ended_at = COALESCE(ended_at, ?1),
                             failure_reason = COALESCE(failure_reason, ?2)
                         WHERE jobscript_id = ?3 AND task_index = ?4
                           AND status NOT IN ('complete', 'failed')",
                    )
                    .bind(&now)
                    .bind(&reason)
                    .bind(jobscript_id)
                    .bind(task_index)
                    .execute(&pool)
                    .await?;
                    Ok(())
                }
            })
            .await
    }

    /// Cancellation sweep for a workflow: running tasks fail with an end
    /// timestamp, pending and submitted tasks fail with the cancellation
    /// reason and no timestamps, terminal tasks are untouched.
    pub async fn kill_sweep(&self, workflow_id: i64, reason: &str) -> Result<u64, StoreError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let running = sqlx::query(
            "UPDATE task SET status = 'failed', ended_at = COALESCE(ended_at, ?1),
                             failure_reason = COALESCE(failure_reason, ?2)
             WHERE status = 'running' AND jobscript_id IN (
                 SELECT j.id FROM jobscript j
                 JOIN submission s ON s.id = j.submission_id
                 WHERE s.workflow_id = ?3)",
        )
        .bind(&now)
        .bind(reason)
        .bind(workflow_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let waiting = sqlx::query(
            "UPDATE task SET status = 'failed', failure_reason = COALESCE(failure_reason, ?1)
             WHERE status IN ('pending', 'submitted') AND jobscript_id IN (
                 SELECT j.id FROM jobscript j
                 JOIN submission s ON s.id = j.submission_id
                 WHERE s.workflow_id = ?2)",
        )
        .bind(reason)
        .bind(workflow_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(running + waiting)
    }

    pub async fn tasks_for_jobscript(&self, jobscript_id: i64) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, jobscript_id, iteration_id, task_index, status, scheduler_task_id,
                    started_at, ended_at, exit_status, failure_reason, archived
             FROM task WHERE jobscript_id = ?1 ORDER BY task_index",
        )
        .bind(jobscript_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_task).collect()
    }

    pub async fn get(&self, task_id: i64) -> Result<Task, StoreError> {
        let row = sqlx::query(
            "SELECT id, jobscript_id, iteration_id, task_index, status, scheduler_task_id,
                    started_at, ended_at, exit_status, failure_reason, archived
             FROM task WHERE id = ?1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::TaskNotFound {
            jobscript_id: 0,
            task_index: task_id,
        })?;
        row_to_task(row)
    }

    /// Begin an archive operation; the partial unique index enforces at
    /// most one active archive per task.
    pub async fn start_archive(
        &self,
        task_id: i64,
        destination: &str,
    ) -> Result<ArchiveOperation, StoreError> {
        let started_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO archive_operation (task_id, destination, started_at)
             VALUES (?1, ?2, ?3)",
        )
        .bind(task_id)
        .bind(destination)
        .bind(started_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        let id = match result {
            Ok(done) => done.last_insert_rowid(),
            Err(err) => {
                let store_err = StoreError::from(err);
                if matches!(store_err, StoreError::ConstraintViolation(_)) {
                    return Err(StoreError::ArchiveActive(task_id));
                }
                return Err(store_err);
            }
        };

        Ok(ArchiveOperation {
            id,
            task_id,
            destination: destination.to_string(),
            started_at,
            ended_at: None,
        })
    }

    /// Close an archive operation and tag the task archived.
    pub async fn end_archive(&self, operation_id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE archive_operation SET ended_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(operation_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE task SET archived = 1 WHERE id =
                 (SELECT task_id FROM archive_operation WHERE id = ?1)",
        )
        .bind(operation_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Flat statistics rows for reporting, newest workflow first.
    pub async fn stats(&self, workflow_id: Option<i64>) -> Result<Vec<TaskStatRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT s.workflow_id, s.id AS submission_id, i.ordinal AS iteration,
                    g.group_index, g.commands,
                    t.id, t.jobscript_id, t.iteration_id, t.task_index, t.status,
                    t.scheduler_task_id, t.started_at, t.ended_at, t.exit_status,
                    t.failure_reason, t.archived
             FROM task t
             JOIN jobscript j ON j.id = t.jobscript_id
             JOIN submission s ON s.id = j.submission_id
             JOIN iteration i ON i.id = t.iteration_id
             JOIN command_group g ON g.id = j.command_group_id
             WHERE (?1 IS NULL OR s.workflow_id = ?1)
             ORDER BY s.workflow_id, s.id, j.id, t.task_index",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let commands: String = row.get("commands");
                Ok(TaskStatRow {
                    workflow_id: row.get("workflow_id"),
                    submission_id: row.get("submission_id"),
                    iteration: row.get("iteration"),
                    group_index: row.get::<i64, _>("group_index") as usize,
                    commands: serde_json::from_str(&commands)
                        .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
                    task: row_to_task(row)?,
                })
            })
            .collect()
    }
}

/// One task with its reporting context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskStatRow {
    pub workflow_id: i64,
    pub submission_id: i64,
    pub iteration: i64,
    pub group_index: usize,
    pub commands: Vec<String>,
    pub task: Task,
}

fn row_to_task(row: sqlx::sqlite::SqliteRow) -> Result<Task, StoreError> {
    let status: String = row.get("status");
    Ok(Task {
        id: row.get("id"),
        jobscript_id: row.get("jobscript_id"),
        iteration_id: row.get("iteration_id"),
        task_index: row.get("task_index"),
        status: TaskStatus::from_str(&status)
            .ok_or_else(|| StoreError::QueryFailed(format!("unknown status {:?}", status)))?,
        scheduler_task_id: row.get("scheduler_task_id"),
        started_at: row
            .get::<Option<String>, _>("started_at")
            .map(parse_timestamp)
            .transpose()?,
        ended_at: row
            .get::<Option<String>, _>("ended_at")
            .map(parse_timestamp)
            .transpose()?,
        exit_status: row.get("exit_status"),
        failure_reason: row.get("failure_reason"),
        archived: row.get::<i64, _>("archived") != 0,
    })
}
