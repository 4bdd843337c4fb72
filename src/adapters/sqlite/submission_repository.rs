//! Persistence for submissions, jobscripts and their dependency chains.

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::domain::error::StoreError;
use crate::domain::models::{JobscriptRecord, Submission, TaskRange};

use super::workflow_repository::parse_timestamp;

/// A jobscript to persist with a new submission. `depends_on_positions`
/// points at earlier entries of the same submission batch; the repository
/// resolves them to row ids at insert time.
#[derive(Debug, Clone)]
pub struct NewJobscript {
    pub command_group_id: i64,
    pub channel: i64,
    pub path: String,
    pub task_indices: Vec<i64>,
    pub depends_on_positions: Vec<usize>,
}

/// A jobscript together with the identifiers the runtime needs.
#[derive(Debug, Clone)]
pub struct JobscriptContext {
    pub jobscript: JobscriptRecord,
    pub workflow_id: i64,
    pub iteration_id: i64,
    pub group_index: usize,
}

pub struct SubmissionRepository {
    pool: SqlitePool,
}

impl SubmissionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a submission with its jobscripts and pending task rows in
    /// one transaction. Returns the submission id and jobscript ids in
    /// batch order.
    pub async fn insert(
        &self,
        workflow_id: i64,
        iteration_id: i64,
        ranges: &[TaskRange],
        jobscripts: &[NewJobscript],
    ) -> Result<(i64, Vec<i64>), StoreError> {
        let ranges_json = serde_json::to_string(ranges)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let mut tx = self.pool.begin().await?;
        let submission_id = sqlx::query(
            "INSERT INTO submission (workflow_id, iteration_id, submitted_at, task_ranges)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(workflow_id)
        .bind(iteration_id)
        .bind(Utc::now().to_rfc3339())
        .bind(&ranges_json)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let mut ids: Vec<i64> = Vec::with_capacity(jobscripts.len());
        for js in jobscripts {
            let depends_on: Vec<i64> = js
                .depends_on_positions
                .iter()
                .map(|&pos| ids[pos])
                .collect();
            let depends_json = serde_json::to_string(&depends_on)
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

            let js_id = sqlx::query(
                "INSERT INTO jobscript
                 (submission_id, command_group_id, channel, num_tasks, depends_on, path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(submission_id)
            .bind(js.command_group_id)
            .bind(js.channel)
            .bind(js.task_indices.len() as i64)
            .bind(&depends_json)
            .bind(&js.path)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            for &task_index in &js.task_indices {
                sqlx::query(
                    "INSERT INTO task (jobscript_id, iteration_id, task_index, status)
                     VALUES (?1, ?2, ?3, 'pending')",
                )
                .bind(js_id)
                .bind(iteration_id)
                .bind(task_index)
                .execute(&mut *tx)
                .await?;
            }

            ids.push(js_id);
        }

        tx.commit().await?;
        Ok((submission_id, ids))
    }

    /// The latest submission with identical task ranges that still has
    /// undispatched jobscripts; a repeated `submit` resumes it instead of
    /// duplicating work.
    pub async fn find_resumable(
        &self,
        workflow_id: i64,
        ranges: &[TaskRange],
    ) -> Result<Option<Submission>, StoreError> {
        let ranges_json = serde_json::to_string(ranges)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let row = sqlx::query(
            "SELECT s.id, s.iteration_id, s.submitted_at, s.task_ranges
             FROM submission s
             WHERE s.workflow_id = ?1 AND s.task_ranges = ?2
               AND EXISTS (SELECT 1 FROM jobscript j
                           WHERE j.submission_id = s.id AND j.scheduler_job_id IS NULL)
             ORDER BY s.id DESC LIMIT 1",
        )
        .bind(workflow_id)
        .bind(&ranges_json)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| self.row_to_submission(workflow_id, row))
            .transpose()
    }

    pub async fn get(&self, submission_id: i64) -> Result<Submission, StoreError> {
        let row = sqlx::query(
            "SELECT id, workflow_id, iteration_id, submitted_at, task_ranges
             FROM submission WHERE id = ?1",
        )
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::SubmissionNotFound(submission_id))?;
        let workflow_id: i64 = row.get("workflow_id");
        self.row_to_submission(workflow_id, row)
    }

    fn row_to_submission(
        &self,
        workflow_id: i64,
        row: sqlx::sqlite::SqliteRow,
    ) -> Result<Submission, StoreError> {
        let ranges: String = row.get("task_ranges");
        Ok(Submission {
            id: row.get("id"),
            workflow_id,
            iteration_id: row.get("iteration_id"),
            submitted_at: parse_timestamp(row.get("submitted_at"))?,
            task_ranges: serde_json::from_str(&ranges)
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
        })
    }

    /// Jobscripts of a submission in insert (dispatch) order.
    pub async fn jobscripts(
        &self,
        submission_id: i64,
    ) -> Result<Vec<JobscriptRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, submission_id, command_group_id, channel, num_tasks,
                    depends_on, path, scheduler_job_id
             FROM jobscript WHERE submission_id = ?1 ORDER BY id",
        )
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_jobscript).collect()
    }

    /// A jobscript with the workflow, iteration and group identifiers the
    /// runtime operations need.
    pub async fn jobscript_context(
        &self,
        jobscript_id: i64,
    ) -> Result<JobscriptContext, StoreError> {
        let row = sqlx::query(
            "SELECT j.id, j.submission_id, j.command_group_id, j.channel, j.num_tasks,
                    j.depends_on, j.path, j.scheduler_job_id,
                    s.workflow_id, s.iteration_id, g.group_index
             FROM jobscript j
             JOIN submission s ON s.id = j.submission_id
             JOIN command_group g ON g.id = j.command_group_id
             WHERE j.id = ?1",
        )
        .bind(jobscript_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::JobscriptNotFound(jobscript_id))?;

        let workflow_id: i64 = row.get("workflow_id");
        let iteration_id: i64 = row.get("iteration_id");
        let group_index: i64 = row.get("group_index");
        Ok(JobscriptContext {
            jobscript: row_to_jobscript(row)?,
            workflow_id,
            iteration_id,
            group_index: group_index as usize,
        })
    }

    /// Record a dispatch: stamp the scheduler job id and move the
    /// jobscript's pending tasks to submitted.
    pub async fn mark_dispatched(
        &self,
        jobscript_id: i64,
        scheduler_job_id: i64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE jobscript SET scheduler_job_id = ?1 WHERE id = ?2")
            .bind(scheduler_job_id)
            .bind(jobscript_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE task SET status = 'submitted', scheduler_task_id = task_index + 1
             WHERE jobscript_id = ?1 AND status = 'pending'",
        )
        .bind(jobscript_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Materialized Phase-A rows; idempotent for resumed submissions.
    pub async fn insert_variable_values(
        &self,
        submission_id: i64,
        variable_definition_id: i64,
        values: &[String],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (row_index, value) in values.iter().enumerate() {
            sqlx::query(
                "INSERT OR IGNORE INTO variable_value
                 (submission_id, variable_definition_id, row_index, value)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(submission_id)
            .bind(variable_definition_id)
            .bind(row_index as i64)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Grow a jobscript's task vector to `count` rows. Used when a group
    /// deferred at submit time resolves to more rows at runtime; existing
    /// rows and their states are untouched.
    pub async fn ensure_tasks(
        &self,
        jobscript_id: i64,
        iteration_id: i64,
        count: i64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for task_index in 0..count {
            sqlx::query(
                "INSERT OR IGNORE INTO task (jobscript_id, iteration_id, task_index, status)
                 VALUES (?1, ?2, ?3, 'submitted')",
            )
            .bind(jobscript_id)
            .bind(iteration_id)
            .bind(task_index)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("UPDATE jobscript SET num_tasks = MAX(num_tasks, ?1) WHERE id = ?2")
            .bind(count)
            .bind(jobscript_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Every dispatched scheduler job id across a workflow's submissions.
    pub async fn scheduler_job_ids(&self, workflow_id: i64) -> Result<Vec<i64>, StoreError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT j.scheduler_job_id FROM jobscript j
             JOIN submission s ON s.id = j.submission_id
             WHERE s.workflow_id = ?1 AND j.scheduler_job_id IS NOT NULL
             ORDER BY j.id",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

fn row_to_jobscript(row: sqlx::sqlite::SqliteRow) -> Result<JobscriptRecord, StoreError> {
    let depends_on: String = row.get("depends_on");
    Ok(JobscriptRecord {
        id: row.get("id"),
        submission_id: row.get("submission_id"),
        command_group_id: row.get("command_group_id"),
        channel: row.get("channel"),
        num_tasks: row.get("num_tasks"),
        depends_on: serde_json::from_str(&depends_on)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
        path: row.get("path"),
        scheduler_job_id: row.get("scheduler_job_id"),
    })
}
