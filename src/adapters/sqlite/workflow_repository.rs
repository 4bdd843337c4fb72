//! Persistence for workflows, command groups and variable definitions.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::error::StoreError;
use crate::domain::models::{CommandGroup, Iteration, VarDefinition, VarSource, Workflow};

pub struct WorkflowRepository {
    pool: SqlitePool,
}

impl WorkflowRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a validated workflow with its command groups, variable
    /// definitions and the default iteration, in one transaction.
    pub async fn insert(&self, workflow: &Workflow) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let created_at = workflow.created_at.to_rfc3339();
        let directory = workflow.directory.display().to_string();
        let workflow_id = sqlx::query(
            "INSERT INTO workflow (created_at, directory) VALUES (?1, ?2)",
        )
        .bind(&created_at)
        .bind(&directory)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for group in &workflow.command_groups {
            let commands = serde_json::to_string(&group.commands)
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            let options = serde_json::to_string(&group.scheduler_options)
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            let modules = serde_json::to_string(&group.modules)
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            sqlx::query(
                "INSERT INTO command_group
                 (workflow_id, group_index, exec_order, sub_order, commands, directory,
                  scheduler_options, modules, job_array, parallel_variables,
                  profile_name, profile_order)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )
            .bind(workflow_id)
            .bind(group.index as i64)
            .bind(group.exec_order)
            .bind(group.sub_order)
            .bind(&commands)
            .bind(&group.directory)
            .bind(&options)
            .bind(&modules)
            .bind(group.job_array)
            .bind(group.parallel_variables)
            .bind(&group.profile_name)
            .bind(group.profile_order)
            .execute(&mut *tx)
            .await?;
        }

        for var in workflow.variables.values() {
            let (data, file_regex) = match &var.source {
                Some(VarSource::Data(values)) => (
                    Some(
                        serde_json::to_string(values)
                            .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
                    ),
                    None,
                ),
                Some(VarSource::FileRegex(fr)) => (
                    None,
                    Some(
                        serde_json::to_string(fr)
                            .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
                    ),
                ),
                None => (None, None),
            };
            sqlx::query(
                "INSERT INTO variable_definition (workflow_id, name, data, file_regex, value)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(workflow_id)
            .bind(&var.name)
            .bind(&data)
            .bind(&file_regex)
            .bind(&var.value)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO iteration (workflow_id, ordinal, created_at) VALUES (?1, 0, ?2)",
        )
        .bind(workflow_id)
        .bind(&created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(workflow_id)
    }

    /// Reload a workflow with all of its declaration content.
    pub async fn load(&self, workflow_id: i64) -> Result<Workflow, StoreError> {
        let row = sqlx::query(
            "SELECT created_at, directory FROM workflow WHERE id = ?1",
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        let created_at: String = row.get("created_at");
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?
            .with_timezone(&Utc);
        let directory: String = row.get("directory");

        let group_rows = sqlx::query(
            "SELECT group_index, exec_order, sub_order, commands, directory,
                    scheduler_options, modules, job_array, parallel_variables,
                    profile_name, profile_order
             FROM command_group WHERE workflow_id = ?1 ORDER BY group_index",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        let mut command_groups = Vec::with_capacity(group_rows.len());
        for row in &group_rows {
            let commands: String = row.get("commands");
            let options: String = row.get("scheduler_options");
            let modules: String = row.get("modules");
            command_groups.push(CommandGroup {
                index: row.get::<i64, _>("group_index") as usize,
                exec_order: row.get("exec_order"),
                sub_order: row.get("sub_order"),
                commands: serde_json::from_str(&commands)
                    .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
                directory: row.get("directory"),
                scheduler_options: serde_json::from_str(&options)
                    .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
                modules: serde_json::from_str(&modules)
                    .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
                job_array: row.get("job_array"),
                parallel_variables: row.get("parallel_variables"),
                profile_name: row.get("profile_name"),
                profile_order: row.get("profile_order"),
            });
        }

        let var_rows = sqlx::query(
            "SELECT name, data, file_regex, value
             FROM variable_definition WHERE workflow_id = ?1 ORDER BY name",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        let mut variables = BTreeMap::new();
        for row in &var_rows {
            let name: String = row.get("name");
            let data: Option<String> = row.get("data");
            let file_regex: Option<String> = row.get("file_regex");
            let source = match (data, file_regex) {
                (Some(data), _) => Some(VarSource::Data(
                    serde_json::from_str(&data)
                        .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
                )),
                (None, Some(fr)) => Some(VarSource::FileRegex(
                    serde_json::from_str(&fr)
                        .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
                )),
                (None, None) => None,
            };
            variables.insert(
                name.clone(),
                VarDefinition {
                    name,
                    source,
                    value: row.get("value"),
                },
            );
        }

        Ok(Workflow {
            id: workflow_id,
            created_at,
            directory: PathBuf::from(directory),
            command_groups,
            variables,
        })
    }

    pub async fn list_ids(&self) -> Result<Vec<i64>, StoreError> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM workflow ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Database id of a command group by its declaration index.
    pub async fn command_group_id(
        &self,
        workflow_id: i64,
        group_index: usize,
    ) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT id FROM command_group WHERE workflow_id = ?1 AND group_index = ?2",
        )
        .bind(workflow_id)
        .bind(group_index as i64)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Name -> id map for the workflow's variable definitions.
    pub async fn variable_ids(
        &self,
        workflow_id: i64,
    ) -> Result<BTreeMap<String, i64>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT name, id FROM variable_definition WHERE workflow_id = ?1",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// The latest iteration for a workflow, creating ordinal 0 on demand.
    pub async fn latest_iteration(&self, workflow_id: i64) -> Result<Iteration, StoreError> {
        let row = sqlx::query(
            "SELECT id, ordinal, created_at FROM iteration
             WHERE workflow_id = ?1 ORDER BY ordinal DESC LIMIT 1",
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Iteration {
                id: row.get("id"),
                workflow_id,
                ordinal: row.get("ordinal"),
                created_at: parse_timestamp(row.get("created_at"))?,
            }),
            None => self.new_iteration(workflow_id, 0).await,
        }
    }

    /// Allocate the next iteration ordinal: fresh task rows, shared
    /// command groups.
    pub async fn next_iteration(&self, workflow_id: i64) -> Result<Iteration, StoreError> {
        let current = self.latest_iteration(workflow_id).await?;
        self.new_iteration(workflow_id, current.ordinal + 1).await
    }

    async fn new_iteration(
        &self,
        workflow_id: i64,
        ordinal: i64,
    ) -> Result<Iteration, StoreError> {
        let created_at = Utc::now();
        let id = sqlx::query(
            "INSERT INTO iteration (workflow_id, ordinal, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(workflow_id)
        .bind(ordinal)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(Iteration {
            id,
            workflow_id,
            ordinal,
            created_at,
        })
    }
}

pub(crate) fn parse_timestamp(raw: String) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::QueryFailed(e.to_string()))
}
