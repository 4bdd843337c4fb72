//! Submission controller.
//!
//! Orchestrates the lifecycle operations: `make` (validate + persist),
//! `submit` (resolve, schedule, emit, dispatch with holds), the runtime
//! hooks (`write_cmd`, task start/end), `kill`, `clean`, statistics and
//! archiving. All store access goes through the sqlite repositories; all
//! scheduler contact goes through the bridge port.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::adapters::sqlite::{
    connection, Migrator, NewJobscript, RetryPolicy, SubmissionRepository, TaskRepository,
    TaskStatRow, WorkflowRepository,
};
use crate::domain::error::StoreError;
use crate::domain::models::{
    Config, GroupOverrides, TaskRange, Workflow, WorkflowSpec,
};
use crate::domain::ports::{ArchiveSink, SchedulerBridge};
use crate::domain::template;
use crate::services::emitter::{self, EmitParams};
use crate::services::resolver::{self, Phase};
use crate::services::scheduler;

/// What `submit` should operate on.
pub enum SubmitTarget {
    /// A workflow already in the store
    WorkflowId(i64),
    /// Make first, then submit
    Spec(Box<WorkflowSpec>, GroupOverrides),
}

pub struct Controller {
    config: Config,
    workdir: PathBuf,
}

impl Controller {
    pub fn new(config: Config, workdir: PathBuf) -> Self {
        Self { config, workdir }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn data_dir(&self) -> PathBuf {
        self.workdir.join(&self.config.data_dir)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join(&self.config.database.filename)
    }

    fn submit_dir(&self, workflow_id: i64, submission_id: i64) -> PathBuf {
        self.data_dir()
            .join(format!("workflow_{}", workflow_id))
            .join(format!("submit_{}", submission_id))
    }

    /// Open the store. Schema creation is reserved for the make/submit
    /// paths; everything else fails fast when it is absent.
    async fn open(&self, create: bool) -> Result<sqlx::SqlitePool, StoreError> {
        let pool = connection::create_pool(&self.db_path(), &self.config.database, create).await?;
        if create {
            Migrator::new(&pool).run().await?;
        } else if !connection::schema_present(&pool).await? {
            return Err(StoreError::SchemaMissing);
        }
        Ok(pool)
    }

    fn task_repo(&self, pool: &sqlx::SqlitePool) -> TaskRepository {
        TaskRepository::new(pool.clone(), RetryPolicy::new(&self.config.retry))
    }

    /// Validate a declaration and persist it as a new workflow.
    pub async fn make_workflow(
        &self,
        spec: &WorkflowSpec,
        overrides: &GroupOverrides,
    ) -> Result<i64> {
        let workflow = Workflow::from_spec(spec, self.workdir.clone(), overrides)?;
        let pool = self.open(true).await?;
        let workflow_id = WorkflowRepository::new(pool.clone())
            .insert(&workflow)
            .await?;
        info!(workflow_id, "workflow created");
        Ok(workflow_id)
    }

    /// Submit a workflow: Phase-A resolution, channel scheduling, emission
    /// and ordered dispatch with hold chains. A repeated call with the
    /// same ranges after a failed mid-dispatch resumes the partial
    /// submission, dispatching only what is still pending.
    pub async fn submit_workflow(
        &self,
        bridge: &dyn SchedulerBridge,
        target: SubmitTarget,
        ranges: Option<Vec<TaskRange>>,
        new_iteration: bool,
    ) -> Result<i64> {
        enum Target {
            Existing(i64),
            New(Workflow),
        }

        // Validate the declaration before the store is even created.
        let target = match target {
            SubmitTarget::WorkflowId(id) => Target::Existing(id),
            SubmitTarget::Spec(spec, overrides) => Target::New(Workflow::from_spec(
                &spec,
                self.workdir.clone(),
                &overrides,
            )?),
        };

        let pool = self.open(true).await?;
        let wf_repo = WorkflowRepository::new(pool.clone());
        let sub_repo = SubmissionRepository::new(pool.clone());

        let workflow_id = match target {
            Target::Existing(id) => id,
            Target::New(workflow) => wf_repo.insert(&workflow).await?,
        };
        let workflow = wf_repo.load(workflow_id).await?;

        // Phase A: resolve what the working directory already allows.
        let mut own_counts: HashMap<usize, usize> = HashMap::new();
        let mut matrices = Vec::new();
        for group in &workflow.command_groups {
            let resolutions = resolver::resolve_group_variables(
                &workflow,
                group,
                &self.group_scan_dir(&workflow, group.index),
                Phase::Submit,
            )?;
            let matrix = resolver::group_matrix(group, &resolutions);
            if !group.referenced_variables().is_empty() {
                let count = match &matrix {
                    Some(matrix) => matrix.num_rows(),
                    None => resolver::provisional_task_count(&workflow, group).unwrap_or(1),
                };
                own_counts.insert(group.index, count);
            }
            matrices.push((matrix, resolutions));
        }

        let width = workflow.channel_width();
        let ranges = ranges.unwrap_or_else(|| vec![TaskRange::all(); width]);
        let plan = scheduler::schedule(&workflow, &own_counts, Some(&ranges))?;

        // Resume a half-dispatched submission rather than duplicating it.
        let (submission_id, jobscripts) =
            match sub_repo.find_resumable(workflow_id, &ranges).await? {
                Some(existing) => {
                    info!(submission_id = existing.id, "resuming partial submission");
                    let jobscripts = sub_repo.jobscripts(existing.id).await?;
                    (existing.id, jobscripts)
                }
                None => {
                    let iteration = if new_iteration {
                        wf_repo.next_iteration(workflow_id).await?
                    } else {
                        wf_repo.latest_iteration(workflow_id).await?
                    };

                    let mut position_of: HashMap<usize, usize> = HashMap::new();
                    for (position, scheduled) in plan.iter().enumerate() {
                        position_of.insert(scheduled.group_index, position);
                    }

                    let mut new_jobscripts = Vec::with_capacity(plan.len());
                    for scheduled in &plan {
                        let group = &workflow.command_groups[scheduled.group_index];
                        let command_group_id = wf_repo
                            .command_group_id(workflow_id, scheduled.group_index)
                            .await?;
                        let params = EmitParams {
                            group,
                            jobscript_id: 0,
                            num_tasks: scheduled.task_indices.len(),
                            workdir: &self.workdir,
                            submit_dir: Path::new(""),
                            jobscript_ext: &self.config.jobscript_ext,
                        };
                        new_jobscripts.push(NewJobscript {
                            command_group_id,
                            channel: scheduled.channel as i64,
                            path: params.file_name(),
                            task_indices: scheduled
                                .task_indices
                                .iter()
                                .map(|&i| i as i64)
                                .collect(),
                            depends_on_positions: scheduled
                                .depends_on
                                .iter()
                                .map(|gi| position_of[gi])
                                .collect(),
                        });
                    }

                    let (submission_id, _) = sub_repo
                        .insert(workflow_id, iteration.id, &ranges, &new_jobscripts)
                        .await?;
                    let jobscripts = sub_repo.jobscripts(submission_id).await?;
                    (submission_id, jobscripts)
                }
            };

        // Persist the Phase-A value tables.
        let variable_ids = wf_repo.variable_ids(workflow_id).await?;
        for (_, resolutions) in &matrices {
            for resolution in resolutions.values() {
                if let Some(resolved) = resolution.resolved() {
                    if let Some(&var_id) = variable_ids.get(&resolved.name) {
                        sub_repo
                            .insert_variable_values(submission_id, var_id, &resolved.values)
                            .await?;
                    }
                }
            }
        }

        // Emit jobscript files.
        let submit_dir = self.submit_dir(workflow_id, submission_id);
        for (scheduled, jobscript) in plan.iter().zip(&jobscripts) {
            let group = &workflow.command_groups[scheduled.group_index];
            let group_dir = submit_dir.join(format!("cg_{}", group.index));
            emitter::make_task_dirs(&group_dir, jobscript.num_tasks as usize)?;
            std::fs::create_dir_all(group_dir.join("vars"))?;

            let params = EmitParams {
                group,
                jobscript_id: jobscript.id,
                num_tasks: jobscript.num_tasks as usize,
                workdir: &self.workdir,
                submit_dir: &submit_dir,
                jobscript_ext: &self.config.jobscript_ext,
            };
            let script = emitter::render_jobscript(bridge, &params);
            write_atomic(&submit_dir.join(&jobscript.path), &script)?;
        }

        // Dispatch in plan order; holds reference already-dispatched jobs.
        let mut scheduler_ids: HashMap<i64, i64> = HashMap::new();
        for jobscript in &jobscripts {
            if let Some(job_id) = jobscript.scheduler_job_id {
                scheduler_ids.insert(jobscript.id, job_id);
                continue;
            }
            let holds: Vec<i64> = jobscript
                .depends_on
                .iter()
                .filter_map(|dep| scheduler_ids.get(dep).copied())
                .collect();
            let script_path = submit_dir.join(&jobscript.path);
            let job_id = bridge
                .submit(&script_path, &holds)
                .await
                .with_context(|| {
                    format!(
                        "dispatch failed for submission {}; undispatched jobscripts stay pending \
                         and a repeated submit with the same ranges will resume them",
                        submission_id
                    )
                })?;
            sub_repo.mark_dispatched(jobscript.id, job_id).await?;
            scheduler_ids.insert(jobscript.id, job_id);
        }

        info!(submission_id, workflow_id, "submission dispatched");
        Ok(submission_id)
    }

    // Scan directory for a group: the workflow directory, entered into a
    // literal directory override when one exists.
    fn group_scan_dir(&self, workflow: &Workflow, group_index: usize) -> PathBuf {
        let group = &workflow.command_groups[group_index];
        match &group.directory {
            Some(dir) if template::unique_references(dir).is_empty() => {
                workflow.directory.join(dir)
            }
            _ => workflow.directory.clone(),
        }
    }

    /// Runtime hook: Phase-B resolution for one task, writing the group's
    /// variable files and the task's concrete command file. Byte-stable
    /// across repeat calls with an unchanged working directory.
    pub async fn write_cmd(&self, jobscript_id: i64, task_index: i64) -> Result<PathBuf> {
        let pool = self.open(false).await?;
        let wf_repo = WorkflowRepository::new(pool.clone());
        let sub_repo = SubmissionRepository::new(pool.clone());
        let task_repo = self.task_repo(&pool);

        let ctx = sub_repo.jobscript_context(jobscript_id).await?;
        let workflow = wf_repo.load(ctx.workflow_id).await?;
        let group = &workflow.command_groups[ctx.group_index];
        let scan_dir = self.group_scan_dir(&workflow, ctx.group_index);

        let resolutions = match resolver::resolve_group_variables(
            &workflow,
            group,
            &scan_dir,
            Phase::Runtime,
        ) {
            Ok(resolutions) => resolutions,
            Err(err) => {
                // The affected task fails; siblings on other channels are
                // untouched.
                task_repo
                    .mark_failed(jobscript_id, task_index, &err.to_string())
                    .await?;
                return Err(err.into());
            }
        };

        let matrix = resolver::group_matrix(group, &resolutions).ok_or_else(|| {
            crate::domain::error::ResolutionError::Unresolved(format!(
                "command group {}",
                group.index
            ))
        })?;

        let submit_dir = self.submit_dir(ctx.workflow_id, ctx.jobscript.submission_id);
        let group_dir = submit_dir.join(format!("cg_{}", group.index));
        resolver::write_value_files(
            &matrix,
            &group_dir.join("vars"),
            &self.config.variable_file_ext,
        )?;

        // A group deferred at submit time may have more rows now than
        // tasks were created for; in loop mode the single scheduler task
        // walks every row, so grow the task vector to match.
        let num_rows = matrix.num_rows().max(1);
        let array_mode = group.job_array && group.parallel_variables;
        if !array_mode && num_rows as i64 > ctx.jobscript.num_tasks {
            sub_repo
                .ensure_tasks(jobscript_id, ctx.iteration_id, num_rows as i64)
                .await?;
        }

        let variable_names: Vec<String> =
            matrix.columns.iter().map(|(name, _)| name.clone()).collect();
        let body = emitter::render_command_file(
            group,
            jobscript_id,
            &variable_names,
            array_mode,
            &self.config.variable_file_ext,
        );

        let num_tasks = (ctx.jobscript.num_tasks as usize).max(1);
        let task_dir = group_dir
            .join("tasks")
            .join(emitter::task_dir_name(task_index as usize, num_tasks));
        std::fs::create_dir_all(&task_dir)?;
        let cmd_path = task_dir.join("cmd.sh");
        write_atomic(&cmd_path, &body)?;
        Ok(cmd_path)
    }

    /// Runtime hook invoked by jobscripts when a task begins.
    pub async fn set_task_start(&self, jobscript_id: i64, task_index: i64) -> Result<()> {
        let pool = self.open(false).await?;
        self.task_repo(&pool)
            .set_task_start(jobscript_id, task_index)
            .await?;
        Ok(())
    }

    /// Runtime hook invoked by jobscripts when a task finishes.
    pub async fn set_task_end(
        &self,
        jobscript_id: i64,
        task_index: i64,
        exit_status: i64,
    ) -> Result<()> {
        let pool = self.open(false).await?;
        self.task_repo(&pool)
            .set_task_end(jobscript_id, task_index, exit_status)
            .await?;
        Ok(())
    }

    /// Cancel scheduler jobs and fail non-terminal tasks for a workflow,
    /// the workflow owning a submission, or every workflow in the store.
    /// Idempotent; terminal tasks keep their state.
    pub async fn kill(
        &self,
        bridge: &dyn SchedulerBridge,
        workflow_id: Option<i64>,
        submission_id: Option<i64>,
    ) -> Result<u64> {
        let pool = self.open(false).await?;
        let wf_repo = WorkflowRepository::new(pool.clone());
        let sub_repo = SubmissionRepository::new(pool.clone());
        let task_repo = self.task_repo(&pool);

        let workflow_ids = match (workflow_id, submission_id) {
            (Some(id), _) => vec![id],
            (None, Some(submission)) => vec![sub_repo.get(submission).await?.workflow_id],
            (None, None) => wf_repo.list_ids().await?,
        };

        let mut swept = 0;
        for id in workflow_ids {
            let job_ids = sub_repo.scheduler_job_ids(id).await?;
            if !job_ids.is_empty() {
                if let Err(err) = bridge.cancel(&job_ids).await {
                    warn!(workflow_id = id, error = %err, "scheduler cancellation failed");
                }
            }
            swept += task_repo.kill_sweep(id, "cancelled by kill").await?;
        }
        Ok(swept)
    }

    /// Remove every generated artifact (store, jobscripts, value files).
    pub async fn clean(&self) -> Result<()> {
        let data_dir = self.data_dir();
        if data_dir.exists() {
            std::fs::remove_dir_all(&data_dir)
                .with_context(|| format!("removing {}", data_dir.display()))?;
        }
        Ok(())
    }

    /// Flat per-task statistics, optionally restricted to one workflow.
    pub async fn stats(&self, workflow_id: Option<i64>) -> Result<Vec<TaskStatRow>> {
        let pool = self.open(false).await?;
        Ok(self.task_repo(&pool).stats(workflow_id).await?)
    }

    /// Record an archive operation for a task and run the sink. Sink
    /// failures end the operation row but never touch task state.
    pub async fn archive(&self, sink: &dyn ArchiveSink, task_id: i64) -> Result<i64> {
        let pool = self.open(false).await?;
        let task_repo = self.task_repo(&pool);

        // Verifies the task exists before taking the archive lock.
        task_repo.get(task_id).await?;
        let operation = task_repo.start_archive(task_id, sink.destination()).await?;

        if let Err(err) = sink.archive(&self.workdir, &[]).await {
            warn!(task_id, error = %err, "archive sink failed");
        }
        task_repo.end_archive(operation.id).await?;
        Ok(operation.id)
    }
}

// Temp-file-plus-rename keeps concurrent writers of the same path from
// ever exposing a half-written file.
fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension(format!("tmp{}", std::process::id()));
    {
        let mut handle = std::fs::File::create(&tmp)?;
        handle.write_all(content.as_bytes())?;
    }
    std::fs::rename(&tmp, path)
}
