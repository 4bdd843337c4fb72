//! Workflow store integration tests: idempotent task events, concurrent
//! writers, cancellation sweeps and the archive lock.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use batchflow::adapters::sqlite::{
    connection, Migrator, NewJobscript, RetryPolicy, SubmissionRepository, TaskRepository,
    WorkflowRepository,
};
use batchflow::domain::error::StoreError;
use batchflow::domain::models::config::{DatabaseConfig, RetryConfig};
use batchflow::domain::models::{GroupOverrides, TaskRange, TaskStatus, Workflow};
use sqlx::SqlitePool;

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(&RetryConfig {
        max_retries: 8,
        initial_backoff_ms: 5,
        max_backoff_ms: 50,
    })
}

async fn file_pool(dir: &std::path::Path) -> SqlitePool {
    let pool = connection::create_pool(
        &dir.join("workflow.db"),
        &DatabaseConfig::default(),
        true,
    )
    .await
    .expect("pool");
    Migrator::new(&pool).run().await.expect("migrations");
    pool
}

/// Persist a one-group workflow and a submission with `num_tasks` tasks;
/// returns the jobscript id.
async fn seed(pool: &SqlitePool, num_tasks: i64) -> i64 {
    let spec = common::grid_spec(&[(0, 0, "echo run")], "");
    let workflow =
        Workflow::from_spec(&spec, PathBuf::from("/work"), &GroupOverrides::default()).unwrap();

    let wf_repo = WorkflowRepository::new(pool.clone());
    let workflow_id = wf_repo.insert(&workflow).await.unwrap();
    let iteration = wf_repo.latest_iteration(workflow_id).await.unwrap();
    let group_id = wf_repo.command_group_id(workflow_id, 0).await.unwrap();

    let sub_repo = SubmissionRepository::new(pool.clone());
    let (_, jobscript_ids) = sub_repo
        .insert(
            workflow_id,
            iteration.id,
            &[TaskRange::all()],
            &[NewJobscript {
                command_group_id: group_id,
                channel: 0,
                path: "js_0_0.sh".into(),
                task_indices: (0..num_tasks).collect(),
                depends_on_positions: vec![],
            }],
        )
        .await
        .unwrap();
    jobscript_ids[0]
}

#[tokio::test]
async fn test_task_start_and_end_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(dir.path()).await;
    let js = seed(&pool, 1).await;
    let tasks = TaskRepository::new(pool.clone(), fast_retry());

    tasks.set_task_start(js, 0).await.unwrap();
    let first = tasks.tasks_for_jobscript(js).await.unwrap()[0].clone();
    assert_eq!(first.status, TaskStatus::Running);
    let started_at = first.started_at.unwrap();

    // A retried start keeps the original timestamp
    tokio::time::sleep(Duration::from_millis(20)).await;
    tasks.set_task_start(js, 0).await.unwrap();
    let after = tasks.tasks_for_jobscript(js).await.unwrap()[0].clone();
    assert_eq!(after.started_at.unwrap(), started_at);

    tasks.set_task_end(js, 0, 0).await.unwrap();
    let done = tasks.tasks_for_jobscript(js).await.unwrap()[0].clone();
    assert_eq!(done.status, TaskStatus::Complete);
    assert_eq!(done.exit_status, Some(0));

    // A retried end with a different code cannot rewrite the outcome
    tasks.set_task_end(js, 0, 9).await.unwrap();
    let still_done = tasks.tasks_for_jobscript(js).await.unwrap()[0].clone();
    assert_eq!(still_done.status, TaskStatus::Complete);
    assert_eq!(still_done.exit_status, Some(0));
    assert_eq!(still_done.ended_at, done.ended_at);
}

#[tokio::test]
async fn test_nonzero_exit_fails_task() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(dir.path()).await;
    let js = seed(&pool, 1).await;
    let tasks = TaskRepository::new(pool.clone(), fast_retry());

    tasks.set_task_start(js, 0).await.unwrap();
    tasks.set_task_end(js, 0, 2).await.unwrap();
    let task = tasks.tasks_for_jobscript(js).await.unwrap()[0].clone();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.exit_status, Some(2));
}

#[tokio::test]
async fn test_unknown_task_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(dir.path()).await;
    let js = seed(&pool, 1).await;
    let tasks = TaskRepository::new(pool.clone(), fast_retry());

    let err = tasks.set_task_start(js, 99).await.unwrap_err();
    assert!(matches!(err, StoreError::TaskNotFound { .. }));
}

#[tokio::test]
async fn test_200_concurrent_task_ends_all_persist() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(dir.path()).await;
    let js = seed(&pool, 200).await;
    let tasks = Arc::new(TaskRepository::new(pool.clone(), fast_retry()));

    for index in 0..200 {
        tasks.set_task_start(js, index).await.unwrap();
    }

    let started = Instant::now();
    let mut handles = Vec::with_capacity(200);
    for index in 0..200 {
        let tasks = Arc::clone(&tasks);
        handles.push(tokio::spawn(async move {
            tasks.set_task_end(js, index, 0).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert!(
        started.elapsed() < Duration::from_secs(30),
        "concurrent task ends exceeded the budget"
    );

    let all = tasks.tasks_for_jobscript(js).await.unwrap();
    assert_eq!(all.len(), 200);
    assert!(all.iter().all(|t| t.status == TaskStatus::Complete));
    assert!(all.iter().all(|t| t.ended_at.is_some()));
}

#[tokio::test]
async fn test_kill_sweep_respects_terminal_states() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(dir.path()).await;
    let js = seed(&pool, 10).await;
    let tasks = TaskRepository::new(pool.clone(), fast_retry());

    // 3 complete, 4 running, 3 pending
    for index in 0..7 {
        tasks.set_task_start(js, index).await.unwrap();
    }
    for index in 0..3 {
        tasks.set_task_end(js, index, 0).await.unwrap();
    }

    let swept = tasks.kill_sweep(1, "cancelled by kill").await.unwrap();
    assert_eq!(swept, 7);

    let all = tasks.tasks_for_jobscript(js).await.unwrap();
    for task in &all[0..3] {
        assert_eq!(task.status, TaskStatus::Complete);
        assert!(task.failure_reason.is_none());
    }
    for task in &all[3..7] {
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.ended_at.is_some(), "running tasks record an end time");
    }
    for task in &all[7..10] {
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.failure_reason.as_deref(), Some("cancelled by kill"));
        assert!(task.started_at.is_none(), "pending tasks never started");
    }

    // A second sweep is a no-op
    let swept_again = tasks.kill_sweep(1, "cancelled by kill").await.unwrap();
    assert_eq!(swept_again, 0);
}

#[tokio::test]
async fn test_archive_lock_is_exclusive_per_task() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(dir.path()).await;
    let js = seed(&pool, 1).await;
    let tasks = TaskRepository::new(pool.clone(), fast_retry());

    let all = tasks.tasks_for_jobscript(js).await.unwrap();
    let task_id = all[0].id;

    let op = tasks.start_archive(task_id, "null").await.unwrap();
    let err = tasks.start_archive(task_id, "null").await.unwrap_err();
    assert!(matches!(err, StoreError::ArchiveActive(_)));

    tasks.end_archive(op.id).await.unwrap();
    assert!(tasks.get(task_id).await.unwrap().archived);

    // Lock released; a new operation may begin
    tasks.start_archive(task_id, "null").await.unwrap();
}

#[tokio::test]
async fn test_missing_store_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let err = connection::create_pool(
        &dir.path().join("workflow.db"),
        &DatabaseConfig::default(),
        false,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, StoreError::SchemaMissing));
}
