// ABOUTME: Integration tests for run submission through ExecutionService
// ABOUTME: Covers idempotent replay, the concurrent duplicate race and the query surface

use coderun_executions::{
    ExecutionError, ExecutionOutcome, ExecutionService, ExecutionStatus, ExecutionStorage,
    SqliteSessionStore, SubmitRunRequest,
};
use coderun_queue::{JobQueue, QueueSettings};
use coderun_sandbox::Language;
use coderun_storage::{open, StorageConfig};
use pretty_assertions::assert_eq;
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    service: Arc<ExecutionService>,
    sessions: Arc<SqliteSessionStore>,
    queue: Arc<JobQueue>,
    pool: SqlitePool,
    _dir: TempDir,
}

async fn setup() -> Harness {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let pool = open(&StorageConfig::new(dir.path().join("coderun.db")))
        .await
        .expect("Failed to open database");

    let sessions = Arc::new(SqliteSessionStore::new(pool.clone()));
    let queue = Arc::new(JobQueue::new(pool.clone(), QueueSettings::default()));
    let service = Arc::new(ExecutionService::new(
        pool.clone(),
        sessions.clone(),
        queue.clone(),
    ));

    Harness {
        service,
        sessions,
        queue,
        pool,
        _dir: dir,
    }
}

fn request(session_id: &str, key: Option<&str>) -> SubmitRunRequest {
    SubmitRunRequest {
        session_id: session_id.to_string(),
        source_code: None,
        idempotency_key: key.map(str::to_string),
    }
}

async fn execution_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM executions")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_submit_queues_record_and_job() {
    let h = setup().await;
    let session = h.sessions.create_session(Language::Python, None).await.unwrap();

    let response = h.service.submit_run(request(&session.id, None)).await.unwrap();
    assert_eq!(response.status, ExecutionStatus::Queued);

    let jobs = h.queue.jobs_for_execution(&response.execution_id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].payload.source_code, r#"print("Hello World")"#);
    assert_eq!(jobs[0].payload.language, "python");
    assert_eq!(jobs[0].payload.session_id, session.id);

    let view = h.service.get_execution(&response.execution_id).await.unwrap();
    assert_eq!(view.status, ExecutionStatus::Queued);
    assert_eq!(view.stdout, "");
    assert_eq!(view.queued_at, response.queued_at);
}

#[tokio::test]
async fn test_source_override_is_snapshotted() {
    let h = setup().await;
    let session = h.sessions.create_session(Language::Python, None).await.unwrap();

    let response = h
        .service
        .submit_run(SubmitRunRequest {
            source_code: Some("print(2)".to_string()),
            ..request(&session.id, None)
        })
        .await
        .unwrap();

    // Later edits to the session do not touch the snapshot
    sqlx::query("UPDATE code_sessions SET source_code = 'print(3)' WHERE id = ?")
        .bind(&session.id)
        .execute(&h.pool)
        .await
        .unwrap();

    let record = ExecutionStorage::new(h.pool.clone())
        .get_execution(&response.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.source_code_snapshot, "print(2)");
}

#[tokio::test]
async fn test_same_key_replays_without_enqueueing() {
    let h = setup().await;
    let session = h.sessions.create_session(Language::Python, None).await.unwrap();

    let first = h
        .service
        .submit_run(request(&session.id, Some("key-1")))
        .await
        .unwrap();
    let second = h
        .service
        .submit_run(request(&session.id, Some("key-1")))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(execution_count(&h.pool).await, 1);
    assert_eq!(h.queue.counts().await.unwrap().total(), 1);
}

#[tokio::test]
async fn test_same_key_after_completion_returns_terminal_record() {
    let h = setup().await;
    let session = h.sessions.create_session(Language::Python, None).await.unwrap();
    let first = h
        .service
        .submit_run(request(&session.id, Some("key-done")))
        .await
        .unwrap();

    let storage = ExecutionStorage::new(h.pool.clone());
    storage.mark_running(&first.execution_id, 1).await.unwrap();
    storage
        .finish(
            &first.execution_id,
            &ExecutionOutcome {
                status: ExecutionStatus::Completed,
                stdout: "Hello World\n".to_string(),
                stderr: String::new(),
                exit_code: 0,
                execution_time_ms: 12,
                error_type: None,
                error_message: None,
            },
        )
        .await
        .unwrap();

    let replay = h
        .service
        .submit_run(request(&session.id, Some("key-done")))
        .await
        .unwrap();

    assert_eq!(replay.execution_id, first.execution_id);
    assert_eq!(replay.status, ExecutionStatus::Completed);
    assert_eq!(h.queue.counts().await.unwrap().total(), 1);
}

#[tokio::test]
async fn test_concurrent_same_key_converges_on_one_record() {
    let h = setup().await;
    let session = h.sessions.create_session(Language::Python, None).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = h.service.clone();
        let req = request(&session.id, Some("race-key"));
        handles.push(tokio::spawn(async move { service.submit_run(req).await }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().execution_id);
    }

    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(execution_count(&h.pool).await, 1);
    assert_eq!(h.queue.counts().await.unwrap().total(), 1);
}

#[tokio::test]
async fn test_distinct_and_absent_keys_create_distinct_records() {
    let h = setup().await;
    let session = h.sessions.create_session(Language::JavaScript, None).await.unwrap();

    let a = h.service.submit_run(request(&session.id, Some("a"))).await.unwrap();
    let b = h.service.submit_run(request(&session.id, Some("b"))).await.unwrap();
    let c = h.service.submit_run(request(&session.id, None)).await.unwrap();
    let d = h.service.submit_run(request(&session.id, None)).await.unwrap();

    let mut ids = vec![a.execution_id, b.execution_id, c.execution_id, d.execution_id];
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
    assert_eq!(h.queue.counts().await.unwrap().waiting, 4);
}

#[tokio::test]
async fn test_rejections() {
    let h = setup().await;
    let session = h.sessions.create_session(Language::Python, None).await.unwrap();

    assert!(matches!(
        h.service.submit_run(request(&session.id, Some(""))).await,
        Err(ExecutionError::Validation(_))
    ));
    let long_key = "k".repeat(129);
    assert!(matches!(
        h.service.submit_run(request(&session.id, Some(&long_key))).await,
        Err(ExecutionError::Validation(_))
    ));
    assert!(matches!(
        h.service.submit_run(request("sess-missing", None)).await,
        Err(ExecutionError::NotFound(_))
    ));
    assert!(matches!(
        h.service.get_execution("exec-missing").await,
        Err(ExecutionError::NotFound(_))
    ));
    assert!(matches!(
        h.service.list_executions("sess-missing").await,
        Err(ExecutionError::NotFound(_))
    ));

    // Nothing was written by the rejected submissions
    assert_eq!(execution_count(&h.pool).await, 0);
    assert_eq!(h.queue.counts().await.unwrap().total(), 0);
}

#[tokio::test]
async fn test_list_executions_newest_first() {
    let h = setup().await;
    let session = h.sessions.create_session(Language::Python, None).await.unwrap();
    let other = h.sessions.create_session(Language::Python, None).await.unwrap();

    let first = h.service.submit_run(request(&session.id, None)).await.unwrap();
    let second = h.service.submit_run(request(&session.id, None)).await.unwrap();
    h.service.submit_run(request(&other.id, None)).await.unwrap();

    let listed: Vec<String> = h
        .service
        .list_executions(&session.id)
        .await
        .unwrap()
        .into_iter()
        .map(|view| view.execution_id)
        .collect();

    assert_eq!(listed, vec![second.execution_id, first.execution_id]);
}
