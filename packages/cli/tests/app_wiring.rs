// ABOUTME: Tests for the App wiring used by every coderun subcommand
// ABOUTME: Runs against a temporary database; no Docker daemon is needed

use coderun_cli::{App, Config};
use coderun_executions::{ExecutionStatus, SubmitRunRequest};
use coderun_sandbox::Language;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tempfile::TempDir;

async fn open_app(dir: &TempDir) -> App {
    let config = Config {
        database_path: dir.path().join("nested").join("coderun.db"),
        execution_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    App::open(config).await.expect("Failed to open app")
}

#[tokio::test]
async fn test_open_creates_database_and_applies_queue_settings() {
    let dir = TempDir::new().unwrap();
    let app = open_app(&dir).await;

    assert!(dir.path().join("nested").join("coderun.db").exists());
    assert_eq!(app.queue.settings().lease_duration, Duration::from_secs(35));
    assert_eq!(app.queue.counts().await.unwrap().total(), 0);
}

#[tokio::test]
async fn test_submit_and_replay_through_app() {
    let dir = TempDir::new().unwrap();
    let app = open_app(&dir).await;

    let session = app
        .sessions
        .create_session(Language::Python, None)
        .await
        .unwrap();

    let request = SubmitRunRequest {
        session_id: session.id.clone(),
        source_code: None,
        idempotency_key: Some("cli-key-1".to_string()),
    };
    let first = app.executions.submit_run(request.clone()).await.unwrap();
    let replay = app.executions.submit_run(request).await.unwrap();

    assert_eq!(first, replay);
    assert_eq!(first.status, ExecutionStatus::Queued);
    assert_eq!(app.queue.counts().await.unwrap().waiting, 1);

    let listed = app.executions.list_executions(&session.id).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_wait_for_gives_up_without_workers() {
    let dir = TempDir::new().unwrap();
    let app = open_app(&dir).await;

    let session = app
        .sessions
        .create_session(Language::JavaScript, None)
        .await
        .unwrap();
    let response = app
        .executions
        .submit_run(SubmitRunRequest {
            session_id: session.id,
            ..Default::default()
        })
        .await
        .unwrap();

    let err = app
        .wait_for(
            &response.execution_id,
            Duration::from_millis(10),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("still QUEUED"));
}
