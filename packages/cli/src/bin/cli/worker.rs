// ABOUTME: Long-running worker command that consumes the execution queue
// ABOUTME: Ctrl-C stops claiming new jobs and waits for in-flight executions

use anyhow::{Context, Result};
use coderun_cli::App;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

pub async fn worker_command(app: &App) -> Result<()> {
    let pool = Arc::new(app.worker_pool().await?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let workers = tokio::spawn(pool.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested, waiting for in-flight executions");
    // Receivers only go away once every worker has stopped
    let _ = shutdown_tx.send(true);

    workers.await.context("Worker pool task failed")?;
    Ok(())
}
