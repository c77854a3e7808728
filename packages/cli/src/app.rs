// ABOUTME: Wires configuration into the storage, queue, execution and worker components
// ABOUTME: Shared by every coderun subcommand so they all see the same database and settings

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use coderun_executions::{ExecutionService, ExecutionStorage, ExecutionView, SqliteSessionStore};
use coderun_queue::JobQueue;
use coderun_sandbox::{DockerProvider, SandboxProvider, SandboxRunner};
use coderun_worker::{ExecutionProcessor, WorkerPool};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::Config;

pub struct App {
    pub config: Config,
    pub pool: SqlitePool,
    pub sessions: Arc<SqliteSessionStore>,
    pub queue: Arc<JobQueue>,
    pub executions: ExecutionService,
}

impl App {
    /// Open the database, apply migrations and build the submission side
    pub async fn open(config: Config) -> Result<Self> {
        let pool = coderun_storage::open(&config.storage_config())
            .await
            .with_context(|| {
                format!("Failed to open database {}", config.database_path.display())
            })?;

        let sessions = Arc::new(SqliteSessionStore::new(pool.clone()));
        let queue = Arc::new(JobQueue::new(pool.clone(), config.queue_settings()));
        let executions = ExecutionService::new(pool.clone(), sessions.clone(), queue.clone());

        Ok(Self {
            config,
            pool,
            sessions,
            queue,
            executions,
        })
    }

    /// Build a worker pool backed by the local Docker daemon
    pub async fn worker_pool(&self) -> Result<WorkerPool> {
        let provider =
            DockerProvider::new().context("Failed to create Docker client for sandboxes")?;

        let reachable = matches!(provider.is_available().await, Ok(true));
        let runner = SandboxRunner::new(Arc::new(provider), self.config.sandbox_settings());

        // Image pulls happen before claiming so they never eat into a lease
        if reachable {
            info!("Docker daemon is reachable");
            runner.pull_images().await;
        } else {
            warn!("Docker daemon is not reachable yet; deliveries will be retried");
        }

        let processor = ExecutionProcessor::new(
            ExecutionStorage::new(self.pool.clone()),
            self.sessions.clone(),
            Arc::new(runner),
        );

        Ok(WorkerPool::new(
            self.queue.clone(),
            Arc::new(processor),
            self.config.worker_settings(),
        ))
    }

    /// Poll an execution until it reaches a terminal status
    pub async fn wait_for(
        &self,
        execution_id: &str,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<ExecutionView> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let view = self.executions.get_execution(execution_id).await?;
            if view.status.is_terminal() {
                return Ok(view);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!(
                    "Execution {} still {} after {}s",
                    execution_id,
                    view.status.as_str(),
                    timeout.as_secs()
                );
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
