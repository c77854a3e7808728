// ABOUTME: Fixed-size pool of queue consumers plus a reaper for stalled final attempts
// ABOUTME: Each consumer runs one execution at a time and stops claiming on shutdown

use std::sync::Arc;
use std::time::Duration;

use coderun_queue::{ClaimedJob, JobQueue, QueueError, QueueResult};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::processor::{ExecutionProcessor, ProcessOutcome};

pub const DEFAULT_CONCURRENCY: usize = 2;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_STALLED_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Number of executions run in parallel by this process
    pub concurrency: usize,
    /// Idle wait between empty polls
    pub poll_interval: Duration,
    pub stalled_check_interval: Duration,
    /// Prefix of the lease owner recorded on claimed jobs
    pub name: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stalled_check_interval: DEFAULT_STALLED_CHECK_INTERVAL,
            name: format!("worker-{}", std::process::id()),
        }
    }
}

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    processor: Arc<ExecutionProcessor>,
    settings: WorkerSettings,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        processor: Arc<ExecutionProcessor>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            processor,
            settings,
        }
    }

    /// Run consumers until `shutdown` flips to true. In-flight executions
    /// are allowed to finish.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!(
            "Starting {} worker(s) as {}",
            self.settings.concurrency, self.settings.name
        );

        let mut handles = Vec::with_capacity(self.settings.concurrency + 1);
        for index in 0..self.settings.concurrency {
            let worker_id = format!("{}-{}", self.settings.name, index);
            handles.push(tokio::spawn(
                self.clone().consume(worker_id, shutdown.clone()),
            ));
        }
        handles.push(tokio::spawn(self.clone().reap_stalled(shutdown)));

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker task panicked: {}", e);
            }
        }

        info!("All workers stopped");
    }

    async fn consume(self: Arc<Self>, worker_id: String, mut shutdown: watch::Receiver<bool>) {
        debug!("Worker {} started", worker_id);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.process_next(&worker_id).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => error!("Worker {} failed to poll queue: {}", worker_id, e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Worker {} stopped", worker_id);
    }

    /// Claim and handle one job. Returns `false` when nothing was due.
    pub async fn process_next(&self, worker_id: &str) -> QueueResult<bool> {
        let Some(job) = self.queue.claim(worker_id).await? else {
            return Ok(false);
        };

        if let Err(e) = self.handle(&job).await {
            match e {
                QueueError::LeaseLost(id) => {
                    warn!("Worker {} lost the lease on job {}", worker_id, id)
                }
                other => return Err(other),
            }
        }
        Ok(true)
    }

    async fn handle(&self, job: &ClaimedJob) -> QueueResult<()> {
        let heartbeat = tokio::spawn(keep_leased(self.queue.clone(), job.clone()));
        let result = self.processor.process(job).await;
        heartbeat.abort();

        match result {
            Ok(ProcessOutcome::Finished(status)) => {
                debug!("Job {} finished with {}", job.id, status.as_str());
                self.queue.complete(job).await
            }
            Ok(ProcessOutcome::AlreadyTerminal(_)) => self.queue.complete(job).await,
            Err(e) if e.is_retryable() => {
                self.queue.fail(job, &e.to_string()).await?;
                Ok(())
            }
            Err(e) => self.queue.discard(job, &e.to_string()).await,
        }
    }

    /// Fail executions whose final delivery was lost with its worker
    pub async fn fail_stalled(&self) -> QueueResult<usize> {
        let stalled = self.queue.fail_stalled().await?;

        for job in &stalled {
            let reason = format!(
                "Worker lost while running attempt {}; no attempts remain",
                job.attempts_made
            );
            if let Err(e) = self.processor.abandon(&job.execution_id, &reason).await {
                error!(
                    "Failed to mark stalled execution {} as failed: {}",
                    job.execution_id, e
                );
            }
        }

        Ok(stalled.len())
    }

    async fn reap_stalled(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.stalled_check_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.fail_stalled().await {
                Ok(0) => {}
                Ok(count) => warn!("Failed {} stalled job(s)", count),
                Err(e) => error!("Stalled job check failed: {}", e),
            }
        }
    }
}

/// Extend the lease of a running delivery every third of the lease duration
/// until aborted or the lease is lost
async fn keep_leased(queue: Arc<JobQueue>, job: ClaimedJob) {
    let every = queue.settings().lease_duration / 3;
    if every.is_zero() {
        return;
    }

    loop {
        tokio::time::sleep(every).await;
        if let Err(e) = queue.extend_lease(&job).await {
            warn!("Stopped extending lease on job {}: {}", job.id, e);
            return;
        }
    }
}
