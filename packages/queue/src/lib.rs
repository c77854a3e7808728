// ABOUTME: Durable job queue for execution requests, stored in the shared SQLite database
// ABOUTME: At-least-once delivery through leases, with bounded retries and exponential backoff

pub mod job;
pub mod policy;
pub mod queue;

pub use job::{ClaimedJob, FailOutcome, Job, JobPayload, JobState, QueueCounts, StalledJob};
pub use policy::{QueueSettings, RetryPolicy};
pub use queue::JobQueue;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// The job is no longer leased to this delivery
    #[error("Lease lost for job {0}")]
    LeaseLost(i64),
    #[error("Job not found: {0}")]
    NotFound(i64),
    #[error("Invalid job state: {0}")]
    InvalidState(String),
}

pub type QueueResult<T> = Result<T, QueueError>;
