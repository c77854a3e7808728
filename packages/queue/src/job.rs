// ABOUTME: Job payload, delivery and inspection types for the execution queue
// ABOUTME: A claimed job carries the delivery attempt number that leased it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::policy::RetryPolicy;
use crate::{QueueError, QueueResult};

/// Everything a worker needs to run one execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub execution_id: String,
    pub session_id: String,
    pub source_code: String,
    pub language: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> QueueResult<Self> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            _ => Err(QueueError::InvalidState(s.to_string())),
        }
    }
}

/// One leased delivery of a job
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: i64,
    pub payload: JobPayload,
    /// 1-based delivery attempt that produced this lease
    pub attempt: u32,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub lease_owner: String,
}

impl ClaimedJob {
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.max_attempts,
            backoff_base: self.backoff_base,
        }
    }
}

/// What `fail` did with the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back to waiting; redelivered after `delay`
    Retry { delay: Duration },
    /// No attempts left; retained as failed
    Exhausted,
}

/// Active job whose lease expired on its final attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledJob {
    pub job_id: i64,
    pub execution_id: String,
    pub attempts_made: u32,
}

/// Full job row, for inspection and audit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub queue: String,
    pub execution_id: String,
    pub session_id: String,
    pub payload: JobPayload,
    pub state: JobState,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub available_at: DateTime<Utc>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueCounts {
    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.completed + self.failed
    }
}
