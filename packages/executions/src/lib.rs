// ABOUTME: Execution records, the session collaborator and the run-submission service
// ABOUTME: Owns the lifecycle rules for executions; workers mutate records only through this crate

pub mod service;
pub mod sessions;
pub mod storage;
pub mod types;

pub use service::ExecutionService;
pub use sessions::{SessionProvider, SqliteSessionStore};
pub use storage::ExecutionStorage;
pub use types::{
    CodeSession, ErrorType, Execution, ExecutionOutcome, ExecutionStatus, ExecutionView,
    NewExecution, SessionStatus, SubmitRunRequest, SubmitRunResponse, MAX_IDEMPOTENCY_KEY_LEN,
};

use coderun_queue::QueueError;
use coderun_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;
