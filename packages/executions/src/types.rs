// ABOUTME: Execution record, session and request/response type definitions
// ABOUTME: Status and error-type enums map one-to-one onto their stored text values

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coderun_storage::StorageError;

/// Maximum length of a client-supplied idempotency key
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "QUEUED",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Timeout => "TIMEOUT",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, StorageError> {
        match s {
            "QUEUED" => Ok(ExecutionStatus::Queued),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "COMPLETED" => Ok(ExecutionStatus::Completed),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "TIMEOUT" => Ok(ExecutionStatus::Timeout),
            _ => Err(StorageError::InvalidStatus(s.to_string())),
        }
    }

    /// Terminal records are never mutated again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Timeout
        )
    }
}

/// Classification of a failed or timed-out execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorType {
    /// The program exited non-zero, or its language is unsupported
    RuntimeError,
    TimeoutError,
    OutputLimitError,
    /// The isolation backend could not run or supervise the program
    InfrastructureError,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::RuntimeError => "RuntimeError",
            ErrorType::TimeoutError => "TimeoutError",
            ErrorType::OutputLimitError => "OutputLimitError",
            ErrorType::InfrastructureError => "InfrastructureError",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, StorageError> {
        match s {
            "RuntimeError" => Ok(ErrorType::RuntimeError),
            "TimeoutError" => Ok(ErrorType::TimeoutError),
            "OutputLimitError" => Ok(ErrorType::OutputLimitError),
            "InfrastructureError" => Ok(ErrorType::InfrastructureError),
            _ => Err(StorageError::InvalidStatus(format!("unknown error type: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub session_id: String,
    pub status: ExecutionStatus,
    pub source_code_snapshot: String,
    pub language: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub execution_time_ms: Option<i64>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub idempotency_key: Option<String>,
    pub error_type: Option<ErrorType>,
    pub error_message: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Fields fixed at submission time
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub session_id: String,
    pub source_code: String,
    pub language: String,
    pub idempotency_key: Option<String>,
    pub max_attempts: u32,
}

/// Final result written when an execution reaches a terminal status
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub execution_time_ms: i64,
    pub error_type: Option<ErrorType>,
    pub error_message: Option<String>,
}

/// Client-facing projection of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionView {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub execution_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<Execution> for ExecutionView {
    fn from(execution: Execution) -> Self {
        Self {
            execution_id: execution.id,
            status: execution.status,
            stdout: execution.stdout.unwrap_or_default(),
            stderr: execution.stderr.unwrap_or_default(),
            exit_code: execution.exit_code,
            execution_time_ms: execution.execution_time_ms.unwrap_or(0),
            error_message: execution.error_message,
            error_type: execution.error_type,
            queued_at: execution.queued_at,
            started_at: execution.started_at,
            finished_at: execution.finished_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRunRequest {
    pub session_id: String,
    /// Overrides the session's current code when set
    pub source_code: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRunResponse {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub queued_at: DateTime<Utc>,
}

impl From<Execution> for SubmitRunResponse {
    fn from(execution: Execution) -> Self {
        Self {
            execution_id: execution.id,
            status: execution.status,
            queued_at: execution.queued_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Active,
    Archived,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Archived => "ARCHIVED",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, StorageError> {
        match s {
            "ACTIVE" => Ok(SessionStatus::Active),
            "ARCHIVED" => Ok(SessionStatus::Archived),
            _ => Err(StorageError::InvalidStatus(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSession {
    pub id: String,
    pub language: String,
    pub source_code: String,
    pub status: SessionStatus,
    pub latest_execution_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
