// ABOUTME: Per-delivery state machine moving an execution from QUEUED to a terminal status
// ABOUTME: Program failures become data; only an unreachable sandbox backend is retried

use std::sync::Arc;

use coderun_executions::{
    ErrorType, ExecutionOutcome, ExecutionStatus, ExecutionStorage, SessionProvider,
};
use coderun_queue::ClaimedJob;
use coderun_sandbox::{CodeRunner, RunOutput, SandboxError, Termination, FAILURE_EXIT_CODE};
use coderun_storage::StorageError;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const NON_ZERO_EXIT_MESSAGE: &str = "Execution failed with non-zero exit code";

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Execution not found: {0}")]
    MissingExecution(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl ProcessError {
    /// Whether another delivery could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProcessError::MissingExecution(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// This delivery ran the code and persisted the result
    Finished(ExecutionStatus),
    /// A previous delivery already finished the execution
    AlreadyTerminal(ExecutionStatus),
}

pub struct ExecutionProcessor {
    executions: ExecutionStorage,
    sessions: Arc<dyn SessionProvider>,
    runner: Arc<dyn CodeRunner>,
}

impl ExecutionProcessor {
    pub fn new(
        executions: ExecutionStorage,
        sessions: Arc<dyn SessionProvider>,
        runner: Arc<dyn CodeRunner>,
    ) -> Self {
        Self {
            executions,
            sessions,
            runner,
        }
    }

    pub async fn process(&self, job: &ClaimedJob) -> Result<ProcessOutcome, ProcessError> {
        let payload = &job.payload;
        let execution_id = payload.execution_id.as_str();

        let execution = self
            .executions
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| ProcessError::MissingExecution(execution_id.to_string()))?;

        if execution.status.is_terminal() {
            info!(
                "Execution {} already {}, acknowledging redelivery",
                execution_id,
                execution.status.as_str()
            );
            return Ok(ProcessOutcome::AlreadyTerminal(execution.status));
        }

        if !self.executions.mark_running(execution_id, job.attempt).await? {
            let status = self.current_status(execution_id).await?;
            return Ok(ProcessOutcome::AlreadyTerminal(status));
        }

        info!(
            "Running execution {} ({}, attempt {}/{})",
            execution_id, payload.language, job.attempt, job.max_attempts
        );

        let output = match self
            .runner
            .run(&payload.source_code, &payload.language)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                self.record_backend_failure(job, &e).await?;
                return Err(ProcessError::Sandbox(e));
            }
        };

        let outcome = classify(&output);
        if !self.executions.finish(execution_id, &outcome).await? {
            let status = self.current_status(execution_id).await?;
            warn!(
                "Execution {} was finished as {} by another delivery, discarding this result",
                execution_id,
                status.as_str()
            );
            return Ok(ProcessOutcome::AlreadyTerminal(status));
        }

        info!(
            "Execution {} finished as {} (exit {}, {} ms)",
            execution_id,
            outcome.status.as_str(),
            outcome.exit_code,
            outcome.execution_time_ms
        );

        if let Err(e) = self
            .sessions
            .update_latest_execution(&payload.session_id, execution_id)
            .await
        {
            warn!(
                "Failed to update latest execution of session {}: {}",
                payload.session_id, e
            );
        }

        Ok(ProcessOutcome::Finished(outcome.status))
    }

    async fn current_status(&self, execution_id: &str) -> Result<ExecutionStatus, ProcessError> {
        self.executions
            .get_execution(execution_id)
            .await?
            .map(|e| e.status)
            .ok_or_else(|| ProcessError::MissingExecution(execution_id.to_string()))
    }

    /// Record an unreachable backend. The record stays RUNNING while
    /// deliveries remain and becomes FAILED on the last one.
    async fn record_backend_failure(
        &self,
        job: &ClaimedJob,
        error: &SandboxError,
    ) -> Result<(), ProcessError> {
        let execution_id = job.payload.execution_id.as_str();
        let message = error.to_string();

        if job.is_final_attempt() {
            warn!(
                "Execution {} failed on final attempt {}: {}",
                execution_id, job.attempt, message
            );
            self.executions
                .finish(execution_id, &infrastructure_failure(&message))
                .await?;
        } else {
            debug!(
                "Execution {} attempt {} could not reach the sandbox: {}",
                execution_id, job.attempt, message
            );
            self.executions
                .record_delivery_error(execution_id, ErrorType::InfrastructureError, &message)
                .await?;
        }
        Ok(())
    }

    /// Fail an execution whose job was lost with no attempts left
    pub async fn abandon(&self, execution_id: &str, reason: &str) -> Result<bool, ProcessError> {
        Ok(self
            .executions
            .finish(execution_id, &infrastructure_failure(reason))
            .await?)
    }
}

fn infrastructure_failure(message: &str) -> ExecutionOutcome {
    ExecutionOutcome {
        status: ExecutionStatus::Failed,
        stdout: String::new(),
        stderr: String::new(),
        exit_code: FAILURE_EXIT_CODE,
        execution_time_ms: 0,
        error_type: Some(ErrorType::InfrastructureError),
        error_message: Some(message.to_string()),
    }
}

/// Map a sandbox result onto the execution's terminal status
pub fn classify(output: &RunOutput) -> ExecutionOutcome {
    let (status, error_type) = match output.termination {
        Termination::Exited if output.exit_code == 0 => (ExecutionStatus::Completed, None),
        Termination::Exited | Termination::UnsupportedLanguage => {
            (ExecutionStatus::Failed, Some(ErrorType::RuntimeError))
        }
        Termination::TimedOut => (ExecutionStatus::Timeout, Some(ErrorType::TimeoutError)),
        Termination::OutputLimitExceeded => {
            (ExecutionStatus::Failed, Some(ErrorType::OutputLimitError))
        }
        Termination::BackendError => {
            (ExecutionStatus::Failed, Some(ErrorType::InfrastructureError))
        }
    };

    let error_message = error_type.map(|_| {
        if output.stderr.is_empty() {
            NON_ZERO_EXIT_MESSAGE.to_string()
        } else {
            output.stderr.clone()
        }
    });

    ExecutionOutcome {
        status,
        stdout: output.stdout.clone(),
        stderr: output.stderr.clone(),
        exit_code: output.exit_code,
        execution_time_ms: output.execution_time_ms as i64,
        error_type,
        error_message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderun_sandbox::TERMINATION_MARKER;

    fn output(termination: Termination, exit_code: i32, stderr: &str) -> RunOutput {
        RunOutput {
            stdout: "out".to_string(),
            stderr: stderr.to_string(),
            exit_code,
            execution_time_ms: 7,
            termination,
        }
    }

    #[test]
    fn test_classify_success() {
        let outcome = classify(&output(Termination::Exited, 0, ""));
        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(outcome.error_type, None);
        assert_eq!(outcome.error_message, None);
        assert_eq!(outcome.stdout, "out");
        assert_eq!(outcome.execution_time_ms, 7);
    }

    #[test]
    fn test_classify_non_zero_exit() {
        let outcome = classify(&output(Termination::Exited, 2, "Traceback"));
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert_eq!(outcome.error_type, Some(ErrorType::RuntimeError));
        assert_eq!(outcome.error_message.as_deref(), Some("Traceback"));

        let silent = classify(&output(Termination::Exited, 3, ""));
        assert_eq!(silent.error_message.as_deref(), Some(NON_ZERO_EXIT_MESSAGE));
    }

    #[test]
    fn test_classify_forced_terminations() {
        let timed_out = classify(&output(Termination::TimedOut, 124, TERMINATION_MARKER));
        assert_eq!(timed_out.status, ExecutionStatus::Timeout);
        assert_eq!(timed_out.error_type, Some(ErrorType::TimeoutError));
        assert_eq!(timed_out.exit_code, 124);

        let flooded = classify(&output(
            Termination::OutputLimitExceeded,
            124,
            TERMINATION_MARKER,
        ));
        assert_eq!(flooded.status, ExecutionStatus::Failed);
        assert_eq!(flooded.error_type, Some(ErrorType::OutputLimitError));
    }

    #[test]
    fn test_classify_rejections() {
        let unsupported = classify(&output(
            Termination::UnsupportedLanguage,
            1,
            "Unsupported language: ruby",
        ));
        assert_eq!(unsupported.status, ExecutionStatus::Failed);
        assert_eq!(unsupported.error_type, Some(ErrorType::RuntimeError));

        let backend = classify(&output(Termination::BackendError, 1, "no such image"));
        assert_eq!(backend.error_type, Some(ErrorType::InfrastructureError));
        assert_eq!(backend.error_message.as_deref(), Some("no such image"));
    }

    #[test]
    fn test_only_missing_execution_is_final() {
        assert!(!ProcessError::MissingExecution("exec-1".to_string()).is_retryable());
        assert!(ProcessError::Sandbox(SandboxError::Unavailable("down".to_string())).is_retryable());
    }
}
