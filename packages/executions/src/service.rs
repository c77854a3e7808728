// ABOUTME: Run submission with idempotency guarantees, plus execution queries
// ABOUTME: Record creation and job enqueue commit together or not at all

use std::sync::Arc;

use coderun_queue::{JobPayload, JobQueue};
use coderun_storage::StorageError;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::sessions::SessionProvider;
use crate::storage::ExecutionStorage;
use crate::types::{
    Execution, ExecutionView, NewExecution, SubmitRunRequest, SubmitRunResponse,
    MAX_IDEMPOTENCY_KEY_LEN,
};
use crate::{ExecutionError, ExecutionResult};

pub struct ExecutionService {
    pool: SqlitePool,
    storage: ExecutionStorage,
    sessions: Arc<dyn SessionProvider>,
    queue: Arc<JobQueue>,
}

impl ExecutionService {
    pub fn new(
        pool: SqlitePool,
        sessions: Arc<dyn SessionProvider>,
        queue: Arc<JobQueue>,
    ) -> Self {
        Self {
            storage: ExecutionStorage::new(pool.clone()),
            pool,
            sessions,
            queue,
        }
    }

    /// Submit a session's code for execution.
    ///
    /// With an idempotency key, every submission carrying that key resolves
    /// to the same execution, including concurrent ones. Only the first
    /// enqueues a job.
    pub async fn submit_run(
        &self,
        request: SubmitRunRequest,
    ) -> ExecutionResult<SubmitRunResponse> {
        if let Some(key) = &request.idempotency_key {
            validate_idempotency_key(key)?;
        }

        let session = self
            .sessions
            .get_session(&request.session_id)
            .await
            .map_err(not_found)?;

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self.storage.find_by_idempotency_key(key).await? {
                info!(
                    "Idempotency key {} already maps to execution {} ({})",
                    key,
                    existing.id,
                    existing.status.as_str()
                );
                return Ok(existing.into());
            }
        }

        let new = NewExecution {
            session_id: session.id,
            source_code: request.source_code.unwrap_or(session.source_code),
            language: session.language,
            idempotency_key: request.idempotency_key,
            max_attempts: self.queue.settings().retry.attempts,
        };

        match self.create_and_enqueue(&new).await {
            Ok(execution) => {
                info!(
                    "Queued execution {} for session {}",
                    execution.id, execution.session_id
                );
                Ok(execution.into())
            }
            Err(ExecutionError::Storage(StorageError::DuplicateSubmission(key))) => {
                // Lost the race to a concurrent submission; report the winner
                debug!("Concurrent submission won for idempotency key {}", key);
                let winner = self
                    .storage
                    .find_by_idempotency_key(&key)
                    .await?
                    .ok_or_else(|| {
                        ExecutionError::NotFound(format!("execution for idempotency key {}", key))
                    })?;
                Ok(winner.into())
            }
            Err(e) => Err(e),
        }
    }

    async fn create_and_enqueue(&self, new: &NewExecution) -> ExecutionResult<Execution> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;

        let execution = self.storage.insert_in(&mut *tx, new).await?;

        let payload = JobPayload {
            execution_id: execution.id.clone(),
            session_id: execution.session_id.clone(),
            source_code: execution.source_code_snapshot.clone(),
            language: execution.language.clone(),
        };
        self.queue.enqueue_in(&mut *tx, &payload).await?;

        tx.commit().await.map_err(StorageError::from)?;
        Ok(execution)
    }

    pub async fn get_execution(&self, execution_id: &str) -> ExecutionResult<ExecutionView> {
        self.storage
            .get_execution(execution_id)
            .await?
            .map(ExecutionView::from)
            .ok_or_else(|| ExecutionError::NotFound(format!("execution {}", execution_id)))
    }

    /// Executions of a session, newest first
    pub async fn list_executions(&self, session_id: &str) -> ExecutionResult<Vec<ExecutionView>> {
        self.sessions
            .get_session(session_id)
            .await
            .map_err(not_found)?;

        Ok(self
            .storage
            .list_for_session(session_id)
            .await?
            .into_iter()
            .map(ExecutionView::from)
            .collect())
    }
}

fn validate_idempotency_key(key: &str) -> ExecutionResult<()> {
    if key.is_empty() {
        return Err(ExecutionError::Validation(
            "idempotency key must not be empty".to_string(),
        ));
    }
    if key.chars().count() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ExecutionError::Validation(format!(
            "idempotency key must be at most {} characters",
            MAX_IDEMPOTENCY_KEY_LEN
        )));
    }
    Ok(())
}

fn not_found(error: StorageError) -> ExecutionError {
    match error {
        StorageError::NotFound(what) => ExecutionError::NotFound(what),
        other => ExecutionError::Storage(other),
    }
}
