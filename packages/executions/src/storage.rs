// ABOUTME: Execution record storage layer using SQLite
// ABOUTME: Every update after creation is guarded so terminal records are never rewritten

use chrono::Utc;
use coderun_storage::{
    format_timestamp, is_unique_violation, parse_optional_timestamp, parse_timestamp,
    StorageError, StorageResult,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::types::{ErrorType, Execution, ExecutionOutcome, ExecutionStatus, NewExecution};

pub struct ExecutionStorage {
    pool: SqlitePool,
}

impl ExecutionStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a QUEUED record on the given connection.
    ///
    /// Returns [`StorageError::DuplicateSubmission`] when another record
    /// already holds the idempotency key. Nothing is read back, so this is
    /// safe as the first statement of a write transaction.
    pub async fn insert_in(
        &self,
        conn: &mut SqliteConnection,
        new: &NewExecution,
    ) -> StorageResult<Execution> {
        let execution_id = format!("exec-{}", nanoid::nanoid!());
        let now = Utc::now();

        debug!(
            "Creating execution: {} for session: {}",
            execution_id, new.session_id
        );

        let result = sqlx::query(
            r#"
            INSERT INTO executions (
                id, session_id, status, source_code_snapshot, language,
                attempt, max_attempts, idempotency_key, queued_at
            ) VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)
            "#,
        )
        .bind(&execution_id)
        .bind(&new.session_id)
        .bind(ExecutionStatus::Queued.as_str())
        .bind(&new.source_code)
        .bind(&new.language)
        .bind(new.max_attempts as i64)
        .bind(&new.idempotency_key)
        .bind(format_timestamp(now))
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) && new.idempotency_key.is_some() => {
                return Err(StorageError::DuplicateSubmission(
                    new.idempotency_key.clone().unwrap_or_default(),
                ));
            }
            Err(e) => return Err(StorageError::Database(e)),
        }

        Ok(Execution {
            id: execution_id,
            session_id: new.session_id.clone(),
            status: ExecutionStatus::Queued,
            source_code_snapshot: new.source_code.clone(),
            language: new.language.clone(),
            stdout: None,
            stderr: None,
            exit_code: None,
            execution_time_ms: None,
            attempt: 1,
            max_attempts: new.max_attempts,
            idempotency_key: new.idempotency_key.clone(),
            error_type: None,
            error_message: None,
            // Round-trip through storage precision
            queued_at: parse_timestamp(&format_timestamp(now))?,
            started_at: None,
            finished_at: None,
        })
    }

    pub async fn get_execution(&self, execution_id: &str) -> StorageResult<Option<Execution>> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_execution).transpose()
    }

    pub async fn find_by_idempotency_key(&self, key: &str) -> StorageResult<Option<Execution>> {
        let row = sqlx::query("SELECT * FROM executions WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_execution).transpose()
    }

    /// All executions of a session, newest first
    pub async fn list_for_session(&self, session_id: &str) -> StorageResult<Vec<Execution>> {
        let rows = sqlx::query(
            "SELECT * FROM executions WHERE session_id = ? ORDER BY queued_at DESC, rowid DESC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_execution).collect()
    }

    /// QUEUED/RUNNING → RUNNING for delivery `attempt`.
    /// Returns `false` if the record is already terminal.
    pub async fn mark_running(&self, execution_id: &str, attempt: u32) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'RUNNING', started_at = ?, attempt = ?
            WHERE id = ? AND status IN ('QUEUED', 'RUNNING')
            "#,
        )
        .bind(format_timestamp(Utc::now()))
        .bind(attempt as i64)
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a delivery failure that will be retried; status is unchanged
    pub async fn record_delivery_error(
        &self,
        execution_id: &str,
        error_type: ErrorType,
        message: &str,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET error_type = ?, error_message = ?
            WHERE id = ? AND status IN ('QUEUED', 'RUNNING')
            "#,
        )
        .bind(error_type.as_str())
        .bind(message)
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a live record to its terminal status.
    /// Returns `false` if it was already terminal.
    pub async fn finish(
        &self,
        execution_id: &str,
        outcome: &ExecutionOutcome,
    ) -> StorageResult<bool> {
        if !outcome.status.is_terminal() {
            return Err(StorageError::InvalidStatus(format!(
                "{} is not a terminal status",
                outcome.status.as_str()
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = ?, stdout = ?, stderr = ?, exit_code = ?, execution_time_ms = ?,
                error_type = ?, error_message = ?, finished_at = ?
            WHERE id = ? AND status IN ('QUEUED', 'RUNNING')
            "#,
        )
        .bind(outcome.status.as_str())
        .bind(&outcome.stdout)
        .bind(&outcome.stderr)
        .bind(outcome.exit_code)
        .bind(outcome.execution_time_ms)
        .bind(outcome.error_type.map(|t| t.as_str()))
        .bind(&outcome.error_message)
        .bind(format_timestamp(Utc::now()))
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        debug!(
            "Execution {} finished as {} (updated: {})",
            execution_id,
            outcome.status.as_str(),
            result.rows_affected()
        );

        Ok(result.rows_affected() > 0)
    }
}

fn row_to_execution(row: &SqliteRow) -> StorageResult<Execution> {
    Ok(Execution {
        id: row.get("id"),
        session_id: row.get("session_id"),
        status: ExecutionStatus::from_str(&row.get::<String, _>("status"))?,
        source_code_snapshot: row.get("source_code_snapshot"),
        language: row.get("language"),
        stdout: row.get("stdout"),
        stderr: row.get("stderr"),
        exit_code: row.get("exit_code"),
        execution_time_ms: row.get("execution_time_ms"),
        attempt: row.get::<i64, _>("attempt") as u32,
        max_attempts: row.get::<i64, _>("max_attempts") as u32,
        idempotency_key: row.get("idempotency_key"),
        error_type: row
            .get::<Option<String>, _>("error_type")
            .as_deref()
            .map(ErrorType::from_str)
            .transpose()?,
        error_message: row.get("error_message"),
        queued_at: parse_timestamp(&row.get::<String, _>("queued_at"))?,
        started_at: parse_optional_timestamp(row.get("started_at"))?,
        finished_at: parse_optional_timestamp(row.get("finished_at"))?,
    })
}
