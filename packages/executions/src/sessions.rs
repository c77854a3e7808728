// ABOUTME: Session collaborator interface and its SQLite implementation
// ABOUTME: Only lookup, creation and the latest-execution pointer; no session CRUD surface

use async_trait::async_trait;
use chrono::Utc;
use coderun_sandbox::Language;
use coderun_storage::{format_timestamp, parse_timestamp, StorageError, StorageResult};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::types::{CodeSession, SessionStatus};

/// What the execution pipeline needs from the session owner
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Fails with [`StorageError::NotFound`] if the session does not exist
    async fn get_session(&self, session_id: &str) -> StorageResult<CodeSession>;

    /// Point the session at its most recent execution. Last writer wins.
    async fn update_latest_execution(
        &self,
        session_id: &str,
        execution_id: &str,
    ) -> StorageResult<()>;
}

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an ACTIVE session, seeded with the language's starter code
    /// unless `source_code` is given
    pub async fn create_session(
        &self,
        language: Language,
        source_code: Option<String>,
    ) -> StorageResult<CodeSession> {
        let now = format_timestamp(Utc::now());
        let session = CodeSession {
            id: format!("sess-{}", nanoid::nanoid!()),
            language: language.as_str().to_string(),
            source_code: source_code.unwrap_or_else(|| language.default_template().to_string()),
            status: SessionStatus::Active,
            latest_execution_id: None,
            created_at: parse_timestamp(&now)?,
            updated_at: parse_timestamp(&now)?,
        };

        debug!("Creating {} session: {}", session.language, session.id);

        sqlx::query(
            r#"
            INSERT INTO code_sessions (id, language, source_code, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.language)
        .bind(&session.source_code)
        .bind(session.status.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(session)
    }
}

#[async_trait]
impl SessionProvider for SqliteSessionStore {
    async fn get_session(&self, session_id: &str) -> StorageResult<CodeSession> {
        let row = sqlx::query("SELECT * FROM code_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("session {}", session_id)))?;

        row_to_session(&row)
    }

    async fn update_latest_execution(
        &self,
        session_id: &str,
        execution_id: &str,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            "UPDATE code_sessions SET latest_execution_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(execution_id)
        .bind(format_timestamp(Utc::now()))
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("session {}", session_id)));
        }
        Ok(())
    }
}

fn row_to_session(row: &SqliteRow) -> StorageResult<CodeSession> {
    Ok(CodeSession {
        id: row.get("id"),
        language: row.get("language"),
        source_code: row.get("source_code"),
        status: SessionStatus::from_str(&row.get::<String, _>("status"))?,
        latest_execution_id: row.get("latest_execution_id"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderun_storage::{open, StorageConfig};
    use tempfile::TempDir;

    async fn setup_store() -> (SqliteSessionStore, TempDir) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let pool = open(&StorageConfig::new(dir.path().join("sessions.db")))
            .await
            .expect("Failed to open database");
        (SqliteSessionStore::new(pool), dir)
    }

    #[tokio::test]
    async fn test_create_uses_default_template() {
        let (store, _dir) = setup_store().await;

        let python = store.create_session(Language::Python, None).await.unwrap();
        assert_eq!(python.source_code, r#"print("Hello World")"#);
        assert_eq!(python.status, SessionStatus::Active);

        let js = store
            .create_session(Language::JavaScript, Some("console.log(2)".to_string()))
            .await
            .unwrap();
        assert_eq!(js.source_code, "console.log(2)");

        let fetched = store.get_session(&js.id).await.unwrap();
        assert_eq!(fetched, js);
    }

    #[tokio::test]
    async fn test_missing_session_is_not_found() {
        let (store, _dir) = setup_store().await;

        assert!(matches!(
            store.get_session("sess-missing").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.update_latest_execution("sess-missing", "exec-1").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_latest_execution() {
        let (store, _dir) = setup_store().await;
        let session = store.create_session(Language::Python, None).await.unwrap();

        store
            .update_latest_execution(&session.id, "exec-1")
            .await
            .unwrap();
        store
            .update_latest_execution(&session.id, "exec-2")
            .await
            .unwrap();

        let fetched = store.get_session(&session.id).await.unwrap();
        assert_eq!(fetched.latest_execution_id.as_deref(), Some("exec-2"));
    }
}
