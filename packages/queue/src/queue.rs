// ABOUTME: SQLite implementation of the execution job queue
// ABOUTME: Claims are single UPDATE ... RETURNING statements so two workers never lease the same job

use chrono::{DateTime, Utc};
use coderun_storage::now_ms;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::job::{ClaimedJob, FailOutcome, Job, JobPayload, JobState, QueueCounts, StalledJob};
use crate::policy::QueueSettings;
use crate::{QueueError, QueueResult};

pub struct JobQueue {
    pool: SqlitePool,
    settings: QueueSettings,
}

impl JobQueue {
    pub fn new(pool: SqlitePool, settings: QueueSettings) -> Self {
        Self { pool, settings }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Enqueue a job, available immediately
    pub async fn enqueue(&self, payload: &JobPayload) -> QueueResult<i64> {
        let mut conn = self.pool.acquire().await?;
        self.enqueue_in(&mut conn, payload).await
    }

    /// Enqueue on a caller-supplied connection, typically inside a transaction
    /// that also writes the execution record
    pub async fn enqueue_in(
        &self,
        conn: &mut SqliteConnection,
        payload: &JobPayload,
    ) -> QueueResult<i64> {
        let now = now_ms();
        let body = serde_json::to_string(payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                queue, execution_id, session_id, payload, state, attempts_made,
                max_attempts, backoff_base_ms, available_at_ms, created_at_ms, updated_at_ms
            )
            VALUES (?, ?, ?, ?, 'waiting', 0, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.settings.name)
        .bind(&payload.execution_id)
        .bind(&payload.session_id)
        .bind(body)
        .bind(self.settings.retry.attempts as i64)
        .bind(self.settings.retry.backoff_base.as_millis() as i64)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let job_id = result.last_insert_rowid();
        debug!(
            "Enqueued job {} for execution {}",
            job_id, payload.execution_id
        );
        Ok(job_id)
    }

    /// Lease the oldest due job for `worker_id`, if any
    pub async fn claim(&self, worker_id: &str) -> QueueResult<Option<ClaimedJob>> {
        self.claim_at(worker_id, now_ms()).await
    }

    pub async fn claim_at(&self, worker_id: &str, now: i64) -> QueueResult<Option<ClaimedJob>> {
        let lease_expires = now.saturating_add(self.settings.lease_duration.as_millis() as i64);

        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'active',
                attempts_made = attempts_made + 1,
                lease_owner = ?,
                lease_expires_at_ms = ?,
                updated_at_ms = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = ?
                  AND (
                    (state = 'waiting' AND available_at_ms <= ?)
                    OR (state = 'active' AND lease_expires_at_ms <= ? AND attempts_made < max_attempts)
                  )
                ORDER BY available_at_ms ASC, id ASC
                LIMIT 1
            )
            RETURNING id, payload, attempts_made, max_attempts, backoff_base_ms
            "#,
        )
        .bind(worker_id)
        .bind(lease_expires)
        .bind(now)
        .bind(&self.settings.name)
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let job = ClaimedJob {
            id: row.get("id"),
            payload: serde_json::from_str(&row.get::<String, _>("payload"))?,
            attempt: row.get::<i64, _>("attempts_made") as u32,
            max_attempts: row.get::<i64, _>("max_attempts") as u32,
            backoff_base: Duration::from_millis(row.get::<i64, _>("backoff_base_ms") as u64),
            lease_owner: worker_id.to_string(),
        };

        if job.attempt > 1 {
            info!(
                "Redelivering job {} (attempt {}/{})",
                job.id, job.attempt, job.max_attempts
            );
        }

        Ok(Some(job))
    }

    /// Acknowledge a successful delivery
    pub async fn complete(&self, job: &ClaimedJob) -> QueueResult<()> {
        let now = now_ms();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'completed', lease_owner = NULL, lease_expires_at_ms = NULL,
                finished_at_ms = ?, updated_at_ms = ?
            WHERE id = ? AND state = 'active' AND lease_owner = ? AND attempts_made = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(job.id)
        .bind(&job.lease_owner)
        .bind(job.attempt as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(job.id));
        }
        Ok(())
    }

    /// Push the lease of a delivery that is still running one lease duration
    /// past now, so the job is not redelivered while its worker is alive
    pub async fn extend_lease(&self, job: &ClaimedJob) -> QueueResult<()> {
        self.extend_lease_at(job, now_ms()).await
    }

    pub async fn extend_lease_at(&self, job: &ClaimedJob, now: i64) -> QueueResult<()> {
        let lease_expires = now.saturating_add(self.settings.lease_duration.as_millis() as i64);
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at_ms = ?, updated_at_ms = ?
            WHERE id = ? AND state = 'active' AND lease_owner = ? AND attempts_made = ?
            "#,
        )
        .bind(lease_expires)
        .bind(now)
        .bind(job.id)
        .bind(&job.lease_owner)
        .bind(job.attempt as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(job.id));
        }
        debug!("Extended lease on job {} for {}", job.id, job.lease_owner);
        Ok(())
    }

    /// Record a failed delivery, scheduling a retry while attempts remain
    pub async fn fail(&self, job: &ClaimedJob, error: &str) -> QueueResult<FailOutcome> {
        self.fail_at(job, error, now_ms()).await
    }

    pub async fn fail_at(
        &self,
        job: &ClaimedJob,
        error: &str,
        now: i64,
    ) -> QueueResult<FailOutcome> {
        if job.is_final_attempt() {
            self.finish_failed(job, error, now).await?;
            warn!(
                "Job {} failed after {} attempts: {}",
                job.id, job.attempt, error
            );
            return Ok(FailOutcome::Exhausted);
        }

        let delay = job.retry_policy().delay_for(job.attempt);
        let available_at = now.saturating_add(delay.as_millis() as i64);

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'waiting', lease_owner = NULL, lease_expires_at_ms = NULL,
                available_at_ms = ?, last_error = ?, updated_at_ms = ?
            WHERE id = ? AND state = 'active' AND lease_owner = ? AND attempts_made = ?
            "#,
        )
        .bind(available_at)
        .bind(error)
        .bind(now)
        .bind(job.id)
        .bind(&job.lease_owner)
        .bind(job.attempt as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(job.id));
        }

        info!(
            "Job {} attempt {}/{} failed, retrying in {:?}: {}",
            job.id, job.attempt, job.max_attempts, delay, error
        );
        Ok(FailOutcome::Retry { delay })
    }

    /// Fail a delivery permanently, regardless of remaining attempts
    pub async fn discard(&self, job: &ClaimedJob, error: &str) -> QueueResult<()> {
        self.finish_failed(job, error, now_ms()).await?;
        warn!("Job {} discarded: {}", job.id, error);
        Ok(())
    }

    async fn finish_failed(&self, job: &ClaimedJob, error: &str, now: i64) -> QueueResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'failed', lease_owner = NULL, lease_expires_at_ms = NULL,
                last_error = ?, finished_at_ms = ?, updated_at_ms = ?
            WHERE id = ? AND state = 'active' AND lease_owner = ? AND attempts_made = ?
            "#,
        )
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(job.id)
        .bind(&job.lease_owner)
        .bind(job.attempt as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(job.id));
        }
        Ok(())
    }

    /// Move jobs whose final-attempt lease expired to failed
    pub async fn fail_stalled(&self) -> QueueResult<Vec<StalledJob>> {
        self.fail_stalled_at(now_ms()).await
    }

    pub async fn fail_stalled_at(&self, now: i64) -> QueueResult<Vec<StalledJob>> {
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'failed',
                last_error = 'lease expired with no attempts remaining',
                lease_owner = NULL, lease_expires_at_ms = NULL,
                finished_at_ms = ?, updated_at_ms = ?
            WHERE queue = ? AND state = 'active'
              AND lease_expires_at_ms <= ? AND attempts_made >= max_attempts
            RETURNING id, execution_id, attempts_made
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(&self.settings.name)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let stalled: Vec<StalledJob> = rows
            .into_iter()
            .map(|row| StalledJob {
                job_id: row.get("id"),
                execution_id: row.get("execution_id"),
                attempts_made: row.get::<i64, _>("attempts_made") as u32,
            })
            .collect();

        for job in &stalled {
            warn!(
                "Job {} for execution {} stalled on its final attempt",
                job.job_id, job.execution_id
            );
        }

        Ok(stalled)
    }

    pub async fn get_job(&self, id: i64) -> QueueResult<Job> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(QueueError::NotFound(id))?;

        row_to_job(&row)
    }

    pub async fn jobs_for_execution(&self, execution_id: &str) -> QueueResult<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE execution_id = ? ORDER BY id ASC")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_job).collect()
    }

    pub async fn counts(&self) -> QueueResult<QueueCounts> {
        let rows = sqlx::query(
            "SELECT state, COUNT(*) AS count FROM jobs WHERE queue = ? GROUP BY state",
        )
        .bind(&self.settings.name)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let count = row.get::<i64, _>("count") as u64;
            match JobState::from_str(&row.get::<String, _>("state"))? {
                JobState::Waiting => counts.waiting = count,
                JobState::Active => counts.active = count,
                JobState::Completed => counts.completed = count,
                JobState::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_job(row: &SqliteRow) -> QueueResult<Job> {
    Ok(Job {
        id: row.get("id"),
        queue: row.get("queue"),
        execution_id: row.get("execution_id"),
        session_id: row.get("session_id"),
        payload: serde_json::from_str(&row.get::<String, _>("payload"))?,
        state: JobState::from_str(&row.get::<String, _>("state"))?,
        attempts_made: row.get::<i64, _>("attempts_made") as u32,
        max_attempts: row.get::<i64, _>("max_attempts") as u32,
        available_at: from_ms(row.get("available_at_ms")),
        lease_owner: row.get("lease_owner"),
        lease_expires_at: row
            .get::<Option<i64>, _>("lease_expires_at_ms")
            .map(from_ms),
        last_error: row.get("last_error"),
        created_at: from_ms(row.get("created_at_ms")),
        finished_at: row.get::<Option<i64>, _>("finished_at_ms").map(from_ms),
    })
}
