//! Job store: SQL operations backing the Sync-Job Service (spec §4.3).
//!
//! The atomic claim is a single `UPDATE ... WHERE id = (SELECT ...)
//! RETURNING *` run inside an explicit transaction — grounded on the
//! teacher's `memory/features/decay.rs` transaction shape (`pool.begin()`
//! / `tx.commit()`), applied here so the select-then-flip is indivisible
//! even if a future revision needs to do more work inside the same claim.

use crate::error::{StoreError, StoreResult};
use crate::jobs::types::{JobStatus, JobType, NewSyncJob, SyncJob};
use sqlx::{Row, SqlitePool};

#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, job: &NewSyncJob, now: i64) -> StoreResult<SyncJob> {
        let id = sqlx::query(
            "INSERT INTO sync_jobs (chat_id, job_type, priority, status, messages_fetched, created_at) \
             VALUES (?, ?, ?, 'pending', 0, ?)",
        )
        .bind(job.chat_id)
        .bind(job.job_type.as_str())
        .bind(job.priority)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?
        .last_insert_rowid();

        self.get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("sync_job {id}")))
    }

    pub async fn get(&self, id: i64) -> StoreResult<Option<SyncJob>> {
        let row = sqlx::query(
            r#"SELECT id, chat_id, job_type, priority, status, cursor_start, cursor_end,
               messages_fetched, error_message, created_at, started_at, completed_at
               FROM sync_jobs WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(row.map(|r| row_to_job(&r)))
    }

    /// Atomically select the pending job with the lowest priority integer,
    /// oldest `created_at` as tiebreaker, and flip it to running. Two
    /// concurrent callers are guaranteed to receive different jobs, or one
    /// receives `None` (spec §4.3).
    pub async fn claim_next(&self, now: i64) -> StoreResult<Option<SyncJob>> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        let row = sqlx::query(
            r#"UPDATE sync_jobs
               SET status = 'running', started_at = ?
               WHERE id = (
                   SELECT id FROM sync_jobs
                   WHERE status = 'pending'
                   ORDER BY priority ASC, created_at ASC
                   LIMIT 1
               )
               RETURNING id, chat_id, job_type, priority, status, cursor_start, cursor_end,
                         messages_fetched, error_message, created_at, started_at, completed_at"#,
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;

        Ok(row.map(|r| row_to_job(&r)))
    }

    /// Flip a specific job from `pending` to `running`. Returns `false`
    /// (without mutating state) if it was not `pending` — the already-
    /// claimed race (spec §7).
    pub async fn mark_running(&self, id: i64, now: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE sync_jobs SET status = 'running', started_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_completed(&self, id: i64, now: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE sync_jobs SET status = 'completed', completed_at = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_failed(&self, id: i64, error: &str, now: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE sync_jobs SET status = 'failed', error_message = ?, completed_at = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(result.rows_affected() > 0)
    }

    /// `messages_fetched` accumulates via `+=`; cursor fields are set only
    /// when provided (spec §4.3).
    pub async fn update_progress(
        &self,
        id: i64,
        cursor_start: Option<i64>,
        cursor_end: Option<i64>,
        messages_fetched_delta: Option<i64>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"UPDATE sync_jobs SET
                cursor_start = COALESCE(?, cursor_start),
                cursor_end = COALESCE(?, cursor_end),
                messages_fetched = messages_fetched + COALESCE(?, 0)
               WHERE id = ?"#,
        )
        .bind(cursor_start)
        .bind(cursor_end)
        .bind(messages_fetched_delta)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(())
    }

    pub async fn count_by_status(&self, status: JobStatus) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as c FROM sync_jobs WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(row.get("c"))
    }

    pub async fn has_active_for_chat(&self, chat_id: i64, job_type: JobType) -> StoreResult<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) as c FROM sync_jobs \
             WHERE chat_id = ? AND job_type = ? AND status IN ('pending', 'running')",
        )
        .bind(chat_id)
        .bind(job_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(row.get::<i64, _>("c") > 0)
    }

    pub async fn cancel_pending_for_chat(&self, chat_id: i64) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sync_jobs WHERE chat_id = ? AND status = 'pending'")
            .bind(chat_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;

        Ok(result.rows_affected())
    }

    /// Reset all `running` rows to `pending`, stamping `error_message` and
    /// clearing `started_at` (spec §3, §8 scenario 2). Returns the count
    /// recovered; running it twice in succession recovers 0 the second
    /// time since there is nothing left in `running`.
    pub async fn recover_crashed(&self, error_message: &str) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE sync_jobs SET status = 'pending', error_message = ?, started_at = NULL \
             WHERE status = 'running'",
        )
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(result.rows_affected())
    }

    /// Delete terminal rows older than `age_ms`. A negative `age_ms` deletes
    /// all terminal rows regardless of age — an intentional escape hatch
    /// tests rely on (spec §9 open question; see DESIGN.md).
    pub async fn cleanup_terminal(&self, status: JobStatus, now: i64, age_ms: i64) -> StoreResult<u64> {
        let result = if age_ms < 0 {
            sqlx::query("DELETE FROM sync_jobs WHERE status = ?")
                .bind(status.as_str())
                .execute(&self.pool)
                .await
        } else {
            let cutoff = now - age_ms / 1000;
            sqlx::query("DELETE FROM sync_jobs WHERE status = ? AND completed_at < ?")
                .bind(status.as_str())
                .bind(cutoff)
                .execute(&self.pool)
                .await
        }
        .map_err(StoreError::from)?;

        Ok(result.rows_affected())
    }
}

fn row_to_job(r: &sqlx::sqlite::SqliteRow) -> SyncJob {
    SyncJob {
        id: r.get("id"),
        chat_id: r.get("chat_id"),
        job_type: JobType::from_str(r.get::<String, _>("job_type").as_str()),
        priority: r.get("priority"),
        status: JobStatus::from_str(r.get::<String, _>("status").as_str()),
        cursor_start: r.get("cursor_start"),
        cursor_end: r.get("cursor_end"),
        messages_fetched: r.get("messages_fetched"),
        error_message: r.get("error_message"),
        created_at: r.get("created_at"),
        started_at: r.get("started_at"),
        completed_at: r.get("completed_at"),
    }
}
