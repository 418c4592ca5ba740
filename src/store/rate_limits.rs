//! `rate_limits` and `api_activity` tables (spec §3 RateLimitWindow, §4.1).

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub method: String,
    pub window_start: i64,
    pub call_count: i64,
    pub last_call_at: Option<i64>,
    pub flood_wait_until: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiActivity {
    pub ts: i64,
    pub method: String,
    pub success: bool,
    pub error_code: Option<String>,
    pub response_ms: Option<i64>,
    pub context: Option<String>,
}

#[derive(Clone)]
pub struct RateLimitStore {
    pool: SqlitePool,
}

impl RateLimitStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_window(&self, method: &str, window_start: i64) -> StoreResult<Option<RateLimitWindow>> {
        let row = sqlx::query(
            "SELECT method, window_start, call_count, last_call_at, flood_wait_until \
             FROM rate_limits WHERE method = ? AND window_start = ?",
        )
        .bind(method)
        .bind(window_start)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(row.map(|r| row_to_window(&r)))
    }

    /// Most recent flood-wait deadline recorded for `method`, if any is
    /// still active or was ever set (caller compares against `now`).
    pub async fn flood_wait_until(&self, method: &str) -> StoreResult<Option<i64>> {
        let row = sqlx::query(
            "SELECT flood_wait_until FROM rate_limits \
             WHERE method = ? AND flood_wait_until IS NOT NULL \
             ORDER BY window_start DESC LIMIT 1",
        )
        .bind(method)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(row.and_then(|r| r.get("flood_wait_until")))
    }

    /// Lock-free per-`(method, window)` upsert increment (spec §5).
    pub async fn record_call(&self, method: &str, window_start: i64, now: i64) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rate_limits (method, window_start, call_count, last_call_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(method, window_start) DO UPDATE SET
                call_count = call_count + 1,
                last_call_at = excluded.last_call_at
            "#,
        )
        .bind(method)
        .bind(window_start)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(())
    }

    pub async fn set_flood_wait(&self, method: &str, window_start: i64, until: i64) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rate_limits (method, window_start, call_count, flood_wait_until)
            VALUES (?, ?, 0, ?)
            ON CONFLICT(method, window_start) DO UPDATE SET
                flood_wait_until = excluded.flood_wait_until
            "#,
        )
        .bind(method)
        .bind(window_start)
        .bind(until)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(())
    }

    pub async fn log_activity(&self, activity: &ApiActivity) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO api_activity (ts, method, success, error_code, response_ms, context) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(activity.ts)
        .bind(&activity.method)
        .bind(activity.success)
        .bind(&activity.error_code)
        .bind(activity.response_ms)
        .bind(&activity.context)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(())
    }

    /// Delete activity rows older than `max_age_ms` (SPEC_FULL.md
    /// supplemental retention policy for the audit table).
    pub async fn cleanup_activity(&self, now: i64, max_age_ms: i64) -> StoreResult<u64> {
        let cutoff = now - max_age_ms / 1000;
        let result = sqlx::query("DELETE FROM api_activity WHERE ts < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(result.rows_affected())
    }
}

fn row_to_window(r: &sqlx::sqlite::SqliteRow) -> RateLimitWindow {
    RateLimitWindow {
        method: r.get("method"),
        window_start: r.get("window_start"),
        call_count: r.get("call_count"),
        last_call_at: r.get("last_call_at"),
        flood_wait_until: r.get("flood_wait_until"),
    }
}
