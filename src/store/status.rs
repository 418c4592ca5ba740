//! `daemon_status` key/value table (spec §3, §6).

use crate::error::{StoreError, StoreResult};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

#[derive(Clone)]
pub struct StatusStore {
    pool: SqlitePool,
}

impl StatusStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO daemon_status (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    pub async fn set_many(&self, pairs: &[(&str, String)]) -> StoreResult<()> {
        for (key, value) in pairs {
            self.set(key, value).await?;
        }
        Ok(())
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM daemon_status WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(row.map(|r| r.get("value")))
    }

    pub async fn all(&self) -> StoreResult<HashMap<String, String>> {
        let rows = sqlx::query("SELECT key, value FROM daemon_status")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(rows.into_iter().map(|r| (r.get("key"), r.get("value"))).collect())
    }
}

/// Canonical status keys published to `daemon_status` (spec §6).
pub mod keys {
    pub const PID: &str = "daemon_pid";
    pub const STARTED_AT: &str = "daemon_started_at";
    pub const STATUS: &str = "daemon_status";
    pub const CONNECTED_ACCOUNTS: &str = "connected_accounts";
    pub const TOTAL_ACCOUNTS: &str = "total_accounts";
    pub const LAST_UPDATE: &str = "last_update";
    pub const MESSAGES_SYNCED: &str = "messages_synced";
    pub const PENDING_JOBS: &str = "pending_jobs";
    pub const RUNNING_JOBS: &str = "running_jobs";
}

pub mod values {
    pub const RUNNING: &str = "running";
    pub const STOPPED: &str = "stopped";
}
