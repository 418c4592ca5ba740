//! Per-method flood-wait bookkeeping backed by `rate_limits` (spec §4.1,
//! §3 RateLimitWindow). This is the public contract named in the spec —
//! `isBlocked`/`getWaitTime`/`recordCall`/`setFloodWait`/`logActivity` — and
//! reasons purely about the persisted flood-wait deadline; the in-memory
//! rolling-window gate lives in `RateLimitedClient` (spec §9: "standardize
//! on a result type for job execution, and an explicit RateLimitError
//! variant").

use crate::error::StoreResult;
use crate::store::{ApiActivity, RateLimitStore};
use chrono::Utc;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub window_secs: i64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { window_secs: 60 }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: RateLimitStore,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(store: RateLimitStore, config: RateLimiterConfig) -> Self {
        Self { store, config }
    }

    fn window_start(&self, now: i64) -> i64 {
        now - now.rem_euclid(self.config.window_secs.max(1))
    }

    /// `true` once a previously recorded `setFloodWait` deadline is still in
    /// the future (spec §3 RateLimitWindow invariant).
    pub async fn is_blocked(&self, method: &str) -> StoreResult<bool> {
        let now = now();
        match self.store.flood_wait_until(method).await? {
            Some(until) => Ok(until > now),
            None => Ok(false),
        }
    }

    pub async fn get_wait_time(&self, method: &str) -> StoreResult<u64> {
        let now = now();
        match self.store.flood_wait_until(method).await? {
            Some(until) if until > now => Ok((until - now) as u64),
            _ => Ok(0),
        }
    }

    pub async fn record_call(&self, method: &str) -> StoreResult<()> {
        let now = now();
        self.store.record_call(method, self.window_start(now), now).await
    }

    pub async fn set_flood_wait(&self, method: &str, seconds: u64) -> StoreResult<()> {
        let now = now();
        self.store
            .set_flood_wait(method, self.window_start(now), now + seconds as i64)
            .await
    }

    pub async fn log_activity(&self, activity: ApiActivity) -> StoreResult<()> {
        self.store.log_activity(&activity).await
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::init_cache_schema;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn setup() -> SqlitePool {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        init_cache_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn unset_method_is_never_blocked() {
        let pool = setup().await;
        let limiter = RateLimiter::new(RateLimitStore::new(pool), RateLimiterConfig::default());
        assert!(!limiter.is_blocked("messages.getHistory").await.unwrap());
        assert_eq!(limiter.get_wait_time("messages.getHistory").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn flood_wait_blocks_until_it_elapses() {
        let pool = setup().await;
        let limiter = RateLimiter::new(RateLimitStore::new(pool), RateLimiterConfig::default());

        limiter.set_flood_wait("messages.getHistory", 42).await.unwrap();
        assert!(limiter.is_blocked("messages.getHistory").await.unwrap());
        let wait = limiter.get_wait_time("messages.getHistory").await.unwrap();
        assert!(wait > 0 && wait <= 42);
    }

    #[tokio::test]
    async fn record_call_does_not_itself_block() {
        let pool = setup().await;
        let limiter = RateLimiter::new(RateLimitStore::new(pool), RateLimiterConfig::default());
        for _ in 0..5 {
            limiter.record_call("messages.getHistory").await.unwrap();
        }
        assert!(!limiter.is_blocked("messages.getHistory").await.unwrap());
    }
}
