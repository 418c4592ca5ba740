//! `RateLimitedClient`: wraps every outbound RPC behind the persisted
//! flood-wait check plus an in-memory burst gate (spec §4.1). Grounded on
//! the teacher's layered-wrapper pattern over `MemoryStore` implementors.

use crate::rate_limit::RateLimiter;
use crate::remote::{RawRequest, RawResponse, RemoteClient, RemoteError, RemoteUpdate};
use crate::store::ApiActivity;
use async_trait::async_trait;
use chrono::Utc;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

pub struct RateLimitedClient {
    inner: Arc<dyn RemoteClient>,
    limiter: Arc<RateLimiter>,
    /// Local burst guard against a caller hammering one method in a tight
    /// loop; the persisted per-method window in `rate_limits` (populated by
    /// `record_call`) remains the durable source of truth across restarts.
    burst: DefaultKeyedRateLimiter<String>,
}

impl RateLimitedClient {
    /// Wrap `inner` unless it is already a `RateLimitedClient` (spec §8:
    /// "wrapping an already-wrapped client MUST NOT double-record calls").
    pub fn wrap(inner: Arc<dyn RemoteClient>, limiter: Arc<RateLimiter>) -> Arc<dyn RemoteClient> {
        if inner.is_rate_limited() {
            return inner;
        }
        let quota = Quota::per_second(NonZeroU32::new(5).unwrap()).allow_burst(NonZeroU32::new(10).unwrap());
        Arc::new(Self {
            inner,
            limiter,
            burst: governor::RateLimiter::keyed(quota),
        })
    }
}

#[async_trait]
impl RemoteClient for RateLimitedClient {
    async fn connect(&self) -> Result<(), RemoteError> {
        self.inner.connect().await
    }

    async fn resolve_self(&self) -> Result<i64, RemoteError> {
        self.inner.resolve_self().await
    }

    async fn call(&self, request: RawRequest) -> Result<RawResponse, RemoteError> {
        let method = request.method.clone();

        if self.limiter.is_blocked(&method).await.unwrap_or(false) {
            let wait_seconds = self.limiter.get_wait_time(&method).await.unwrap_or(0);
            return Err(RemoteError::RateLimited { method, wait_seconds });
        }

        if let Err(not_until) = self.burst.check_key(&method) {
            let wait_seconds = not_until.wait_time_from(DefaultClock::default().now()).as_secs().max(1);
            return Err(RemoteError::RateLimited { method, wait_seconds });
        }

        let started = Instant::now();
        let _ = self.limiter.record_call(&method).await;
        let result = self.inner.call(request).await;
        let response_ms = started.elapsed().as_millis() as i64;

        match &result {
            Ok(_) => {
                let _ = self
                    .limiter
                    .log_activity(ApiActivity {
                        ts: Utc::now().timestamp(),
                        method,
                        success: true,
                        error_code: None,
                        response_ms: Some(response_ms),
                        context: None,
                    })
                    .await;
            }
            Err(error) => {
                if let Some(seconds) = error.flood_wait_seconds() {
                    let _ = self.limiter.set_flood_wait(&method, seconds).await;
                }
                let _ = self
                    .limiter
                    .log_activity(ApiActivity {
                        ts: Utc::now().timestamp(),
                        method,
                        success: false,
                        error_code: Some(error.to_string()),
                        response_ms: Some(response_ms),
                        context: None,
                    })
                    .await;
            }
        }

        result
    }

    fn subscribe_updates(&self) -> mpsc::Receiver<RemoteUpdate> {
        self.inner.subscribe_updates()
    }

    fn is_rate_limited(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::init_cache_schema;
    use crate::store::RateLimitStore;
    use parking_lot::Mutex;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    struct CountingClient {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl RemoteClient for CountingClient {
        async fn connect(&self) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn resolve_self(&self) -> Result<i64, RemoteError> {
            Ok(1)
        }
        async fn call(&self, _request: RawRequest) -> Result<RawResponse, RemoteError> {
            *self.calls.lock() += 1;
            Ok(RawResponse { value: json!({}) })
        }
        fn subscribe_updates(&self) -> mpsc::Receiver<RemoteUpdate> {
            mpsc::channel(1).1
        }
    }

    async fn limiter() -> Arc<RateLimiter> {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        init_cache_schema(&pool).await.unwrap();
        Arc::new(RateLimiter::new(RateLimitStore::new(pool), Default::default()))
    }

    #[tokio::test]
    async fn double_wrap_is_a_no_op() {
        let client: Arc<dyn RemoteClient> = Arc::new(CountingClient { calls: Mutex::new(0) });
        let once = RateLimitedClient::wrap(client, limiter().await);
        let twice = RateLimitedClient::wrap(once, limiter().await);
        assert!(twice.is_rate_limited());
    }

    #[tokio::test]
    async fn blocked_method_rejects_without_touching_inner_client() {
        let client: Arc<dyn RemoteClient> = Arc::new(CountingClient { calls: Mutex::new(0) });
        let rl = limiter().await;
        rl.set_flood_wait("messages.getHistory", 42).await.unwrap();
        let wrapped = RateLimitedClient::wrap(client, rl);

        let result = wrapped
            .call(RawRequest { method: "messages.getHistory".into(), params: json!({}) })
            .await;
        assert!(matches!(result, Err(RemoteError::RateLimited { wait_seconds, .. }) if wait_seconds > 0));
    }
}
