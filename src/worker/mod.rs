//! Sync Worker (spec §4.5): executes one job against a `RemoteClient`. One
//! worker per connected account; each owns a client and shares the store.

use crate::jobs::{JobProgress, JobStatus, JobType, SyncJob, SyncJobService};
use crate::parser::{parse_raw_chat, parse_raw_message, parse_raw_user};
use crate::rate_limit::RateLimiter;
use crate::remote::{build_history_request, parse_history_response, HistoryRequest, InputPeer, RemoteClient};
use crate::store::{ChatSyncStateStore, ChatType, MessageStore, PeerCacheStore, SyncDirection};
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

/// The RPC method fetchHistory issues, used for the worker's proactive
/// rate-limit check (spec §4.5 step 2).
const HISTORY_METHOD: &str = "messages.getHistory";

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Completed { messages_fetched: u32, has_more: bool },
    RateLimited { wait_seconds: u64 },
    Failed { error: String },
    /// The job was already claimed by another caller before this worker
    /// reached it — exit without mutating state (spec §7).
    Skipped,
}

#[derive(Clone)]
pub struct SyncWorker {
    client: Arc<dyn RemoteClient>,
    rate_limiter: Arc<RateLimiter>,
    messages: MessageStore,
    chats: ChatSyncStateStore,
    peers: PeerCacheStore,
    jobs: SyncJobService,
    batch_size: u32,
}

impl SyncWorker {
    pub fn new(
        client: Arc<dyn RemoteClient>,
        rate_limiter: Arc<RateLimiter>,
        messages: MessageStore,
        chats: ChatSyncStateStore,
        peers: PeerCacheStore,
        jobs: SyncJobService,
        batch_size: u32,
    ) -> Self {
        Self { client, rate_limiter, messages, chats, peers, jobs, batch_size }
    }

    pub async fn run_job(&self, job: &SyncJob) -> WorkerOutcome {
        if job.status == JobStatus::Pending {
            match self.jobs.mark_running(job.id).await {
                Ok(true) => {}
                _ => return WorkerOutcome::Skipped,
            }
        }

        if self.rate_limiter.is_blocked(HISTORY_METHOD).await.unwrap_or(false) {
            let wait_seconds = self.rate_limiter.get_wait_time(HISTORY_METHOD).await.unwrap_or(0);
            let message = format!("Rate limited: wait {wait_seconds}s");
            let _ = self.jobs.mark_failed(job.id, &message).await;
            return WorkerOutcome::RateLimited { wait_seconds };
        }

        let peer = match self.build_input_peer(job.chat_id).await {
            Ok(peer) => peer,
            Err(message) => return self.fail(job, message).await,
        };

        let state = match self.chats.get(job.chat_id).await {
            Ok(Some(state)) => state,
            Ok(None) => return self.fail(job, format!("no chat_sync_state row for chat {}", job.chat_id)).await,
            Err(error) => return self.fail(job, error.to_string()).await,
        };

        if job.job_type == JobType::BackwardHistory && state.history_complete {
            let _ = self.jobs.mark_completed(job.id).await;
            return WorkerOutcome::Completed { messages_fetched: 0, has_more: false };
        }

        let request = match job.job_type {
            JobType::ForwardCatchup => HistoryRequest { min_id: state.forward_cursor, offset_id: None, limit: self.batch_size },
            JobType::BackwardHistory => HistoryRequest { min_id: None, offset_id: state.backward_cursor, limit: self.batch_size },
            JobType::InitialLoad | JobType::FullSync => HistoryRequest { min_id: None, offset_id: None, limit: self.batch_size },
        };

        let raw_request = build_history_request(&peer, &request);
        let response = match self.client.call(raw_request).await {
            Ok(response) => response,
            Err(error) => {
                if let Some(wait_seconds) = error.flood_wait_seconds() {
                    let _ = self.rate_limiter.set_flood_wait(HISTORY_METHOD, wait_seconds).await;
                    return WorkerOutcome::RateLimited { wait_seconds };
                }
                return self.fail(job, error.to_string()).await;
            }
        };

        let page = parse_history_response(&response);
        let fetched_at = Utc::now().timestamp();

        self.cache_entities(&page, fetched_at).await;

        let mut rows = Vec::with_capacity(page.messages.len());
        for raw in &page.messages {
            match parse_raw_message(raw, job.chat_id, fetched_at) {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => {}
                Err(error) => warn!(chat_id = job.chat_id, %error, "dropping unparseable message"),
            }
        }

        if let Err(error) = self.messages.upsert_batch(&rows).await {
            return self.fail(job, error.to_string()).await;
        }

        let ids: Vec<i64> = rows.iter().map(|r| r.message_id).collect();
        let min_id = ids.iter().copied().min();
        let max_id = ids.iter().copied().max();
        let batch_full = page.messages.len() as u32 >= self.batch_size;

        let has_more = match self.apply_cursors(job, &state, min_id, max_id, batch_full, &page).await {
            Ok(has_more) => has_more,
            Err(message) => return self.fail(job, message).await,
        };

        if let Err(error) = self.chats.increment_synced_messages(job.chat_id, rows.len() as i64).await {
            return self.fail(job, error.to_string()).await;
        }
        let direction = match job.job_type {
            JobType::BackwardHistory => SyncDirection::Backward,
            _ => SyncDirection::Forward,
        };
        if let Err(error) = self.chats.update_last_sync(job.chat_id, direction, fetched_at).await {
            return self.fail(job, error.to_string()).await;
        }

        if let Err(error) = self
            .jobs
            .update_progress(
                job.id,
                JobProgress { cursor_start: min_id, cursor_end: max_id, messages_fetched: Some(rows.len() as i64) },
            )
            .await
        {
            return self.fail(job, error.to_string()).await;
        }

        if let Err(error) = self.jobs.mark_completed(job.id).await {
            return self.fail(job, error.to_string()).await;
        }

        WorkerOutcome::Completed { messages_fetched: rows.len() as u32, has_more }
    }

    /// Upsert the `users`/`chats` entities a history page carries alongside
    /// its messages (spec §3 `users_cache`/`chats_cache`; SPEC_FULL.md
    /// supplemental feature) so a later job's `build_input_peer` can resolve
    /// an access_hash without ever having seen the chat's own messages.
    async fn cache_entities(&self, page: &crate::remote::HistoryPage, now: i64) {
        for raw in &page.users {
            if let Some(user) = parse_raw_user(raw) {
                if let Err(error) = self
                    .peers
                    .upsert_user(user.user_id, user.access_hash, user.username.as_deref(), user.phone.as_deref(), user.first_name.as_deref(), user.last_name.as_deref(), now)
                    .await
                {
                    warn!(user_id = user.user_id, %error, "failed to cache user entity");
                }
            }
        }
        for raw in &page.chats {
            if let Some(chat) = parse_raw_chat(raw) {
                if let Err(error) = self.peers.upsert_chat(chat.chat_id, chat.chat_type, chat.access_hash, chat.title.as_deref(), now).await {
                    warn!(chat_id = chat.chat_id, %error, "failed to cache chat entity");
                }
            }
        }
    }

    /// Advance cursors per job type (spec §4.5 steps 7-10) and return
    /// `hasMore` for the daemon loop's follow-up decision.
    async fn apply_cursors(
        &self,
        job: &SyncJob,
        _state: &crate::store::ChatSyncState,
        min_id: Option<i64>,
        max_id: Option<i64>,
        batch_full: bool,
        page: &crate::remote::HistoryPage,
    ) -> Result<bool, String> {
        match job.job_type {
            JobType::ForwardCatchup => {
                if let Some(max_id) = max_id {
                    self.chats.advance_forward_cursor(job.chat_id, max_id).await.map_err(|e| e.to_string())?;
                }
                Ok(batch_full)
            }
            JobType::BackwardHistory => {
                if let Some(min_id) = min_id {
                    self.chats.advance_backward_cursor(job.chat_id, min_id).await.map_err(|e| e.to_string())?;
                }
                let complete = min_id == Some(1) || !batch_full || !page.has_more;
                if complete {
                    self.chats.set_history_complete(job.chat_id, true).await.map_err(|e| e.to_string())?;
                }
                Ok(!complete)
            }
            JobType::InitialLoad => {
                self.chats.set_cursors(job.chat_id, max_id, min_id).await.map_err(|e| e.to_string())?;
                if !batch_full {
                    self.chats.set_history_complete(job.chat_id, true).await.map_err(|e| e.to_string())?;
                }
                Ok(batch_full)
            }
            JobType::FullSync => {
                self.chats.set_cursors(job.chat_id, max_id, min_id).await.map_err(|e| e.to_string())?;
                // Always asserts hasMore so the follow-up loop continues
                // (spec §4.5 step 10; see DESIGN.md open-question decision).
                Ok(true)
            }
        }
    }

    async fn fail(&self, job: &SyncJob, message: String) -> WorkerOutcome {
        let _ = self.jobs.mark_failed(job.id, &message).await;
        WorkerOutcome::Failed { error: message }
    }

    /// Build an `InputPeer` from the chats/users cache (spec §4.5 step 3).
    async fn build_input_peer(&self, chat_id: i64) -> Result<InputPeer, String> {
        if chat_id > 0 {
            let access_hash = self
                .peers
                .get_user(chat_id)
                .await
                .ok()
                .flatten()
                .and_then(|u| u.access_hash)
                .unwrap_or(0);
            return Ok(InputPeer::User { user_id: chat_id, access_hash });
        }

        match self.peers.get_chat(chat_id).await {
            Ok(Some(cached)) => match cached.chat_type {
                ChatType::Group => Ok(InputPeer::Chat { chat_id }),
                _ => Ok(InputPeer::Channel { channel_id: chat_id, access_hash: cached.access_hash.unwrap_or(0) }),
            },
            _ => Err("Could not build InputPeer".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::NewSyncJob;
    use crate::remote::{RawRequest, RawResponse, RemoteError, RemoteUpdate};
    use crate::store::schema::init_cache_schema;
    use crate::store::{RateLimitStore, SyncPriority};
    use async_trait::async_trait;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use tokio::sync::mpsc;

    struct StubClient {
        response: RawResponse,
    }

    #[async_trait]
    impl RemoteClient for StubClient {
        async fn connect(&self) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn resolve_self(&self) -> Result<i64, RemoteError> {
            Ok(1)
        }
        async fn call(&self, _request: RawRequest) -> Result<RawResponse, RemoteError> {
            Ok(self.response.clone())
        }
        fn subscribe_updates(&self) -> mpsc::Receiver<RemoteUpdate> {
            mpsc::channel(1).1
        }
    }

    fn message(id: i64) -> serde_json::Value {
        json!({"_": "message", "id": id, "message": format!("msg {id}")})
    }

    async fn setup() -> SqlitePool {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        init_cache_schema(&pool).await.unwrap();
        pool
    }

    async fn worker_with(pool: SqlitePool, response: serde_json::Value, batch_size: u32) -> (SyncWorker, SyncJobService) {
        let jobs = SyncJobService::new(pool.clone());
        let chats = ChatSyncStateStore::new(pool.clone());
        let peers = PeerCacheStore::new(pool.clone());
        let messages = MessageStore::new(pool.clone());
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitStore::new(pool), Default::default()));
        let client: Arc<dyn RemoteClient> = Arc::new(StubClient { response: RawResponse { value: response } });
        let worker = SyncWorker::new(client, rate_limiter, messages, chats, peers, jobs.clone(), batch_size);
        (worker, jobs)
    }

    #[tokio::test]
    async fn forward_catchup_advances_cursor_and_completes() {
        let pool = setup().await;
        let chats = ChatSyncStateStore::new(pool.clone());
        chats.seed(100, ChatType::Private, None, SyncPriority::High, true).await.unwrap();

        let response = json!({"messages": [message(5), message(6)], "has_more": false});
        let (worker, jobs) = worker_with(pool.clone(), response, 100).await;
        let job = jobs
            .create(NewSyncJob { chat_id: 100, job_type: JobType::ForwardCatchup, priority: 1 })
            .await
            .unwrap();

        let outcome = worker.run_job(&job).await;
        assert_eq!(outcome, WorkerOutcome::Completed { messages_fetched: 2, has_more: false });

        let state = chats.get(100).await.unwrap().unwrap();
        assert_eq!(state.forward_cursor, Some(6));
    }

    #[tokio::test]
    async fn accompanying_entities_are_cached_for_input_peer_resolution() {
        let pool = setup().await;
        let chats = ChatSyncStateStore::new(pool.clone());
        chats.seed(100, ChatType::Private, None, SyncPriority::High, true).await.unwrap();

        let response = json!({
            "messages": [message(5)],
            "users": [{"_": "user", "id": 42, "access_hash": 111, "username": "alice"}],
            "chats": [{"_": "channel", "id": 77, "access_hash": 222, "megagroup": true, "title": "crew"}],
            "has_more": false,
        });
        let (worker, jobs) = worker_with(pool.clone(), response, 100).await;
        let job = jobs
            .create(NewSyncJob { chat_id: 100, job_type: JobType::ForwardCatchup, priority: 1 })
            .await
            .unwrap();
        worker.run_job(&job).await;

        let peers = PeerCacheStore::new(pool);
        let user = peers.get_user(42).await.unwrap().unwrap();
        assert_eq!(user.access_hash, Some(111));
        let cached_chat = peers.get_chat(-(1_000_000_000_000 + 77)).await.unwrap().unwrap();
        assert_eq!(cached_chat.access_hash, Some(222));
        assert_eq!(cached_chat.chat_type, ChatType::Supergroup);
    }

    #[tokio::test]
    async fn backward_history_completes_on_partial_batch() {
        let pool = setup().await;
        let chats = ChatSyncStateStore::new(pool.clone());
        chats.seed(100, ChatType::Group, Some(5), SyncPriority::High, true).await.unwrap();

        let response = json!({"messages": [message(1), message(2)], "has_more": false});
        let (worker, jobs) = worker_with(pool.clone(), response, 100).await;
        let job = jobs
            .create(NewSyncJob { chat_id: 100, job_type: JobType::BackwardHistory, priority: 1 })
            .await
            .unwrap();

        let outcome = worker.run_job(&job).await;
        assert_eq!(outcome, WorkerOutcome::Completed { messages_fetched: 2, has_more: false });

        let state = chats.get(100).await.unwrap().unwrap();
        assert!(state.history_complete);
        assert_eq!(state.backward_cursor, Some(1));
    }

    #[tokio::test]
    async fn initial_load_sets_both_cursors() {
        let pool = setup().await;
        let chats = ChatSyncStateStore::new(pool.clone());
        chats.seed(100, ChatType::Private, None, SyncPriority::High, true).await.unwrap();

        let response = json!({"messages": [message(10), message(20)], "has_more": false});
        let (worker, jobs) = worker_with(pool.clone(), response, 100).await;
        let job = jobs
            .create(NewSyncJob { chat_id: 100, job_type: JobType::InitialLoad, priority: 1 })
            .await
            .unwrap();

        worker.run_job(&job).await;

        let state = chats.get(100).await.unwrap().unwrap();
        assert_eq!(state.forward_cursor, Some(20));
        assert_eq!(state.backward_cursor, Some(10));
        assert!(state.history_complete);
    }

    #[tokio::test]
    async fn unknown_negative_chat_id_fails_the_job() {
        let pool = setup().await;
        let chats = ChatSyncStateStore::new(pool.clone());
        chats.seed(-100, ChatType::Channel, None, SyncPriority::Low, true).await.unwrap();

        let (worker, jobs) = worker_with(pool.clone(), json!({}), 100).await;
        let job = jobs
            .create(NewSyncJob { chat_id: -100, job_type: JobType::ForwardCatchup, priority: 1 })
            .await
            .unwrap();

        let outcome = worker.run_job(&job).await;
        assert!(matches!(outcome, WorkerOutcome::Failed { error } if error == "Could not build InputPeer"));
    }

    #[tokio::test]
    async fn blocked_rate_limiter_fails_the_job_without_any_sql_writes() {
        let pool = setup().await;
        let chats = ChatSyncStateStore::new(pool.clone());
        chats.seed(100, ChatType::Private, None, SyncPriority::High, true).await.unwrap();

        let (worker, jobs) = worker_with(pool.clone(), json!({}), 100).await;
        let rate_limiter = RateLimiter::new(RateLimitStore::new(pool.clone()), Default::default());
        rate_limiter.set_flood_wait(HISTORY_METHOD, 42).await.unwrap();
        let worker = SyncWorker { rate_limiter: Arc::new(rate_limiter), ..worker };

        let job = jobs
            .create(NewSyncJob { chat_id: 100, job_type: JobType::ForwardCatchup, priority: 1 })
            .await
            .unwrap();

        let outcome = worker.run_job(&job).await;
        assert!(matches!(outcome, WorkerOutcome::RateLimited { wait_seconds } if wait_seconds > 0 && wait_seconds <= 42));

        let messages = MessageStore::new(pool.clone());
        assert_eq!(messages.count_for_chat(100).await.unwrap(), 0);
    }
}
