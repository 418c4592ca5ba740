//! Scheduler (spec §4.4): translates chat-level sync policy into jobs and
//! enqueues follow-ups. Grounded on the teacher's `TaskManager::start`
//! enable-flag-gated startup sequence in `tasks/mod.rs`.

use crate::error::JobResult;
use crate::jobs::{JobType, NewSyncJob, SyncJob, SyncJobService};
use crate::store::{ChatSyncStateStore, ChatType, SyncPriority};
use tracing::info;

/// Chat-level sync policy (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatPolicy {
    pub priority: SyncPriority,
    pub sync_enabled: bool,
}

pub fn policy_for(chat_type: ChatType, member_count: Option<i64>) -> ChatPolicy {
    match chat_type {
        ChatType::Private => ChatPolicy { priority: SyncPriority::High, sync_enabled: true },
        ChatType::Group | ChatType::Supergroup => {
            let members = member_count.unwrap_or(0);
            if members < 20 {
                ChatPolicy { priority: SyncPriority::High, sync_enabled: true }
            } else if members <= 100 {
                ChatPolicy { priority: SyncPriority::Medium, sync_enabled: true }
            } else {
                ChatPolicy { priority: SyncPriority::Low, sync_enabled: false }
            }
        }
        ChatType::Channel => ChatPolicy { priority: SyncPriority::Low, sync_enabled: false },
    }
}

#[derive(Clone)]
pub struct Scheduler {
    jobs: SyncJobService,
    chats: ChatSyncStateStore,
}

impl Scheduler {
    pub fn new(jobs: SyncJobService, chats: ChatSyncStateStore) -> Self {
        Self { jobs, chats }
    }

    /// `recoverCrashedJobs`, then seed `InitialLoad`/`BackwardHistory` jobs
    /// for every already-known enabled chat (spec §4.4). Runs exactly once,
    /// before any worker begins.
    pub async fn initialize_for_startup(&self) -> JobResult<()> {
        let recovered = self.jobs.recover_crashed_jobs().await?;
        if recovered > 0 {
            info!(recovered, "recovered crashed jobs at startup");
        }

        let enabled = self.chats.list_enabled().await.map_err(crate::error::JobError::from)?;
        for chat in &enabled {
            if chat.forward_cursor.is_none() {
                self.queue_initial_load(chat.chat_id, chat.sync_priority).await?;
            }
            if !chat.history_complete {
                self.queue_backward_history(chat.chat_id, chat.sync_priority).await?;
            }
        }
        Ok(())
    }

    pub async fn queue_forward_catchup(&self, chat_id: i64, priority: SyncPriority) -> JobResult<Option<SyncJob>> {
        self.queue_if_idle(chat_id, JobType::ForwardCatchup, priority).await
    }

    pub async fn queue_backward_history(&self, chat_id: i64, priority: SyncPriority) -> JobResult<Option<SyncJob>> {
        self.queue_if_idle(chat_id, JobType::BackwardHistory, priority).await
    }

    pub async fn queue_initial_load(&self, chat_id: i64, priority: SyncPriority) -> JobResult<Option<SyncJob>> {
        self.queue_if_idle(chat_id, JobType::InitialLoad, priority).await
    }

    /// Idempotent with respect to `hasActiveJobForChat` (spec §4.4).
    async fn queue_if_idle(&self, chat_id: i64, job_type: JobType, priority: SyncPriority) -> JobResult<Option<SyncJob>> {
        if self.jobs.has_active_job_for_chat(chat_id, job_type).await? {
            return Ok(None);
        }
        let job = self
            .jobs
            .create(NewSyncJob { chat_id, job_type, priority: priority.as_i32() })
            .await?;
        Ok(Some(job))
    }

    pub async fn get_next_job(&self) -> JobResult<Option<SyncJob>> {
        self.jobs.claim_next_job().await
    }

    pub async fn cleanup(&self, age_ms: i64) -> JobResult<(u64, u64)> {
        let completed = self.jobs.cleanup_completed(age_ms).await?;
        let failed = self.jobs.cleanup_failed(age_ms).await?;
        Ok((completed, failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::init_cache_schema;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    #[test]
    fn private_chats_are_high_priority_and_enabled() {
        let policy = policy_for(ChatType::Private, None);
        assert_eq!(policy.priority, SyncPriority::High);
        assert!(policy.sync_enabled);
    }

    #[test]
    fn small_group_is_high_priority() {
        let policy = policy_for(ChatType::Group, Some(5));
        assert_eq!(policy.priority, SyncPriority::High);
        assert!(policy.sync_enabled);
    }

    #[test]
    fn medium_group_is_medium_priority() {
        let policy = policy_for(ChatType::Supergroup, Some(50));
        assert_eq!(policy.priority, SyncPriority::Medium);
        assert!(policy.sync_enabled);
    }

    #[test]
    fn large_group_is_disabled() {
        let policy = policy_for(ChatType::Group, Some(500));
        assert_eq!(policy.priority, SyncPriority::Low);
        assert!(!policy.sync_enabled);
    }

    #[test]
    fn channel_is_always_disabled() {
        let policy = policy_for(ChatType::Channel, Some(3));
        assert!(!policy.sync_enabled);
    }

    async fn setup() -> SqlitePool {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        init_cache_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn queueing_twice_is_idempotent() {
        let pool = setup().await;
        let scheduler = Scheduler::new(SyncJobService::new(pool.clone()), ChatSyncStateStore::new(pool));

        let first = scheduler.queue_initial_load(100, SyncPriority::High).await.unwrap();
        assert!(first.is_some());
        let second = scheduler.queue_initial_load(100, SyncPriority::High).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn startup_seeds_initial_load_and_backward_history() {
        let pool = setup().await;
        let chats = ChatSyncStateStore::new(pool.clone());
        chats.seed(100, ChatType::Private, None, SyncPriority::High, true).await.unwrap();

        let scheduler = Scheduler::new(SyncJobService::new(pool), chats);
        scheduler.initialize_for_startup().await.unwrap();

        let first = scheduler.get_next_job().await.unwrap().unwrap();
        let second = scheduler.get_next_job().await.unwrap().unwrap();
        let mut types = vec![first.job_type, second.job_type];
        types.sort_by_key(|t| t.as_str());
        assert_eq!(types, vec![JobType::BackwardHistory, JobType::InitialLoad]);
    }
}
