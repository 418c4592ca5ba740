//! Sync-Job Service (spec §4.3): the typed facade over `JobStore` that the
//! scheduler and worker talk to. Grounded on the teacher's
//! `ProjectTaskService` wrapping `ProjectTaskStore`.

use crate::error::{JobError, JobResult};
use crate::jobs::store::JobStore;
use crate::jobs::types::{JobProgress, JobStatus, JobType, NewSyncJob, SyncJob, CRASH_RECOVERY_MESSAGE};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

#[derive(Clone)]
pub struct SyncJobService {
    store: JobStore,
}

impl SyncJobService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            store: JobStore::new(pool),
        }
    }

    pub async fn create(&self, input: NewSyncJob) -> JobResult<SyncJob> {
        let job = self.store.create(&input, now()).await?;
        info!(job_id = job.id, chat_id = job.chat_id, job_type = input.job_type.as_str(), "created sync job");
        Ok(job)
    }

    pub async fn claim_next_job(&self) -> JobResult<Option<SyncJob>> {
        Ok(self.store.claim_next(now()).await?)
    }

    pub async fn mark_running(&self, id: i64) -> JobResult<bool> {
        Ok(self.store.mark_running(id, now()).await?)
    }

    pub async fn mark_completed(&self, id: i64) -> JobResult<()> {
        let ok = self.store.mark_completed(id, now()).await?;
        if !ok {
            return Err(JobError::InvalidTransition {
                id,
                from: "running",
                to: "completed",
            });
        }
        Ok(())
    }

    pub async fn mark_failed(&self, id: i64, error: &str) -> JobResult<()> {
        let ok = self.store.mark_failed(id, error, now()).await?;
        if !ok {
            return Err(JobError::InvalidTransition {
                id,
                from: "running",
                to: "failed",
            });
        }
        Ok(())
    }

    pub async fn update_progress(&self, id: i64, progress: JobProgress) -> JobResult<()> {
        self.store
            .update_progress(id, progress.cursor_start, progress.cursor_end, progress.messages_fetched)
            .await?;
        Ok(())
    }

    pub async fn has_active_job_for_chat(&self, chat_id: i64, job_type: JobType) -> JobResult<bool> {
        Ok(self.store.has_active_for_chat(chat_id, job_type).await?)
    }

    pub async fn cancel_pending_for_chat(&self, chat_id: i64) -> JobResult<u64> {
        Ok(self.store.cancel_pending_for_chat(chat_id).await?)
    }

    /// Reset all `running` rows to `pending`. Called exactly once at
    /// daemon startup, before any worker begins (spec §4.3).
    pub async fn recover_crashed_jobs(&self) -> JobResult<u64> {
        let count = self.store.recover_crashed(CRASH_RECOVERY_MESSAGE).await?;
        if count > 0 {
            info!(count, "recovered jobs left running by a previous crash");
        }
        Ok(count)
    }

    pub async fn cleanup_completed(&self, age_ms: i64) -> JobResult<u64> {
        Ok(self.store.cleanup_terminal(JobStatus::Completed, now(), age_ms).await?)
    }

    pub async fn cleanup_failed(&self, age_ms: i64) -> JobResult<u64> {
        Ok(self.store.cleanup_terminal(JobStatus::Failed, now(), age_ms).await?)
    }

    pub async fn get(&self, id: i64) -> JobResult<Option<SyncJob>> {
        Ok(self.store.get(id).await?)
    }

    pub async fn count_pending(&self) -> JobResult<i64> {
        Ok(self.store.count_by_status(JobStatus::Pending).await?)
    }

    pub async fn count_running(&self) -> JobResult<i64> {
        Ok(self.store.count_by_status(JobStatus::Running).await?)
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::chats::SyncPriority;
    use crate::store::schema::init_cache_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_cache_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn claim_order_under_mixed_priority() {
        let pool = setup().await;
        let svc = SyncJobService::new(pool);

        svc.create(NewSyncJob {
            chat_id: 100,
            job_type: JobType::BackwardHistory,
            priority: SyncPriority::Background.as_i32(),
        })
        .await
        .unwrap();
        svc.create(NewSyncJob {
            chat_id: 200,
            job_type: JobType::ForwardCatchup,
            priority: SyncPriority::Realtime.as_i32(),
        })
        .await
        .unwrap();
        svc.create(NewSyncJob {
            chat_id: 300,
            job_type: JobType::InitialLoad,
            priority: SyncPriority::Medium.as_i32(),
        })
        .await
        .unwrap();

        let first = svc.claim_next_job().await.unwrap().unwrap();
        assert_eq!(first.chat_id, 200);
        let second = svc.claim_next_job().await.unwrap().unwrap();
        assert_eq!(second.chat_id, 300);
        let third = svc.claim_next_job().await.unwrap().unwrap();
        assert_eq!(third.chat_id, 100);

        assert!(svc.claim_next_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn crash_recovery_round_trip() {
        let pool = setup().await;
        let svc = SyncJobService::new(pool);

        let job = svc
            .create(NewSyncJob {
                chat_id: 1,
                job_type: JobType::InitialLoad,
                priority: 1,
            })
            .await
            .unwrap();
        assert!(svc.mark_running(job.id).await.unwrap());

        let recovered = svc.recover_crashed_jobs().await.unwrap();
        assert_eq!(recovered, 1);

        let refreshed = svc.get(job.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, JobStatus::Pending);
        assert_eq!(refreshed.error_message.as_deref(), Some(CRASH_RECOVERY_MESSAGE));

        // Idempotent: running it again recovers nothing further.
        assert_eq!(svc.recover_crashed_jobs().await.unwrap(), 0);

        let claimed = svc.claim_next_job().await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
    }

    #[tokio::test]
    async fn invalid_transitions_return_error_without_mutating() {
        let pool = setup().await;
        let svc = SyncJobService::new(pool);

        let job = svc
            .create(NewSyncJob {
                chat_id: 1,
                job_type: JobType::InitialLoad,
                priority: 1,
            })
            .await
            .unwrap();

        // Still pending: completing it directly is not a valid transition.
        assert!(svc.mark_completed(job.id).await.is_err());

        let unchanged = svc.get(job.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn messages_fetched_accumulates() {
        let pool = setup().await;
        let svc = SyncJobService::new(pool);

        let job = svc
            .create(NewSyncJob {
                chat_id: 1,
                job_type: JobType::ForwardCatchup,
                priority: 1,
            })
            .await
            .unwrap();
        svc.mark_running(job.id).await.unwrap();

        svc.update_progress(
            job.id,
            JobProgress {
                messages_fetched: Some(30),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        svc.update_progress(
            job.id,
            JobProgress {
                messages_fetched: Some(12),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let updated = svc.get(job.id).await.unwrap().unwrap();
        assert_eq!(updated.messages_fetched, 42);
    }
}
