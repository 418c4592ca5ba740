//! Daemon lifecycle (spec §4.7): PID lock, schema init, account connect,
//! the single-threaded tick loop, and graceful shutdown. Grounded on the
//! teacher's `TaskManager` (interval-driven spawn loops in `tasks/mod.rs`)
//! for the tick cadence and on `nx-playground`'s `ShutdownCoordinator` for
//! signal handling.

mod pid;

pub use pid::PidFile;

use crate::config::DaemonConfig;
use crate::error::{DaemonError, ExitCode};
use crate::fixtures::RecordReplayClient;
use crate::jobs::SyncJobService;
use crate::rate_limit::{RateLimitedClient, RateLimiter, RateLimiterConfig};
use crate::remote::RemoteClient;
use crate::scheduler::Scheduler;
use crate::store::schema::{init_cache_schema, init_data_schema};
use crate::store::{AccountStore, ChatSyncStateStore, MessageStore, PeerCacheStore, RateLimitStore, StatusStore};
use crate::supervisor::{AccountSupervisor, ConnectOutcome};
use crate::worker::SyncWorker;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Builds a `RemoteClient` for a given account id. Supplied by `main.rs`;
/// kept generic here so the daemon loop never names a concrete MTProto
/// client implementation (spec §1, `RemoteClient` boundary).
pub type ClientFactory = Arc<dyn Fn(i64) -> Arc<dyn RemoteClient> + Send + Sync>;

pub struct Daemon {
    config: DaemonConfig,
    data_pool: SqlitePool,
    cache_pool: SqlitePool,
    status: StatusStore,
    scheduler: Scheduler,
    supervisor: AccountSupervisor,
    jobs: SyncJobService,
    rate_limiter: Arc<RateLimiter>,
    rate_limits: RateLimitStore,
    peers: PeerCacheStore,
    messages: MessageStore,
    chats: ChatSyncStateStore,
}

/// A connected account's worker and update-stream handle, live for the
/// process lifetime (spec §4.6: "one worker per connected account").
struct ConnectedAccount {
    account_id: i64,
    worker: SyncWorker,
    handle: Arc<crate::supervisor::AccountHandle>,
    last_job_at: Option<std::time::Instant>,
}

impl Daemon {
    pub async fn connect(config: DaemonConfig) -> Result<Self, DaemonError> {
        std::fs::create_dir_all(&config.paths.data_dir)?;

        let data_pool = SqlitePoolOptions::new().connect(&format!("sqlite://{}?mode=rwc", config.paths.data_db().display())).await.map_err(crate::error::StoreError::from)?;
        let cache_pool = SqlitePoolOptions::new().connect(&format!("sqlite://{}?mode=rwc", config.paths.cache_db().display())).await.map_err(crate::error::StoreError::from)?;

        init_data_schema(&data_pool).await?;
        init_cache_schema(&cache_pool).await?;

        let accounts = AccountStore::new(data_pool.clone());
        let messages = MessageStore::new(cache_pool.clone());
        let chats = ChatSyncStateStore::new(cache_pool.clone());
        let peers = PeerCacheStore::new(cache_pool.clone());
        let jobs = SyncJobService::new(cache_pool.clone());
        let rate_limits = RateLimitStore::new(cache_pool.clone());
        let rate_limiter = Arc::new(RateLimiter::new(rate_limits.clone(), RateLimiterConfig::default()));
        let status = StatusStore::new(cache_pool.clone());

        let supervisor = AccountSupervisor::new(accounts, messages.clone(), chats.clone(), config.reconnect.clone());
        let scheduler = Scheduler::new(jobs.clone(), chats.clone());

        Ok(Self {
            config,
            data_pool,
            cache_pool,
            status,
            scheduler,
            supervisor,
            jobs,
            rate_limiter,
            rate_limits,
            peers,
            messages,
            chats,
        })
    }

    /// Wraps a raw `RemoteClient` in the fixtures and rate-limit layers
    /// every call must go through (spec §4.1, §4.8).
    fn wrap_client(&self, account_id: i64, client: Arc<dyn RemoteClient>) -> Arc<dyn RemoteClient> {
        let client = RecordReplayClient::new(client, self.config.fixtures.mode, self.config.fixtures.fixtures_dir.clone(), account_id);
        RateLimitedClient::wrap(client, self.rate_limiter.clone())
    }

    /// Run the daemon to completion: connect accounts, seed jobs, tick until
    /// a shutdown signal arrives, then shut down gracefully (spec §4.7).
    pub async fn run(self, make_client: ClientFactory) -> Result<(), DaemonError> {
        self.status.set_many(&[
            (crate::store::status::keys::PID, std::process::id().to_string()),
            (crate::store::status::keys::STARTED_AT, chrono::Utc::now().timestamp().to_string()),
            (crate::store::status::keys::STATUS, crate::store::status::values::RUNNING.to_string()),
        ]).await?;

        self.scheduler.initialize_for_startup().await?;

        let wrap = |account_id: i64| self.wrap_client(account_id, make_client(account_id));
        let results = self.supervisor.connect_all(wrap).await;

        let mut connected = Vec::new();
        let mut any_configured = false;
        let total_accounts = results.len();
        for (account_id, outcome, handle) in results {
            any_configured = true;
            match outcome {
                ConnectOutcome::Connected { .. } => {
                    if let Some(handle) = handle {
                        info!(account_id, "account connected");
                        let worker = SyncWorker::new(
                            handle.client.clone(),
                            self.rate_limiter.clone(),
                            self.messages.clone(),
                            self.chats.clone(),
                            self.peers.clone(),
                            self.jobs.clone(),
                            self.config.executor.batch_size,
                        );
                        self.spawn_update_listener(&handle);
                        connected.push(ConnectedAccount { account_id, worker, handle, last_job_at: None });
                    }
                }
                ConnectOutcome::MergedAway { surviving_account_id } => {
                    info!(account_id, surviving_account_id, "account merged into an existing one, not starting a worker");
                }
                ConnectOutcome::Failed { reason, .. } => {
                    warn!(account_id, %reason, "account failed to connect");
                }
            }
        }

        if !any_configured {
            return Err(DaemonError::NoAccounts);
        }
        if connected.is_empty() {
            return Err(DaemonError::AllAccountsFailed);
        }

        self.status.set_many(&[
            (crate::store::status::keys::TOTAL_ACCOUNTS, total_accounts.to_string()),
            (crate::store::status::keys::CONNECTED_ACCOUNTS, connected.len().to_string()),
        ]).await?;

        let result = self.tick_loop(connected, make_client).await;

        self.status.set(crate::store::status::keys::STATUS, crate::store::status::values::STOPPED).await?;
        result
    }

    fn spawn_update_listener(&self, handle: &Arc<crate::supervisor::AccountHandle>) {
        let mut updates = handle.client.subscribe_updates();
        let supervisor = self.supervisor.clone();
        tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                supervisor.handle_update(update).await;
            }
        });
    }

    /// Single-threaded tick loop (spec §4.7, §5): at most one job per
    /// account per tick, `min_job_spacing` apart, with periodic health
    /// checks and terminal-job cleanup.
    async fn tick_loop(&self, mut accounts: Vec<ConnectedAccount>, make_client: ClientFactory) -> Result<(), DaemonError> {
        let shutdown = install_signal_handler();
        let mut ticker = tokio::time::interval(self.config.executor.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut tick_count: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tick_count += 1;
                    self.run_one_tick(&mut accounts).await;

                    if tick_count % self.config.executor.health_check_every_ticks == 0 {
                        self.run_health_checks(&accounts, &make_client).await;
                    }
                    if tick_count % self.config.executor.cleanup_every_ticks == 0 {
                        self.run_cleanup().await;
                    }
                }
                _ = shutdown.notified() => {
                    info!("shutdown signal received, draining");
                    break;
                }
            }
        }

        self.shutdown_gracefully().await
    }

    async fn run_one_tick(&self, accounts: &mut [ConnectedAccount]) {
        let now = std::time::Instant::now();
        for account in accounts.iter_mut() {
            if let Some(last) = account.last_job_at {
                if now.duration_since(last) < self.config.executor.min_job_spacing {
                    continue;
                }
            }

            let job = match self.scheduler.get_next_job().await {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(error) => {
                    error!(%error, "failed to claim next job");
                    continue;
                }
            };

            account.last_job_at = Some(now);
            let outcome = account.worker.run_job(&job).await;
            self.after_job(account.account_id, &job, outcome).await;
        }
    }

    /// Queue the natural follow-up job per spec §4.5 step 10's `hasMore`
    /// semantics, mirroring the worker's own job-type -> cursor mapping.
    async fn after_job(&self, account_id: i64, job: &crate::jobs::SyncJob, outcome: crate::worker::WorkerOutcome) {
        use crate::jobs::JobType;
        use crate::worker::WorkerOutcome;

        if let WorkerOutcome::Completed { has_more: true, .. } = outcome {
            let priority = crate::store::SyncPriority::from_i32(job.priority);
            let requeue = match job.job_type {
                JobType::ForwardCatchup => self.scheduler.queue_forward_catchup(job.chat_id, priority).await,
                JobType::BackwardHistory => self.scheduler.queue_backward_history(job.chat_id, priority).await,
                JobType::InitialLoad | JobType::FullSync => self.scheduler.queue_initial_load(job.chat_id, priority).await,
            };
            if let Err(error) = requeue {
                error!(account_id, chat_id = job.chat_id, %error, "failed to queue follow-up job");
            }
            return;
        }

        match outcome {
            WorkerOutcome::RateLimited { wait_seconds } => {
                warn!(account_id, chat_id = job.chat_id, wait_seconds, "job rate limited");
            }
            WorkerOutcome::Failed { error } => {
                warn!(account_id, chat_id = job.chat_id, %error, "job failed");
            }
            _ => {}
        }
    }

    /// Cheap identity RPC per connected account (spec §4.6), followed by
    /// the status flush (spec §4.7 "every 10 ticks, health checks + status
    /// flush"). A failed check hands the supervisor a fresh, re-wrapped
    /// client to reconnect with, since the old one is presumed dead.
    async fn run_health_checks(&self, accounts: &[ConnectedAccount], make_client: &ClientFactory) {
        for account in accounts {
            let make_client = make_client.clone();
            let rate_limiter = self.rate_limiter.clone();
            let fixtures_mode = self.config.fixtures.mode;
            let fixtures_dir = self.config.fixtures.fixtures_dir.clone();
            let account_id = account.account_id;
            let rebuild = move || {
                let raw = make_client(account_id);
                let wrapped = RecordReplayClient::new(raw, fixtures_mode, fixtures_dir, account_id);
                RateLimitedClient::wrap(wrapped, rate_limiter)
            };
            self.supervisor.health_check(account.handle.clone(), rebuild).await;
        }

        let mut connected_accounts = 0usize;
        for account in accounts {
            if account.handle.status().await == crate::supervisor::AccountStatus::Connected {
                connected_accounts += 1;
            }
        }

        let pending = self.jobs.count_pending().await.unwrap_or(0);
        let running = self.jobs.count_running().await.unwrap_or(0);
        let synced = self.messages.count_all().await.unwrap_or(0);
        let _ = self.status.set_many(&[
            (crate::store::status::keys::PENDING_JOBS, pending.to_string()),
            (crate::store::status::keys::RUNNING_JOBS, running.to_string()),
            (crate::store::status::keys::MESSAGES_SYNCED, synced.to_string()),
            (crate::store::status::keys::CONNECTED_ACCOUNTS, connected_accounts.to_string()),
            (crate::store::status::keys::LAST_UPDATE, chrono::Utc::now().timestamp().to_string()),
        ]).await;
    }

    async fn run_cleanup(&self) {
        let age_ms = self.config.executor.terminal_job_max_age.as_millis() as i64;
        match self.scheduler.cleanup(age_ms).await {
            Ok((completed, failed)) => {
                if completed > 0 || failed > 0 {
                    info!(completed, failed, "cleaned up terminal jobs");
                }
            }
            Err(error) => error!(%error, "cleanup pass failed"),
        }

        let now = chrono::Utc::now().timestamp();
        if let Err(error) = self.rate_limits.cleanup_activity(now, age_ms).await {
            error!(%error, "api_activity cleanup pass failed");
        }
    }

    /// Wait up to `shutdown_deadline` for in-flight work to settle, then
    /// close both pools regardless (spec §4.7 "graceful ... with a
    /// deadline; forced exit if exceeded").
    async fn shutdown_gracefully(&self) -> Result<(), DaemonError> {
        let deadline = self.config.executor.shutdown_deadline;
        let drain = async {
            loop {
                let running = self.jobs.count_running().await.unwrap_or(0);
                if running == 0 {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        };

        let outcome = tokio::time::timeout(deadline, drain).await;
        self.data_pool.close().await;
        self.cache_pool.close().await;

        if outcome.is_err() {
            return Err(DaemonError::ShutdownTimedOut);
        }
        Ok(())
    }
}

/// Install SIGTERM/SIGINT handling and return a `Notify` that fires once
/// either arrives (spec §4.7; grounded on `ShutdownCoordinator`'s
/// `tokio::select!` over `ctrl_c()` and `SignalKind::terminate()`).
fn install_signal_handler() -> Arc<tokio::sync::Notify> {
    let notify = Arc::new(tokio::sync::Notify::new());
    let task_notify = notify.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        task_notify.notify_one();
    });

    notify
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

pub fn exit_code_for(error: &DaemonError) -> ExitCode {
    ExitCode::from(error)
}
