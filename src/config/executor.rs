//! `DEFAULT_JOB_EXECUTOR_CONFIG` (spec §4.7): tick cadence, batching, and
//! cleanup/health-check periods for the daemon loop.

use super::env_duration_ms;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// Daemon loop tick interval.
    pub tick_interval: Duration,
    /// Minimum spacing between two jobs run for the same account.
    pub min_job_spacing: Duration,
    /// `limit` passed to `fetchHistory` (spec §4.5 step 5).
    pub batch_size: u32,
    /// Run health checks + status flush every N ticks.
    pub health_check_every_ticks: u64,
    /// Run `cleanup(age_ms)` every N ticks.
    pub cleanup_every_ticks: u64,
    /// Age threshold for `cleanupCompleted`/`cleanupFailed`.
    pub terminal_job_max_age: Duration,
    /// Shutdown deadline before a forced exit.
    pub shutdown_deadline: Duration,
}

impl JobExecutorConfig {
    pub fn from_env() -> Self {
        Self {
            tick_interval: env_duration_ms("TG_SYNC_TICK_MS", 1_000),
            min_job_spacing: env_duration_ms("TG_SYNC_MIN_JOB_SPACING_MS", 250),
            batch_size: super::env_u32("TG_SYNC_BATCH_SIZE", 100),
            health_check_every_ticks: 10,
            cleanup_every_ticks: 300,
            terminal_job_max_age: Duration::from_secs(24 * 60 * 60),
            shutdown_deadline: env_duration_ms("TG_SYNC_SHUTDOWN_DEADLINE_MS", 30_000),
        }
    }
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
