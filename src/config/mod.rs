//! Central configuration for the sync daemon, composed of domain configs —
//! the same compose-then-flatten shape as the teacher's `config::MiraConfig`.

mod executor;
mod paths;
mod reconnect;

pub use executor::JobExecutorConfig;
pub use paths::PathsConfig;
pub use reconnect::ReconnectConfig;

use std::env;

/// Record/replay harness mode (spec §4.8, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixturesMode {
    Off,
    Record,
    Replay,
}

#[derive(Debug, Clone)]
pub struct FixturesConfig {
    pub mode: FixturesMode,
    pub fixtures_dir: std::path::PathBuf,
}

impl FixturesConfig {
    pub fn from_env(paths: &PathsConfig) -> Self {
        let record = env_flag("TELEGRAM_API_RECORD");
        let replay = env_flag("TELEGRAM_API_REPLAY");
        let mode = if replay {
            FixturesMode::Replay
        } else if record {
            FixturesMode::Record
        } else {
            FixturesMode::Off
        };

        let fixtures_dir = env::var("TELEGRAM_API_FIXTURES_DIR")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| paths.data_dir.join("fixtures").join("telegram"));

        Self { mode, fixtures_dir }
    }
}

#[derive(Debug, Clone)]
pub struct CredentialsConfig {
    pub api_id: i32,
    pub api_hash: String,
}

impl CredentialsConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_id = env::var("TELEGRAM_API_ID")
            .map_err(|_| anyhow::anyhow!("TELEGRAM_API_ID is required"))?
            .parse::<i32>()
            .map_err(|e| anyhow::anyhow!("TELEGRAM_API_ID must be an integer: {e}"))?;
        let api_hash = env::var("TELEGRAM_API_HASH")
            .map_err(|_| anyhow::anyhow!("TELEGRAM_API_HASH is required"))?;

        Ok(Self { api_id, api_hash })
    }
}

/// Main configuration structure - composes all domain configs.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub paths: PathsConfig,
    pub credentials: CredentialsConfig,
    pub executor: JobExecutorConfig,
    pub reconnect: ReconnectConfig,
    pub fixtures: FixturesConfig,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        // Don't panic if .env doesn't exist (for production).
        dotenv::dotenv().ok();

        let paths = PathsConfig::from_env();
        let credentials = CredentialsConfig::from_env()?;
        let executor = JobExecutorConfig::from_env();
        let reconnect = ReconnectConfig::from_env();
        let fixtures = FixturesConfig::from_env(&paths);

        Ok(Self {
            paths,
            credentials,
            executor,
            reconnect,
            fixtures,
        })
    }
}

fn env_flag(name: &str) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => false,
    }
}

pub(crate) fn env_duration_ms(name: &str, default_ms: u64) -> std::time::Duration {
    let millis = env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default_ms);
    std::time::Duration::from_millis(millis)
}

pub(crate) fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
