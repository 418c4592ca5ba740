//! On-disk layout (spec §6), rooted at `data_dir`.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
}

impl PathsConfig {
    pub fn from_env() -> Self {
        let data_dir = env::var("TELEGRAM_CLI_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        Self { data_dir }
    }

    pub fn data_db(&self) -> PathBuf {
        self.data_dir.join("data.db")
    }

    pub fn cache_db(&self) -> PathBuf {
        self.data_dir.join("cache.db")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.data_dir.join("daemon.pid")
    }

    pub fn session_db(&self, account_id: i64) -> PathBuf {
        self.data_dir.join(format!("session_{account_id}.db"))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".telegram-cli")
}
