// src/main.rs
// tg-syncd - multi-account Telegram sync daemon

use std::process::ExitCode as ProcessExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use tg_sync_daemon::daemon::{Daemon, PidFile};
use tg_sync_daemon::error::{DaemonError, ExitCode};
use tg_sync_daemon::remote::{RawRequest, RawResponse, RemoteClient, RemoteError, RemoteUpdate};
use tg_sync_daemon::DaemonConfig;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Placeholder `RemoteClient` for accounts with no concrete MTProto
/// transport wired in. Every call fails; fixture replay mode never reaches
/// it (spec §1 Non-goals: the wire protocol itself is out of scope here).
struct UnconfiguredClient;

#[async_trait]
impl RemoteClient for UnconfiguredClient {
    async fn connect(&self) -> Result<(), RemoteError> {
        Err(RemoteError::Protocol("no RemoteClient transport configured for this account".into()))
    }

    async fn resolve_self(&self) -> Result<i64, RemoteError> {
        Err(RemoteError::Protocol("no RemoteClient transport configured for this account".into()))
    }

    async fn call(&self, _request: RawRequest) -> Result<RawResponse, RemoteError> {
        Err(RemoteError::Protocol("no RemoteClient transport configured for this account".into()))
    }

    fn subscribe_updates(&self) -> mpsc::Receiver<RemoteUpdate> {
        mpsc::channel(1).1
    }
}

fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
}

#[tokio::main]
async fn main() -> ProcessExitCode {
    init_tracing();

    match run().await {
        Ok(()) => ProcessExitCode::from(ExitCode::Success as u8),
        Err(error) => {
            error!(%error, "daemon exited with an error");
            ProcessExitCode::from(ExitCode::from(&error) as u8)
        }
    }
}

async fn run() -> Result<(), DaemonError> {
    let config = DaemonConfig::from_env().map_err(|error| {
        error!(%error, "failed to load configuration");
        DaemonError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, error.to_string()))
    })?;

    let _pid_file = PidFile::acquire(&config.paths.pid_file()).map_err(|_| {
        let holder = std::fs::read_to_string(config.paths.pid_file())
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(0);
        DaemonError::PidFileLocked(holder)
    })?;

    info!(data_dir = %config.paths.data_dir.display(), "starting tg-syncd");

    let daemon = Daemon::connect(config).await?;
    let make_client: Arc<dyn Fn(i64) -> Arc<dyn RemoteClient> + Send + Sync> = Arc::new(|_account_id: i64| Arc::new(UnconfiguredClient) as Arc<dyn RemoteClient>);

    daemon.run(make_client).await
}
