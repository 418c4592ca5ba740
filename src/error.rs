//! Per-subsystem error types.
//!
//! Each bounded subsystem gets its own flat `thiserror` enum plus a local
//! `Result<T>` alias, rather than one crate-wide error type. Call sites at
//! module boundaries use these directly; `anyhow::Result` is reserved for
//! composition points (`main.rs`, task spawners) the way the rest of the
//! crate splits the two.

use thiserror::Error;

/// Errors from the persistent store (schema init, row access, constraints).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while normalizing a raw wire message into a cache row.
/// Always non-fatal to the enclosing batch: callers log and drop the
/// offending message, retaining `raw_json` for forensic replay.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed payload: {0}")]
    Malformed(String),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Errors from the sync-job service's state machine and store access.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("invalid job state transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: i64,
        from: &'static str,
        to: &'static str,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type JobResult<T> = Result<T, JobError>;

/// Lifecycle-level errors. Mapped to process exit codes at the binary
/// boundary (spec §4.7/§7).
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("another instance is already running (pid {0})")]
    PidFileLocked(u32),
    #[error("no accounts configured")]
    NoAccounts,
    #[error("all accounts failed to connect")]
    AllAccountsFailed,
    #[error("shutdown did not complete within the deadline")]
    ShutdownTimedOut,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Process exit codes as enumerated in spec §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    AlreadyRunning = 2,
    NoAccounts = 3,
    AllAccountsFailed = 4,
}

impl From<&DaemonError> for ExitCode {
    fn from(e: &DaemonError) -> Self {
        match e {
            DaemonError::PidFileLocked(_) => ExitCode::AlreadyRunning,
            DaemonError::NoAccounts => ExitCode::NoAccounts,
            DaemonError::AllAccountsFailed => ExitCode::AllAccountsFailed,
            DaemonError::ShutdownTimedOut => ExitCode::Error,
            DaemonError::Store(_) | DaemonError::Job(_) | DaemonError::Io(_) => ExitCode::Error,
        }
    }
}
