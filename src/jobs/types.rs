//! `SyncJob` and its enums (spec §3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ForwardCatchup,
    BackwardHistory,
    InitialLoad,
    FullSync,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ForwardCatchup => "forward_catchup",
            JobType::BackwardHistory => "backward_history",
            JobType::InitialLoad => "initial_load",
            JobType::FullSync => "full_sync",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "forward_catchup" => JobType::ForwardCatchup,
            "backward_history" => JobType::BackwardHistory,
            "initial_load" => JobType::InitialLoad,
            _ => JobType::FullSync,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            _ => JobStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: i64,
    pub chat_id: i64,
    pub job_type: JobType,
    pub priority: i32,
    pub status: JobStatus,
    pub cursor_start: Option<i64>,
    pub cursor_end: Option<i64>,
    pub messages_fetched: i64,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewSyncJob {
    pub chat_id: i64,
    pub job_type: JobType,
    pub priority: i32,
}

#[derive(Debug, Clone, Default)]
pub struct JobProgress {
    pub cursor_start: Option<i64>,
    pub cursor_end: Option<i64>,
    pub messages_fetched: Option<i64>,
}

/// Error message set on `recoverCrashedJobs` (spec §3, §8 scenario 2).
pub const CRASH_RECOVERY_MESSAGE: &str = "Daemon crashed during execution";
