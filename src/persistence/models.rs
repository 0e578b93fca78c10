//! Row types for every persisted table.
//!
//! Field names and defaults mirror the schema of the system this engine
//! reimplements: `credentials`, `settings`, `runs`, `actions`, `email_cache`,
//! `schedules`, `folder_jobs`, `job_events`, `worker_containers`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Done,
    Error,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Done => "done",
            RunStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunType {
    Manual,
    Scheduled,
    FolderJob,
}

impl RunType {
    pub fn as_str(self) -> &'static str {
        match self {
            RunType::Manual => "manual",
            RunType::Scheduled => "scheduled",
            RunType::FolderJob => "folder_job",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub run_type: String,
    pub source_folder: String,
    pub total: i64,
    pub kept: i64,
    pub filed: i64,
    pub trashed: i64,
    pub errors: i64,
    pub skipped: i64,
    pub job_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    pub id: i64,
    pub run_id: i64,
    pub uid: String,
    pub from_addr: Option<String>,
    pub subject: Option<String>,
    pub action: String,
    pub folder: Option<String>,
    pub reason: Option<String>,
    pub error_detail: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub hash: String,
    pub action: String,
    pub folder: Option<String>,
    pub reason: Option<String>,
    pub classified_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub interval_hours: i64,
    pub interval_minutes: Option<i64>,
    pub limit_per_run: i64,
    pub folder: String,
    pub custom_prompt: String,
    pub delete_marketing_unread: bool,
    pub skip_flagged: bool,
    pub next_run: Option<String>,
    pub last_run: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderJobStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Error,
}

impl FolderJobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FolderJobStatus::Idle => "idle",
            FolderJobStatus::Running => "running",
            FolderJobStatus::Paused => "paused",
            FolderJobStatus::Completed => "completed",
            FolderJobStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => FolderJobStatus::Running,
            "paused" => FolderJobStatus::Paused,
            "completed" => FolderJobStatus::Completed,
            "error" => FolderJobStatus::Error,
            _ => FolderJobStatus::Idle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderJob {
    pub id: i64,
    pub name: String,
    pub folder: String,
    pub enabled: bool,
    pub status: String,
    pub batch_size: i64,
    pub rate_limit_per_hour: i64,
    pub oldest_first: bool,
    pub start_from_days_ago: Option<i64>,
    pub max_emails: Option<i64>,
    pub custom_prompt: String,
    pub delete_marketing_unread: bool,
    pub skip_flagged: bool,
    pub aggressive_trash: bool,
    pub total_processed: i64,
    pub total_remaining: i64,
    pub last_run: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub id: i64,
    pub job_id: Option<i64>,
    pub run_id: Option<i64>,
    pub session_id: String,
    pub event: String,
    pub data: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Starting,
    Running,
    Done,
    Error,
}

impl ContainerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerStatus::Starting => "starting",
            ContainerStatus::Running => "running",
            ContainerStatus::Done => "done",
            ContainerStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerContainer {
    pub id: i64,
    pub job_id: i64,
    pub run_id: Option<i64>,
    pub container_id: Option<String>,
    pub container_name: Option<String>,
    pub status: String,
    pub created_at: String,
    pub finished_at: Option<String>,
}
