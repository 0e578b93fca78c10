//! Persistence abstraction.
//!
//! The engine treats storage as durable key-value state (credentials,
//! settings) plus several typed tables and an append-only event log.
//! `Store` exposes that as concrete, statically-typed accessors rather than
//! a single generic get/put/delete/scan/append_event quartet — the typed
//! rows are what every caller in `worker`, `orchestrator` and `bus` wants
//! back, and a generic accessor would just be downcast at every call site.
//! Each accessor still maps onto exactly one of those five primitive shapes
//! (point get, point put, point delete, range scan, log append); see
//! DESIGN.md.

pub mod models;
pub mod sqlite;

use crate::error::EngineError;
use models::*;

pub trait Store: Send + Sync {
    // Credentials — get/put only, no delete (create/update-only per spec).
    fn get_credential(&self, key: &str) -> Result<Option<String>, EngineError>;
    fn put_credential(&self, key: &str, value: &str) -> Result<(), EngineError>;

    // Settings — get/put with defaults resolved by the caller.
    fn get_setting(&self, key: &str) -> Result<Option<String>, EngineError>;
    fn put_setting(&self, key: &str, value: &str) -> Result<(), EngineError>;

    // Runs
    fn insert_run(
        &self,
        run_type: RunType,
        source_folder: &str,
        job_id: Option<i64>,
    ) -> Result<i64, EngineError>;
    fn get_run(&self, run_id: i64) -> Result<Option<Run>, EngineError>;
    fn update_run_counters(
        &self,
        run_id: i64,
        total: i64,
        kept: i64,
        filed: i64,
        trashed: i64,
        errors: i64,
        skipped: i64,
    ) -> Result<(), EngineError>;
    fn finish_run(&self, run_id: i64, status: RunStatus) -> Result<(), EngineError>;

    // Actions (append-only)
    fn insert_action(
        &self,
        run_id: i64,
        uid: &str,
        from_addr: Option<&str>,
        subject: Option<&str>,
        action: &str,
        folder: Option<&str>,
        reason: Option<&str>,
        error_detail: Option<&str>,
    ) -> Result<i64, EngineError>;
    fn scan_actions_for_run(&self, run_id: i64) -> Result<Vec<ActionRecord>, EngineError>;

    // Classification cache
    fn get_cache_entry(&self, hash: &str, ttl_days: i64) -> Result<Option<CacheEntry>, EngineError>;
    fn put_cache_entry(
        &self,
        hash: &str,
        action: &str,
        folder: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), EngineError>;

    // Schedules
    fn scan_enabled_schedules(&self) -> Result<Vec<Schedule>, EngineError>;
    fn update_schedule_next_run(
        &self,
        id: i64,
        next_run: &str,
        last_run: Option<&str>,
    ) -> Result<(), EngineError>;

    // Folder jobs
    fn get_folder_job(&self, id: i64) -> Result<Option<FolderJob>, EngineError>;
    fn scan_running_folder_jobs(&self) -> Result<Vec<FolderJob>, EngineError>;
    fn set_folder_job_session(&self, id: i64, session_id: &str) -> Result<(), EngineError>;
    fn set_folder_job_status(&self, id: i64, status: FolderJobStatus) -> Result<(), EngineError>;
    fn complete_folder_job(&self, id: i64, completed_at: &str) -> Result<(), EngineError>;
    fn bump_folder_job_progress(
        &self,
        id: i64,
        processed_delta: i64,
        last_run: &str,
    ) -> Result<(), EngineError>;

    // Job events (durable log, append-only, strictly increasing id)
    fn append_event(
        &self,
        job_id: Option<i64>,
        run_id: Option<i64>,
        session_id: &str,
        event: &str,
        data: &str,
    ) -> Result<i64, EngineError>;
    fn scan_events_since(
        &self,
        session_id: &str,
        after_id: i64,
    ) -> Result<Vec<JobEvent>, EngineError>;

    // Worker containers
    fn insert_worker_container(
        &self,
        job_id: i64,
        run_id: i64,
        container_name: &str,
    ) -> Result<i64, EngineError>;
    fn set_container_running(&self, id: i64, container_id: &str) -> Result<(), EngineError>;
    fn finish_worker_container(&self, id: i64, status: ContainerStatus) -> Result<(), EngineError>;
}
