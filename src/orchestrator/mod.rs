//! Folder job orchestrator (§4.4): drives one `FolderJob` through its batch
//! loop, one worker process per batch, until the folder is empty, the job
//! is paused, or an error occurs.

pub mod launcher;
pub mod recovery;
pub mod scheduler;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::context::EngineContext;
use crate::domain::JobManifest;
use crate::error::EngineError;
use crate::persistence::models::{ContainerStatus, FolderJobStatus, RunStatus, RunType};

const POLL_INTERVAL: Duration = Duration::from_secs(3);

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn random_token() -> String {
    format!("{:012x}", rand::thread_rng().gen::<u64>())
}

fn emit_job_event(
    ctx: &Arc<EngineContext>,
    job_id: Option<i64>,
    run_id: Option<i64>,
    session_id: &str,
    event: &str,
    data: serde_json::Value,
) {
    ctx.bus.emit(session_id, event, data.clone());
    if let Err(e) = ctx
        .store
        .append_event(job_id, run_id, session_id, event, &data.to_string())
    {
        log::warn!("[job={job_id:?}] failed to append event {event}: {e}");
    }
}

fn setting_u32(ctx: &Arc<EngineContext>, key: &str, default: u32) -> u32 {
    ctx.store
        .get_setting(key)
        .ok()
        .flatten()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn credentials_present(ctx: &Arc<EngineContext>) -> bool {
    [ "email", "app_password", "api_key" ]
        .iter()
        .all(|k| matches!(ctx.store.get_credential(k), Ok(Some(v)) if !v.is_empty()))
}

/// Background driver for one folder job. Blocks the calling thread for the
/// lifetime of the job's batch loop — callers spawn this on its own thread.
pub fn run_folder_job(ctx: Arc<EngineContext>, job_id: i64) {
    let Some(_lock) = ctx.try_lock_job(job_id) else {
        log::warn!("[job={job_id}] orchestrator lock busy — duplicate start ignored");
        return;
    };
    log::info!("[job={job_id}] orchestrator driver started");

    let Ok(Some(job)) = ctx.store.get_folder_job(job_id) else {
        log::error!("[job={job_id}] job not found in DB — aborting");
        return;
    };

    if !credentials_present(&ctx) {
        log::error!("[job={job_id}] missing credentials — aborting");
        let _ = ctx.store.set_folder_job_status(job_id, FolderJobStatus::Error);
        return;
    }

    let session_id = format!("folderjob_{job_id}_{}", random_token());
    let _ = ctx.store.set_folder_job_session(job_id, &session_id);
    let _ = ctx.store.set_folder_job_status(job_id, FolderJobStatus::Running);
    log::info!(
        "[job={job_id}] session={session_id} folder={:?} batch_size={}",
        job.folder, job.batch_size,
    );

    let parallel = setting_u32(&ctx, "parallel_batches", 3);

    if let Err(e) = drive_batches(&ctx, job_id, &session_id, parallel) {
        log::error!("[job={job_id}] unexpected error in orchestrator: {e}");
        emit_job_event(
            &ctx,
            Some(job_id),
            None,
            &session_id,
            "error",
            serde_json::json!({"code": "FATAL", "message": e.message}),
        );
        let _ = ctx.store.set_folder_job_status(job_id, FolderJobStatus::Error);
    }

    log::info!("[job={job_id}] orchestrator driver exiting");
}

fn drive_batches(
    ctx: &Arc<EngineContext>,
    job_id: i64,
    session_id: &str,
    parallel: u32,
) -> Result<(), EngineError> {
    loop {
        wait_for_orphans(ctx, job_id, session_id);

        let Some(job) = ctx.store.get_folder_job(job_id)? else {
            return Ok(());
        };
        if !job.enabled {
            log::info!("[job={job_id}] job disabled — pausing orchestrator");
            emit_job_event(ctx, Some(job_id), None, session_id, "status", serde_json::json!({"msg": "Job paused."}));
            ctx.store.set_folder_job_status(job_id, FolderJobStatus::Paused)?;
            return Ok(());
        }

        let run_id = ctx.store.insert_run(RunType::FolderJob, &job.folder, Some(job_id))?;
        log::info!("[job={job_id}] created run_id={run_id} folder={:?}", job.folder);

        let manifest = JobManifest::from_folder_job(
            job.folder.clone(),
            job_id,
            run_id,
            session_id.to_string(),
            job.batch_size as u32,
            job.oldest_first,
            job.start_from_days_ago.map(|d| d as u32),
            job.max_emails.map(|m| m as u32),
            &job.custom_prompt,
            job.delete_marketing_unread,
            job.skip_flagged,
            job.aggressive_trash,
            parallel,
            std::env::var("DB_PATH").unwrap_or_else(|_| "/data/inbox_cleaner.db".to_string()),
        );

        let container_name = format!("inbox-worker-{job_id}-{run_id}");
        let container_row = ctx
            .store
            .insert_worker_container(job_id, run_id, &container_name)?;

        let worker = match ctx.launcher.launch(&manifest, &container_name) {
            Ok(w) => w,
            Err(e) => {
                log::error!("[job={job_id}] [run={run_id}] launch failed: {e}");
                ctx.store.finish_run(run_id, RunStatus::Error)?;
                ctx.store
                    .finish_worker_container(container_row, ContainerStatus::Error)?;
                emit_job_event(
                    ctx,
                    Some(job_id),
                    Some(run_id),
                    session_id,
                    "error",
                    serde_json::json!({
                        "code": "LAUNCH_FAILED", "message": e.message,
                        "remediation": "the worker process or container image may need attention",
                    }),
                );
                ctx.store.set_folder_job_status(job_id, FolderJobStatus::Error)?;
                return Ok(());
            }
        };
        ctx.store.set_container_running(container_row, &worker.id)?;

        let Some(exit_code) = poll_worker_exit(ctx, job_id, run_id, session_id, &worker)? else {
            log::info!("[job={job_id}] [run={run_id}] paused while worker still running");
            return Ok(());
        };

        let container_status = if exit_code == 0 {
            ContainerStatus::Done
        } else {
            ContainerStatus::Error
        };
        ctx.store.finish_worker_container(container_row, container_status)?;
        let _ = ctx.launcher.remove(&worker);

        if exit_code != 0 {
            log::error!("[job={job_id}] [run={run_id}] worker exited code={exit_code} — error");
            ctx.store.set_folder_job_status(job_id, FolderJobStatus::Error)?;
            return Ok(());
        }

        let run = ctx.store.get_run(run_id)?;
        let total = run.as_ref().map(|r| r.total).unwrap_or(0);
        log::info!(
            "[job={job_id}] [run={run_id}] batch done total={total} kept={} filed={} trashed={} errors={}",
            run.as_ref().map(|r| r.kept).unwrap_or(0),
            run.as_ref().map(|r| r.filed).unwrap_or(0),
            run.as_ref().map(|r| r.trashed).unwrap_or(0),
            run.as_ref().map(|r| r.errors).unwrap_or(0),
        );

        if total == 0 {
            log::info!("[job={job_id}] folder {:?} fully processed — complete", job.folder);
            ctx.store.complete_folder_job(job_id, &now())?;
            emit_job_event(
                ctx,
                Some(job_id),
                Some(run_id),
                session_id,
                "done",
                serde_json::json!({
                    "msg": format!("{} fully processed", job.folder),
                    "total_processed": job.total_processed,
                }),
            );
            return Ok(());
        }

        let processed = run
            .as_ref()
            .map(|r| r.kept + r.filed + r.trashed)
            .unwrap_or(0);
        ctx.store.bump_folder_job_progress(job_id, processed, &now())?;

        let batch_delay = setting_u32(ctx, "batch_delay_seconds", 5);
        log::info!("[job={job_id}] inter-batch delay {batch_delay}s");
        for _ in 0..batch_delay {
            match ctx.store.get_folder_job(job_id)? {
                Some(fresh) if fresh.enabled => {}
                _ => break,
            }
            thread::sleep(Duration::from_secs(1));
        }
    }
}

/// Wait for worker processes left behind by a previous orchestrator
/// incarnation of this job before launching a new batch.
fn wait_for_orphans(ctx: &Arc<EngineContext>, job_id: i64, session_id: &str) {
    let prefix = format!("inbox-worker-{job_id}-");
    for name in ctx.launcher.list_by_prefix(&prefix) {
        log::warn!("[job={job_id}] orphan worker {name:?} — waiting");
        emit_job_event(
            ctx,
            Some(job_id),
            None,
            session_id,
            "status",
            serde_json::json!({"msg": format!("Waiting for existing batch ({name})…")}),
        );
        let handle = launcher::LaunchedWorker {
            id: name.clone(),
            name,
        };
        loop {
            match ctx.launcher.poll_exit(&handle) {
                Ok(Some(_)) | Err(_) => {
                    let _ = ctx.launcher.remove(&handle);
                    break;
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
            }
        }
    }
}

/// Poll a launched worker every 3s until it exits. Returns `None` if the
/// job was paused while waiting (driver should stop, worker left running).
fn poll_worker_exit(
    ctx: &Arc<EngineContext>,
    job_id: i64,
    run_id: i64,
    session_id: &str,
    worker: &launcher::LaunchedWorker,
) -> Result<Option<i32>, EngineError> {
    let mut polls = 0u32;
    loop {
        polls += 1;
        if let Some(code) = ctx.launcher.poll_exit(worker)? {
            log::info!("[job={job_id}] [run={run_id}] worker exited code={code} polls={polls}");
            return Ok(Some(code));
        }
        if polls == 1 || polls % 10 == 0 {
            log::info!("[job={job_id}] [run={run_id}] worker running poll={polls}");
        }

        match ctx.store.get_folder_job(job_id)? {
            Some(job) if job.enabled => {}
            _ => {
                log::info!("[job={job_id}] [run={run_id}] pause signal detected — stopping poll");
                emit_job_event(
                    ctx,
                    Some(job_id),
                    Some(run_id),
                    session_id,
                    "status",
                    serde_json::json!({"msg": "Job paused — waiting for batch to finish."}),
                );
                ctx.store.set_folder_job_status(job_id, FolderJobStatus::Paused)?;
                return Ok(None);
            }
        }

        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ProgressBus;
    use crate::orchestrator::launcher::ProcessLauncher;
    use crate::persistence::sqlite::SqliteStore;
    use std::sync::Arc;

    #[test]
    fn missing_job_returns_without_panicking() {
        let store: Arc<dyn crate::persistence::Store> =
            Arc::new(SqliteStore::open_in_memory().unwrap());
        let ctx = EngineContext::new(store, ProgressBus::new(), Arc::new(ProcessLauncher::new()));
        run_folder_job(ctx, 999);
    }

    #[test]
    fn duplicate_driver_start_is_ignored() {
        let store: Arc<dyn crate::persistence::Store> =
            Arc::new(SqliteStore::open_in_memory().unwrap());
        let ctx = EngineContext::new(store, ProgressBus::new(), Arc::new(ProcessLauncher::new()));
        let _lock = ctx.try_lock_job(1).unwrap();
        // A second driver attempt for the same job must bail out immediately
        // rather than touching the (nonexistent) job row.
        run_folder_job(Arc::clone(&ctx), 1);
    }
}
