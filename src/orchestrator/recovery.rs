//! Boot recovery (§4.6): folder jobs left `status=running` by a previous
//! process are picked back up once any orphaned workers from that
//! incarnation have exited.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::context::EngineContext;

const BOOT_GRACE: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_secs(3);

fn wait_for_live_workers(ctx: &Arc<EngineContext>, job_id: i64) {
    let prefix = format!("inbox-worker-{job_id}-");
    let names = ctx.launcher.list_by_prefix(&prefix);
    log::info!("recovery [job={job_id}]: {} live worker(s)", names.len());
    for name in names {
        let handle = super::launcher::LaunchedWorker {
            id: name.clone(),
            name: name.clone(),
        };
        loop {
            match ctx.launcher.poll_exit(&handle) {
                Ok(Some(_)) | Err(_) => {
                    log::info!("recovery [job={job_id}]: {name:?} done");
                    let _ = ctx.launcher.remove(&handle);
                    break;
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
            }
        }
    }
}

/// Spawns a background thread that scans for in-flight jobs and resumes
/// each with a fresh driver. Returns immediately.
pub fn recover_running_jobs(ctx: Arc<EngineContext>) {
    thread::spawn(move || {
        thread::sleep(BOOT_GRACE);
        log::info!("recovery scan starting…");

        let running = match ctx.store.scan_running_folder_jobs() {
            Ok(jobs) => jobs,
            Err(e) => {
                log::warn!("recovery: could not scan running folder jobs: {e}");
                return;
            }
        };
        log::info!("recovery: {} job(s) in running state", running.len());

        for job in running {
            wait_for_live_workers(&ctx, job.id);
            log::info!("recovery [job={}]: restarting orchestrator", job.id);
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || super::run_folder_job(ctx, job.id));
        }
        log::info!("recovery complete");
    });
}
