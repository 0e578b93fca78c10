//! Schedule firing (§4.5): a single thread wakes every 60s, advances
//! `next_run` for schedules with none set, and fires any schedule whose
//! `next_run` has passed — fire-and-forget, no orchestrator loop.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::context::EngineContext;
use crate::domain::manifest::JobManifest;
use crate::error::EngineError;
use crate::persistence::models::{RunStatus, RunType, Schedule};

const WAKE_INTERVAL: Duration = Duration::from_secs(60);

fn sched_delta(sched: &Schedule) -> chrono::Duration {
    match sched.interval_minutes {
        Some(mins) if mins > 0 => chrono::Duration::minutes(mins),
        _ => chrono::Duration::hours(sched.interval_hours),
    }
}

fn credentials_present(ctx: &Arc<EngineContext>) -> bool {
    ["email", "app_password", "api_key"]
        .iter()
        .all(|k| matches!(ctx.store.get_credential(k), Ok(Some(v)) if !v.is_empty()))
}

fn fire_schedule(ctx: &Arc<EngineContext>, sched: &Schedule, now: DateTime<Utc>) {
    if !credentials_present(ctx) {
        log::warn!("scheduler: skipping schedule id={} — credentials missing", sched.id);
        return;
    }

    let folder = if sched.folder.is_empty() { "INBOX" } else { &sched.folder };
    let run_id = match ctx.store.insert_run(RunType::Scheduled, folder, None) {
        Ok(id) => id,
        Err(e) => {
            log::error!("scheduler: could not create run for schedule id={}: {e}", sched.id);
            return;
        }
    };

    let session_id = format!("sched_{run_id}_{}", super::random_token());
    let parallel = super::setting_u32(ctx, "parallel_batches", 3);
    let db_path = std::env::var("DB_PATH").unwrap_or_else(|_| "/data/inbox_cleaner.db".to_string());

    let manifest = JobManifest::from_schedule(
        folder,
        run_id,
        session_id,
        sched.limit_per_run as u32,
        &sched.custom_prompt,
        sched.delete_marketing_unread,
        sched.skip_flagged,
        parallel,
        db_path,
    );

    let container_name = format!("inbox-sched-{}-{run_id}", sched.id);
    log::info!(
        "scheduler: firing schedule id={} name={:?} run_id={run_id} folder={folder:?}",
        sched.id, sched.name,
    );

    if let Err(e) = ctx.launcher.launch(&manifest, &container_name) {
        log::error!("scheduler: failed to launch worker for schedule id={}: {e}", sched.id);
        let _ = ctx.store.finish_run(run_id, RunStatus::Error);
    }
    let _ = now;
}

fn tick(ctx: &Arc<EngineContext>) -> Result<(), EngineError> {
    let now = Utc::now();
    for sched in ctx.store.scan_enabled_schedules()? {
        let Some(next_run) = &sched.next_run else {
            let nr = (now + sched_delta(&sched)).to_rfc3339();
            ctx.store.update_schedule_next_run(sched.id, &nr, sched.last_run.as_deref())?;
            continue;
        };

        let due = DateTime::parse_from_rfc3339(next_run)
            .map(|t| t.with_timezone(&Utc) <= now)
            .unwrap_or(true);
        if due {
            fire_schedule(ctx, &sched, now);
            let nr = (now + sched_delta(&sched)).to_rfc3339();
            ctx.store.update_schedule_next_run(sched.id, &nr, Some(&now.to_rfc3339()))?;
        }
    }
    Ok(())
}

/// Blocks the calling thread forever — callers spawn this on its own thread.
pub fn scheduler_loop(ctx: Arc<EngineContext>) {
    log::info!("scheduler started");
    loop {
        if let Err(e) = tick(&ctx) {
            log::warn!("scheduler loop error: {e}");
        }
        thread::sleep(WAKE_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ProgressBus;
    use crate::orchestrator::launcher::ProcessLauncher;
    use crate::persistence::sqlite::SqliteStore;
    use std::sync::Arc;

    fn schedule(next_run: Option<String>) -> Schedule {
        Schedule {
            id: 1,
            name: "nightly".to_string(),
            enabled: true,
            interval_hours: 1,
            interval_minutes: Some(5),
            limit_per_run: 20,
            folder: "INBOX".to_string(),
            custom_prompt: String::new(),
            delete_marketing_unread: false,
            skip_flagged: true,
            next_run,
            last_run: None,
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn sched_delta_prefers_minutes_over_hours() {
        let delta = sched_delta(&schedule(None));
        assert_eq!(delta, chrono::Duration::minutes(5));
    }

    #[test]
    fn sched_delta_falls_back_to_hours_when_minutes_unset() {
        let mut s = schedule(None);
        s.interval_minutes = None;
        assert_eq!(sched_delta(&s), chrono::Duration::hours(1));
    }

    #[test]
    fn firing_without_credentials_is_skipped() {
        let store: Arc<dyn crate::persistence::Store> =
            Arc::new(SqliteStore::open_in_memory().unwrap());
        let ctx = EngineContext::new(store, ProgressBus::new(), Arc::new(ProcessLauncher::new()));
        fire_schedule(&ctx, &schedule(None), Utc::now());
    }
}
