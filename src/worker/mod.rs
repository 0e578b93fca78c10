//! Worker entrypoint (§4.2): the single pipeline a launched worker process
//! runs end to end — fetch, cache check, parallel classification, apply —
//! for exactly one manifest. Never reads job/folder parameters from the
//! environment directly; everything comes from the `JobManifest` the
//! orchestrator or scheduler handed it.

use std::sync::Arc;

use crate::apply::{self, RateLimiter};
use crate::bus::ProgressBus;
use crate::classify;
use crate::classify::LlmConfig;
use crate::domain::manifest::JobType;
use crate::domain::JobManifest;
use crate::error::EngineError;
use crate::mail::ImapClient;
use crate::persistence::models::RunStatus;
use crate::persistence::Store;

/// Build an `Emit` closure that fans every event out to the in-memory bus
/// (for a manual run's own live stream) and the durable `job_events` log
/// (for any consumer that reconnects, including a container's own host).
fn make_emit<'a>(
    store: &'a dyn Store,
    bus: &'a Arc<ProgressBus>,
    job_id: Option<i64>,
    run_id: i64,
    session_id: &'a str,
) -> impl Fn(&str, serde_json::Value) + Send + Sync + 'a {
    move |event: &str, data: serde_json::Value| {
        bus.emit(session_id, event, data.clone());
        let payload = data.to_string();
        if let Err(e) = store.append_event(job_id, Some(run_id), session_id, event, &payload) {
            log::warn!("failed to append durable event {event}: {e}");
        }
    }
}

fn load_credentials(store: &dyn Store) -> Result<(String, String, String), EngineError> {
    let email = store
        .get_credential("email")?
        .filter(|v| !v.is_empty());
    let app_password = store
        .get_credential("app_password")?
        .filter(|v| !v.is_empty());
    let api_key = store
        .get_credential("api_key")?
        .filter(|v| !v.is_empty());
    match (email, app_password, api_key) {
        (Some(e), Some(p), Some(k)) => Ok((e, p, k)),
        _ => Err(EngineError::fatal(
            "one or more credentials are missing: set email, app_password and api_key",
        )),
    }
}

fn imap_server_setting(store: &dyn Store) -> Result<String, EngineError> {
    Ok(store
        .get_setting("imap_server")?
        .unwrap_or_else(|| "imap.mail.me.com".to_string()))
}

fn llm_endpoint_and_model(store: &dyn Store) -> Result<(String, String), EngineError> {
    let endpoint = store
        .get_setting("llm_endpoint")?
        .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string());
    let model = store
        .get_setting("llm_model")?
        .unwrap_or_else(|| "gpt-4o-mini".to_string());
    Ok((endpoint, model))
}

/// Run exactly one manifest to completion: connect, fetch a batch, classify
/// it, apply the results, then finalise the run and emit `done`.
pub fn run_worker(
    store: &dyn Store,
    bus: &Arc<ProgressBus>,
    manifest: &JobManifest,
) -> Result<(), EngineError> {
    let emit = make_emit(store, bus, manifest.job_id, manifest.run_id, &manifest.session_id);

    log::info!(
        "worker starting job_type={:?} run_id={} session={} folder={:?} batch_size={}",
        manifest.job_type, manifest.run_id, manifest.session_id, manifest.folder, manifest.batch_size,
    );

    let result = match manifest.job_type {
        JobType::FolderCleanup => run_folder_batch(store, manifest, &emit),
        JobType::InboxCleanup | JobType::ScheduledCleanup => {
            run_inbox_batch(store, manifest, &emit)
        }
    };

    if let Err(e) = &result {
        log::error!("worker crashed: {e}");
        emit(
            "error",
            serde_json::json!({
                "code": "WORKER_CRASH",
                "message": e.message.clone(),
            }),
        );
        let _ = store.finish_run(manifest.run_id, RunStatus::Error);
    }

    result
}

fn run_folder_batch(
    store: &dyn Store,
    manifest: &JobManifest,
    emit: &(impl Fn(&str, serde_json::Value) + Send + Sync),
) -> Result<(), EngineError> {
    let (email_addr, app_password, api_key) = load_credentials(store)?;
    let (endpoint, model) = llm_endpoint_and_model(store)?;
    let llm = LlmConfig {
        endpoint,
        model,
        api_key,
    };

    log::info!("connecting to IMAP…");
    emit(
        "status",
        serde_json::json!({"msg": "Connecting to IMAP…", "stage": "connect"}),
    );
    let imap = ImapClient::new(imap_server_setting(store)?, email_addr, app_password);

    emit("pipeline", serde_json::json!({"stage": "fetch", "status": "running"}));
    let (emails, total_in_folder) = imap.fetch_folder_drain(
        &manifest.folder,
        manifest.batch_size,
        manifest.oldest_first,
        manifest.start_from_days_ago,
        manifest.skip_flagged,
    )?;
    log::info!("fetched {} email(s), total_in_folder={total_in_folder}", emails.len());
    emit(
        "pipeline",
        serde_json::json!({"stage": "fetch", "status": "done", "count": emails.len(), "total": total_in_folder}),
    );

    if let Some(job_id) = manifest.job_id {
        store.bump_folder_job_progress(job_id, 0, &chrono::Utc::now().to_rfc3339())?;
    }

    if emails.is_empty() {
        log::info!("folder is empty — signalling completion");
        store.finish_run(manifest.run_id, RunStatus::Done)?;
        store.update_run_counters(manifest.run_id, 0, 0, 0, 0, 0, 0)?;
        if let Some(job_id) = manifest.job_id {
            store.complete_folder_job(job_id, &chrono::Utc::now().to_rfc3339())?;
        }
        emit("done", serde_json::json!({"empty": true, "total_in_folder": 0}));
        return Ok(());
    }

    store.update_run_counters(manifest.run_id, emails.len() as i64, 0, 0, 0, 0, 0)?;

    log::info!("classifying {} email(s)…", emails.len());
    let classifications = classify::classify_emails(
        store,
        &llm,
        manifest,
        &manifest.folder,
        &emails,
        cache_ttl_days(store)?,
        emit,
    )?;
    log::info!("classification complete results={}", classifications.len());

    log::info!("applying classifications…");
    let rate_limiter = RateLimiter::new();
    let rate_limit_per_hour = rate_limit_setting(store)?;
    let counters = apply::apply_classifications(
        store,
        &imap,
        manifest.run_id,
        &classifications,
        &emails,
        &manifest.folder,
        manifest,
        &rate_limiter,
        rate_limit_per_hour,
        emit,
    )?;
    log::info!(
        "apply complete kept={} filed={} trashed={} errors={} skipped={}",
        counters.kept, counters.filed, counters.trashed, counters.errors, counters.skipped,
    );

    store.finish_run(manifest.run_id, RunStatus::Done)?;
    store.update_run_counters(
        manifest.run_id,
        emails.len() as i64,
        counters.kept,
        counters.filed,
        counters.trashed,
        counters.errors,
        counters.skipped,
    )?;

    if let Some(job_id) = manifest.job_id {
        let processed = counters.kept + counters.filed + counters.trashed;
        store.bump_folder_job_progress(job_id, processed, &chrono::Utc::now().to_rfc3339())?;
    }

    let remaining = total_in_folder.saturating_sub(emails.len());
    emit(
        "done",
        serde_json::json!({
            "kept": counters.kept, "filed": counters.filed, "trashed": counters.trashed,
            "errors": counters.errors, "skipped": counters.skipped, "remaining": remaining,
        }),
    );
    log::info!("worker finished successfully remaining={remaining}");
    Ok(())
}

fn run_inbox_batch(
    store: &dyn Store,
    manifest: &JobManifest,
    emit: &(impl Fn(&str, serde_json::Value) + Send + Sync),
) -> Result<(), EngineError> {
    let (email_addr, app_password, api_key) = load_credentials(store)?;
    let (endpoint, model) = llm_endpoint_and_model(store)?;
    let llm = LlmConfig {
        endpoint,
        model,
        api_key,
    };

    log::info!("connecting to IMAP…");
    emit(
        "status",
        serde_json::json!({"msg": "Connecting to IMAP…", "stage": "connect"}),
    );
    let imap = ImapClient::new(imap_server_setting(store)?, email_addr, app_password);

    emit("pipeline", serde_json::json!({"stage": "fetch", "status": "running"}));
    let emails = imap.fetch_inbox(
        &manifest.folder,
        manifest.batch_size,
        manifest.oldest_first,
        manifest.delete_marketing_unread,
        manifest.start_from_days_ago,
        manifest.skip_flagged,
    )?;
    log::info!("fetched {} email(s)", emails.len());
    emit(
        "pipeline",
        serde_json::json!({"stage": "fetch", "status": "done", "count": emails.len()}),
    );

    if emails.is_empty() {
        log::info!("no emails to process");
        store.finish_run(manifest.run_id, RunStatus::Done)?;
        store.update_run_counters(manifest.run_id, 0, 0, 0, 0, 0, 0)?;
        emit(
            "done",
            serde_json::json!({"total": 0, "kept": 0, "filed": 0, "trashed": 0, "errors": 0, "skipped": 0}),
        );
        return Ok(());
    }

    store.update_run_counters(manifest.run_id, emails.len() as i64, 0, 0, 0, 0, 0)?;

    log::info!("classifying {} email(s)…", emails.len());
    let classifications = classify::classify_emails(
        store,
        &llm,
        manifest,
        &manifest.folder,
        &emails,
        cache_ttl_days(store)?,
        emit,
    )?;
    log::info!("classification complete results={}", classifications.len());

    log::info!("applying classifications…");
    let rate_limiter = RateLimiter::new();
    let rate_limit_per_hour = rate_limit_setting(store)?;
    let counters = apply::apply_classifications(
        store,
        &imap,
        manifest.run_id,
        &classifications,
        &emails,
        &manifest.folder,
        manifest,
        &rate_limiter,
        rate_limit_per_hour,
        emit,
    )?;
    log::info!(
        "apply complete kept={} filed={} trashed={} errors={} skipped={}",
        counters.kept, counters.filed, counters.trashed, counters.errors, counters.skipped,
    );

    store.finish_run(manifest.run_id, RunStatus::Done)?;
    store.update_run_counters(
        manifest.run_id,
        emails.len() as i64,
        counters.kept,
        counters.filed,
        counters.trashed,
        counters.errors,
        counters.skipped,
    )?;

    emit(
        "done",
        serde_json::json!({
            "total": emails.len(), "kept": counters.kept, "filed": counters.filed,
            "trashed": counters.trashed, "errors": counters.errors, "skipped": counters.skipped,
        }),
    );
    log::info!("worker finished successfully");
    Ok(())
}

fn cache_ttl_days(store: &dyn Store) -> Result<i64, EngineError> {
    Ok(store
        .get_setting("cache_ttl_days")?
        .and_then(|v| v.parse().ok())
        .unwrap_or(30))
}

fn rate_limit_setting(store: &dyn Store) -> Result<u32, EngineError> {
    Ok(store
        .get_setting("rate_limit_per_hour")?
        .and_then(|v| v.parse().ok())
        .unwrap_or(200))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::sqlite::SqliteStore;

    #[test]
    fn missing_credentials_is_a_fatal_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = load_credentials(&store).unwrap_err();
        assert_eq!(err.code.as_str(), "FATAL");
    }

    #[test]
    fn partial_credentials_is_a_fatal_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put_credential("email", "user@example.com").unwrap();
        let err = load_credentials(&store).unwrap_err();
        assert_eq!(err.code.as_str(), "FATAL");
    }

    #[test]
    fn cache_ttl_days_falls_back_to_default() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(cache_ttl_days(&store).unwrap(), 30);
    }

    #[test]
    fn run_worker_without_credentials_finishes_run_as_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let run_id = store
            .insert_run(crate::persistence::models::RunType::Manual, "INBOX", None)
            .unwrap();
        let manifest = JobManifest::from_schedule(
            "INBOX", run_id, "sess-test", 10, "", false, true, 1, ":memory:",
        );

        let bus = ProgressBus::new();
        let result = run_worker(&store, &bus, &manifest);
        assert!(result.is_err());

        let run = store.get_run(run_id).unwrap().unwrap();
        assert_eq!(run.status, "error");
    }
}
