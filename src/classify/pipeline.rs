//! Parallel classification coordinator.
//!
//! Splits the uncached list into `batch_size` chunks and submits them to a
//! bounded worker pool of `parallel_batches` threads. Batches complete in
//! whatever order the pool finishes them — callers must not assume
//! correspondence with submission order (§5 ordering guarantees).

use rayon::ThreadPoolBuilder;
use std::sync::Mutex;

use crate::cache;
use crate::classify::llm_client::{self, LlmConfig};
use crate::classify::prompt;
use crate::domain::action::Action;
use crate::domain::{Classification, EmailHeader, JobManifest};
use crate::domain::manifest::JobType;
use crate::error::EngineError;
use crate::persistence::Store;

pub trait Emit: Fn(&str, serde_json::Value) + Send + Sync {}
impl<T: Fn(&str, serde_json::Value) + Send + Sync> Emit for T {}

/// Runs cache-check + parallel classification for one batch of fetched
/// headers and returns the full set of classifications (cached ∪ fresh).
pub fn classify_emails(
    store: &dyn Store,
    config: &LlmConfig,
    manifest: &JobManifest,
    source_folder: &str,
    emails: &[EmailHeader],
    cache_ttl_days: i64,
    emit: &dyn Emit,
) -> Result<Vec<Classification>, EngineError> {
    let is_folder_drain = manifest.job_type == JobType::FolderCleanup;
    let (cached, uncached) = cache::check_cache(store, emails, cache_ttl_days, is_folder_drain)?;

    if !cached.is_empty() {
        emit(
            "pipeline",
            serde_json::json!({"stage": "dedup", "count": cached.len(), "total": emails.len()}),
        );
    }
    emit(
        "pipeline",
        serde_json::json!({"stage": "classify", "queued": uncached.len(), "cached": cached.len()}),
    );
    for c in &cached {
        emit(
            "cached",
            serde_json::json!({"uid": c.uid, "action": c.action.wire_str(), "folder": c.folder, "reason": c.reason}),
        );
    }

    let mut all = cached;
    if uncached.is_empty() {
        return Ok(all);
    }

    let system_prompt = if is_folder_drain {
        prompt::folder_cleanup_prompt(source_folder, manifest)
    } else {
        prompt::inbox_cleanup_prompt(source_folder, manifest)
    };

    let batches: Vec<&[EmailHeader]> = uncached.chunks(manifest.batch_size.max(1) as usize).collect();
    emit(
        "pipeline",
        serde_json::json!({
            "stage": "classify",
            "batches": batches.len(),
            "parallel": manifest.parallel_batches.min(batches.len() as u32),
        }),
    );

    let pool = ThreadPoolBuilder::new()
        .num_threads(manifest.parallel_batches.max(1) as usize)
        .build()
        .map_err(|e| EngineError::fatal(e.to_string()))?;

    let fresh = Mutex::new(Vec::new());
    pool.scope(|scope| {
        for (idx, batch) in batches.iter().enumerate() {
            let fresh = &fresh;
            scope.spawn(move |_| {
                let result = llm_client::classify_batch(config, &system_prompt, batch);
                match result {
                    Ok(raw) => {
                        let classifications: Vec<Classification> = raw
                            .into_iter()
                            .map(|r| {
                                Classification::new(
                                    r.uid,
                                    r.action.parse().unwrap_or(Action::Keep),
                                    r.folder,
                                    r.reason,
                                )
                            })
                            .collect();
                        if let Err(e) = cache::store_cache(store, &classifications, batch) {
                            emit(
                                "error",
                                serde_json::json!({"code": "PARSE_ERROR", "message": e.to_string(), "batch": idx + 1}),
                            );
                        }
                        emit(
                            "pipeline",
                            serde_json::json!({
                                "stage": "classified",
                                "batch": idx + 1,
                                "count": classifications.len(),
                            }),
                        );
                        fresh.lock().unwrap().extend(classifications);
                    }
                    Err(e) => {
                        emit(
                            "error",
                            serde_json::json!({"code": e.code.as_str(), "message": e.message, "batch": idx + 1}),
                        );
                    }
                }
            });
        }
    });

    all.extend(fresh.into_inner().unwrap());
    Ok(all)
}
