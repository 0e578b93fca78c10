//! Apply stage: dispatches classifications to IMAP operations under a
//! shared rate limiter, recording an `Action` row and emitting an `action`
//! event after every message (§4.2 stage 4).

use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::classify::pipeline::Emit;
use crate::domain::action::Action;
use crate::domain::manifest::JobType;
use crate::domain::{Classification, EmailHeader, JobManifest};
use crate::error::EngineError;
use crate::mail::ImapClient;
use crate::persistence::models::RunType;
use crate::persistence::Store;

/// Sliding 1-hour window rate limiter, shared process-wide and
/// lock-protected. Trimmed on every check.
pub struct RateLimiter {
    timestamps: Mutex<Vec<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            timestamps: Mutex::new(Vec::new()),
        }
    }

    /// Returns `(allowed, wait)`. If not allowed, `wait` is how long until
    /// the oldest timestamp falls out of the window.
    pub fn check_and_record(&self, max_per_hour: u32) -> (bool, Duration) {
        let now = Instant::now();
        let window = Duration::from_secs(3600);
        let mut timestamps = self.timestamps.lock().unwrap();
        timestamps.retain(|t| now.duration_since(*t) < window);
        if timestamps.len() >= max_per_hour as usize {
            let oldest = timestamps[0];
            let wait = window.saturating_sub(now.duration_since(oldest));
            (false, wait)
        } else {
            timestamps.push(now);
            (true, Duration::ZERO)
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ApplyCounters {
    pub kept: i64,
    pub filed: i64,
    pub trashed: i64,
    pub errors: i64,
    pub skipped: i64,
}

#[allow(clippy::too_many_arguments)]
pub fn apply_classifications(
    store: &dyn Store,
    imap: &ImapClient,
    run_id: i64,
    classifications: &[Classification],
    emails: &[EmailHeader],
    source_folder: &str,
    manifest: &JobManifest,
    rate_limiter: &RateLimiter,
    rate_limit_per_hour: u32,
    emit: &dyn Emit,
) -> Result<ApplyCounters, EngineError> {
    let is_folder_job = manifest.job_type == JobType::FolderCleanup;
    let total = emails.len() as i64;
    let mut counters = ApplyCounters::default();

    emit(
        "pipeline",
        serde_json::json!({"stage": "apply", "total": classifications.len()}),
    );

    for c in classifications {
        let (allowed, wait) = rate_limiter.check_and_record(rate_limit_per_hour);
        if !allowed {
            emit(
                "status",
                serde_json::json!({"msg": format!("Rate limit — waiting {}s…", wait.as_secs())}),
            );
            thread::sleep(wait.min(Duration::from_secs(60)));
        }

        let original = emails.iter().find(|e| e.uid == c.uid);
        let from_addr = original.map(|e| e.from.clone()).unwrap_or_default();
        let subject = original.map(|e| e.subject.clone()).unwrap_or_default();
        let is_seen = original.map(|e| e.is_seen).unwrap_or(true);
        let is_flagged = original.map(|e| e.is_flagged).unwrap_or(false);

        if manifest.skip_flagged && is_flagged {
            record_skip(
                store,
                emit,
                run_id,
                c.uid,
                &from_addr,
                &subject,
                "Flagged email — skipped",
                c.from_cache,
                total,
                &mut counters,
            )?;
            continue;
        }

        let mut action = c.action.clone();
        let mut folder = c.folder.clone();

        if is_folder_job && action == Action::Keep {
            action = Action::Inbox;
            folder = Some("INBOX".to_string());
        }

        if !is_folder_job && !is_seen {
            if !action.is_trash() {
                record_skip(
                    store,
                    emit,
                    run_id,
                    c.uid,
                    &from_addr,
                    &subject,
                    "Unread email — skipped",
                    c.from_cache,
                    total,
                    &mut counters,
                )?;
                continue;
            } else if !manifest.delete_marketing_unread {
                record_skip(
                    store,
                    emit,
                    run_id,
                    c.uid,
                    &from_addr,
                    &subject,
                    "Unread marketing — feature disabled",
                    c.from_cache,
                    total,
                    &mut counters,
                )?;
                continue;
            }
        }

        let reason = c.reason.clone().unwrap_or_default();
        let dispatch_result = dispatch_one(
            imap,
            source_folder,
            c.uid,
            &action,
            folder.as_deref(),
        );

        match dispatch_result {
            Ok(Dispatch {
                final_action,
                final_folder,
                final_reason,
                bucket,
            }) => {
                match bucket {
                    Bucket::Kept => counters.kept += 1,
                    Bucket::Filed => counters.filed += 1,
                    Bucket::Trashed => counters.trashed += 1,
                }
                let reason = final_reason.unwrap_or(reason);
                store.insert_action(
                    run_id,
                    &c.uid.to_string(),
                    Some(&from_addr),
                    Some(&subject),
                    final_action.wire_str(),
                    final_folder.as_deref(),
                    Some(&reason),
                    None,
                )?;
                emit(
                    "action",
                    serde_json::json!({
                        "uid": c.uid, "from": from_addr, "subject": subject,
                        "action": final_action.wire_str(), "folder": final_folder,
                        "reason": reason, "from_cache": c.from_cache,
                    }),
                );
            }
            Err(e) => {
                counters.errors += 1;
                store.insert_action(
                    run_id,
                    &c.uid.to_string(),
                    Some(&from_addr),
                    Some(&subject),
                    action.wire_str(),
                    folder.as_deref(),
                    Some(&reason),
                    Some(&e.message),
                )?;
                emit(
                    "error",
                    serde_json::json!({
                        "code": "IMAP_MOVE_FAILED", "message": e.message,
                        "uid": c.uid, "subject": subject,
                    }),
                );
            }
        }

        store.update_run_counters(
            run_id,
            total,
            counters.kept,
            counters.filed,
            counters.trashed,
            counters.errors,
            counters.skipped,
        )?;
    }

    emit(
        "pipeline",
        serde_json::json!({
            "stage": "done", "kept": counters.kept, "filed": counters.filed,
            "trashed": counters.trashed, "errors": counters.errors, "skipped": counters.skipped,
        }),
    );
    Ok(counters)
}

enum Bucket {
    Kept,
    Filed,
    Trashed,
}

struct Dispatch {
    final_action: Action,
    final_folder: Option<String>,
    final_reason: Option<String>,
    bucket: Bucket,
}

fn dispatch_one(
    imap: &ImapClient,
    source_folder: &str,
    uid: u32,
    action: &Action,
    folder: Option<&str>,
) -> Result<Dispatch, EngineError> {
    match action {
        Action::Keep => Ok(Dispatch {
            final_action: Action::Keep,
            final_folder: None,
            final_reason: None,
            bucket: Bucket::Kept,
        }),
        Action::Inbox => {
            imap.move_email(uid, source_folder, "INBOX")?;
            Ok(Dispatch {
                final_action: Action::Inbox,
                final_folder: Some("INBOX".to_string()),
                final_reason: None,
                bucket: Bucket::Filed,
            })
        }
        Action::File(kind) => {
            if let Some(dest) = folder.filter(|f| !f.is_empty()) {
                imap.move_email(uid, source_folder, dest)?;
                Ok(Dispatch {
                    final_action: Action::File(*kind),
                    final_folder: Some(dest.to_string()),
                    final_reason: None,
                    bucket: Bucket::Filed,
                })
            } else {
                imap.move_email(uid, source_folder, "INBOX")?;
                Ok(Dispatch {
                    final_action: Action::Inbox,
                    final_folder: Some("INBOX".to_string()),
                    final_reason: Some("No folder assigned — sent to INBOX".to_string()),
                    bucket: Bucket::Filed,
                })
            }
        }
        Action::Trash(kind) => {
            imap.delete_email(uid, source_folder)?;
            Ok(Dispatch {
                final_action: Action::Trash(*kind),
                final_folder: None,
                final_reason: None,
                bucket: Bucket::Trashed,
            })
        }
        Action::Unknown(raw) => Ok(Dispatch {
            final_action: Action::Keep,
            final_folder: None,
            final_reason: Some(format!("Unknown action: {raw}")),
            bucket: Bucket::Kept,
        }),
    }
}

#[allow(clippy::too_many_arguments)]
fn record_skip(
    store: &dyn Store,
    emit: &dyn Emit,
    run_id: i64,
    uid: u32,
    from_addr: &str,
    subject: &str,
    reason: &str,
    from_cache: bool,
    total: i64,
    counters: &mut ApplyCounters,
) -> Result<(), EngineError> {
    counters.skipped += 1;
    store.insert_action(
        run_id,
        &uid.to_string(),
        Some(from_addr),
        Some(subject),
        "skip",
        None,
        Some(reason),
        None,
    )?;
    emit(
        "action",
        serde_json::json!({
            "uid": uid, "from": from_addr, "subject": subject,
            "action": "skip", "reason": reason, "from_cache": from_cache,
        }),
    );
    store.update_run_counters(
        run_id,
        total,
        counters.kept,
        counters.filed,
        counters.trashed,
        counters.errors,
        counters.skipped,
    )
}

// Re-exported so callers constructing runs can pick the right `run_type`.
pub fn run_type_for(manifest: &JobManifest) -> RunType {
    match manifest.job_type {
        JobType::FolderCleanup => RunType::FolderJob,
        JobType::ScheduledCleanup => RunType::Scheduled,
        JobType::InboxCleanup => RunType::Manual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rate_limiter_allows_up_to_limit_then_blocks() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            let (allowed, _) = limiter.check_and_record(3);
            assert!(allowed);
        }
        let (allowed, wait) = limiter.check_and_record(3);
        assert!(!allowed);
        assert!(wait <= Duration::from_secs(3600));
    }

    #[test]
    fn rate_limit_of_one_blocks_a_second_concurrent_apply() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new());
        let (first_allowed, _) = limiter.check_and_record(1);
        assert!(first_allowed);

        let limiter2 = Arc::clone(&limiter);
        let second = thread::spawn(move || limiter2.check_and_record(1));
        let (second_allowed, wait) = second.join().unwrap();
        assert!(!second_allowed);
        assert!(wait > Duration::ZERO && wait <= Duration::from_secs(3600));
    }
}
