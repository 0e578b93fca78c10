//! Classification deduplication cache.
//!
//! Keyed by SHA-256 of `lower(from) + "|||" + normalised(subject)`, where
//! normalisation strips a leading `Re:`/`Fwd:`/`Fw:` (any case), collapses
//! internal whitespace, and lowercases. TTL is `cache_ttl_days` (§8 boundary:
//! `cache_ttl_days=0` ⇒ every lookup is a miss).

use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::domain::{Action, Classification, EmailHeader};
use crate::error::EngineError;
use crate::persistence::Store;

fn re_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*(re|fwd?|fw):\s*").expect("valid regex"))
}

fn re_whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

pub fn normalise_subject(subject: &str) -> String {
    let lowered = subject.to_lowercase();
    let trimmed = lowered.trim();
    let stripped = re_prefix().replace(trimmed, "");
    re_whitespace().replace_all(&stripped, " ").trim().to_string()
}

pub fn email_fingerprint(from: &str, subject: &str) -> String {
    let key = format!("{}|||{}", from.to_lowercase().trim(), normalise_subject(subject));
    let digest = Sha256::digest(key.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Split a batch into (cached, uncached). For `folder_cleanup` jobs any
/// cached `keep` is treated as a miss — the cache was populated under inbox
/// policy where `keep` is valid, but folder-drain never keeps.
pub fn check_cache(
    store: &dyn Store,
    emails: &[EmailHeader],
    ttl_days: i64,
    is_folder_drain: bool,
) -> Result<(Vec<Classification>, Vec<EmailHeader>), EngineError> {
    let mut cached = Vec::new();
    let mut uncached = Vec::new();

    for email in emails {
        let hash = email_fingerprint(&email.from, &email.subject);
        match store.get_cache_entry(&hash, ttl_days)? {
            Some(entry) if is_folder_drain && entry.action == "keep" => {
                uncached.push(email.clone());
            }
            Some(entry) => {
                let action: Action = entry.action.parse().unwrap();
                let mut classification =
                    Classification::new(email.uid, action, entry.folder, entry.reason);
                classification.from_cache = true;
                cached.push(classification);
            }
            None => uncached.push(email.clone()),
        }
    }

    Ok((cached, uncached))
}

pub fn store_cache(
    store: &dyn Store,
    classifications: &[Classification],
    emails: &[EmailHeader],
) -> Result<(), EngineError> {
    for classification in classifications {
        let Some(email) = emails.iter().find(|e| e.uid == classification.uid) else {
            continue;
        };
        let hash = email_fingerprint(&email.from, &email.subject);
        store.put_cache_entry(
            &hash,
            classification.action.wire_str(),
            classification.folder.as_deref(),
            classification.reason.as_deref(),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_reply_prefix_case_and_whitespace() {
        let a = email_fingerprint("Person@Example.com", "Re: hello   world");
        let b = email_fingerprint("person@example.com ", "  hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_for_different_subjects() {
        let a = email_fingerprint("a@example.com", "hello");
        let b = email_fingerprint("a@example.com", "goodbye");
        assert_ne!(a, b);
    }

    #[test]
    fn normalise_subject_strips_multiple_prefix_styles() {
        assert_eq!(normalise_subject("FWD: hi"), "hi");
        assert_eq!(normalise_subject("fw: hi"), "hi");
        assert_eq!(normalise_subject("RE: hi"), "hi");
    }

    #[test]
    fn folder_drain_discards_a_cached_keep() {
        use crate::persistence::sqlite::SqliteStore;

        let store = SqliteStore::open_in_memory().unwrap();
        let email = EmailHeader::new(7, "a@example.com", "hello");
        let hash = email_fingerprint(&email.from, &email.subject);
        store.put_cache_entry(&hash, "keep", None, None).unwrap();

        let (cached, uncached) =
            check_cache(&store, std::slice::from_ref(&email), 30, true).unwrap();
        assert!(cached.is_empty());
        assert_eq!(uncached.len(), 1);
        assert_eq!(uncached[0].uid, 7);
    }

    #[test]
    fn inbox_cleanup_reuses_a_cached_keep() {
        use crate::persistence::sqlite::SqliteStore;

        let store = SqliteStore::open_in_memory().unwrap();
        let email = EmailHeader::new(7, "a@example.com", "hello");
        let hash = email_fingerprint(&email.from, &email.subject);
        store.put_cache_entry(&hash, "keep", None, None).unwrap();

        let (cached, uncached) =
            check_cache(&store, std::slice::from_ref(&email), 30, false).unwrap();
        assert_eq!(cached.len(), 1);
        assert!(uncached.is_empty());
        assert!(cached[0].from_cache);
    }
}
