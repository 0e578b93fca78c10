//! IMAP session handling for the worker pipeline.
//!
//! Plain LOGIN with an email + app-specific password (credential storage is
//! external to the engine — see `persistence::Store::get_credential`).
//! `fetch_folder_drain` and `fetch_inbox` implement the two fetch modes of
//! stage 1 (§4.2); `move_email`/`delete_email` implement the apply stage's
//! IMAP side, including the COPY+STORE+EXPUNGE fallback for servers without
//! native MOVE.

use chrono::{Duration, Utc};
use imap::Session;
use native_tls::TlsStream;
use std::net::TcpStream;

use crate::domain::email::{EmailHeader, EmailId};
use crate::error::{EngineError, ErrorCode};
use crate::mail::decoders::decode_mime_words;

pub type ImapSession = Session<TlsStream<TcpStream>>;

pub struct ImapClient {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl ImapClient {
    pub fn new(server: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: 993,
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn connect(&self) -> Result<ImapSession, EngineError> {
        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;
        let client = imap::connect((self.server.as_str(), self.port), self.server.as_str(), &tls)
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;
        client
            .login(&self.user, &self.password)
            .map_err(|(e, _)| EngineError::connection_failed(e.to_string()))
    }

    /// Select `folder`, trying quoted then unquoted then falling back to INBOX.
    pub fn select_with_fallback(
        session: &mut ImapSession,
        folder: &str,
        readonly: bool,
    ) -> Result<(), EngineError> {
        let attempts = [format!("\"{folder}\""), folder.to_string(), "INBOX".to_string()];
        let mut last_err = None;
        for name in attempts {
            let result = if readonly {
                session.examine(&name)
            } else {
                session.select(&name)
            };
            match result {
                Ok(_) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        Err(EngineError::connection_failed(format!(
            "could not select folder {folder}: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    pub fn ensure_folder(session: &mut ImapSession, folder: &str) {
        let _ = session.create(format!("\"{folder}\""));
    }

    /// Stage 1, folder-drain mode: all UIDs in `folder`, optional SINCE filter,
    /// ordered per `oldest_first`, first `batch_size` taken.
    pub fn fetch_folder_drain(
        &self,
        folder: &str,
        batch_size: u32,
        oldest_first: bool,
        since_days_ago: Option<u32>,
        skip_flagged: bool,
    ) -> Result<(Vec<EmailHeader>, usize), EngineError> {
        let mut session = self.connect()?;
        Self::select_with_fallback(&mut session, folder, true)?;

        let mut uids = search_uids(&mut session, &since_criterion(since_days_ago, false))?;
        let total = uids.len();
        if uids.is_empty() {
            let _ = session.logout();
            return Ok((vec![], 0));
        }
        if oldest_first {
            uids.sort_unstable();
        } else {
            uids.sort_unstable_by(|a, b| b.cmp(a));
        }
        let take = (batch_size as usize).min(uids.len());
        let target = &uids[..take];

        let headers = fetch_headers(&mut session, target, skip_flagged)?;
        let _ = session.logout();
        Ok((headers, total))
    }

    /// Stage 1, inbox-cleanup mode: SEEN unless `include_unread`, optional
    /// SINCE, first-or-last `batch_size` depending on `oldest_first`.
    pub fn fetch_inbox(
        &self,
        folder: &str,
        batch_size: u32,
        oldest_first: bool,
        include_unread: bool,
        since_days_ago: Option<u32>,
        skip_flagged: bool,
    ) -> Result<Vec<EmailHeader>, EngineError> {
        let mut session = self.connect()?;
        Self::select_with_fallback(&mut session, folder, true)?;

        let mut uids = search_uids(&mut session, &since_criterion(since_days_ago, include_unread))?;
        if uids.is_empty() {
            let _ = session.logout();
            return Ok(vec![]);
        }
        uids.sort_unstable();
        let target: Vec<u32> = if oldest_first {
            uids.into_iter().take(batch_size as usize).collect()
        } else {
            let start = uids.len().saturating_sub(batch_size as usize);
            let mut tail = uids.split_off(start);
            tail.reverse();
            tail
        };

        let headers = fetch_headers(&mut session, &target, skip_flagged)?;
        let _ = session.logout();
        Ok(headers)
    }

    /// MOVE `uid` from `source_folder` to `dest_folder` via native MOVE if
    /// the server advertises it, else COPY+STORE+EXPUNGE.
    pub fn move_email(
        &self,
        uid: EmailId,
        source_folder: &str,
        dest_folder: &str,
    ) -> Result<(), EngineError> {
        let mut session = self.connect()?;
        Self::select_with_fallback(&mut session, source_folder, false)?;
        Self::ensure_folder(&mut session, dest_folder);

        let supports_move = session
            .capabilities()
            .map(|caps| caps.has_str("MOVE"))
            .unwrap_or(false);

        let result = if supports_move {
            session
                .uid_mv(uid.to_string(), format!("\"{dest_folder}\""))
                .map_err(|e| EngineError::imap_move_failed(e.to_string()))
        } else {
            session
                .uid_copy(uid.to_string(), format!("\"{dest_folder}\""))
                .map_err(|e| EngineError::imap_move_failed(e.to_string()))
                .and_then(|_| {
                    session
                        .uid_store(uid.to_string(), "+FLAGS (\\Deleted)")
                        .map_err(|e| EngineError::imap_move_failed(e.to_string()))
                })
                .and_then(|_| {
                    session
                        .expunge()
                        .map_err(|e| EngineError::imap_move_failed(e.to_string()))
                })
        };
        let _ = session.logout();
        result
    }

    pub fn delete_email(&self, uid: EmailId, source_folder: &str) -> Result<(), EngineError> {
        let mut session = self.connect()?;
        Self::select_with_fallback(&mut session, source_folder, false)?;
        session
            .uid_store(uid.to_string(), "+FLAGS (\\Deleted)")
            .map_err(|e| EngineError::imap_move_failed(e.to_string()))?;
        session
            .expunge()
            .map_err(|e| EngineError::imap_move_failed(e.to_string()))?;
        let _ = session.logout();
        Ok(())
    }
}

fn since_criterion(days_ago: Option<u32>, include_unread: bool) -> String {
    let base = if include_unread { "ALL" } else { "SEEN" };
    match days_ago {
        Some(days) => {
            let cutoff = Utc::now() - Duration::days(days as i64);
            format!("{base} SINCE {}", cutoff.format("%d-%b-%Y"))
        }
        None => base.to_string(),
    }
}

fn search_uids(session: &mut ImapSession, criterion: &str) -> Result<Vec<u32>, EngineError> {
    let set = session
        .uid_search(criterion)
        .map_err(|e| EngineError::connection_failed(e.to_string()))?;
    Ok(set.into_iter().collect())
}

fn fetch_headers(
    session: &mut ImapSession,
    uids: &[u32],
    skip_flagged: bool,
) -> Result<Vec<EmailHeader>, EngineError> {
    if uids.is_empty() {
        return Ok(vec![]);
    }
    let uid_set = uids
        .iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let fetches = session
        .uid_fetch(uid_set, "(FLAGS BODY.PEEK[HEADER.FIELDS (FROM SUBJECT DATE)])")
        .map_err(|e| EngineError::parse_error(e.to_string()))?;

    let mut out = Vec::new();
    for f in fetches.iter() {
        let Some(uid) = f.uid else { continue };
        let flags: Vec<String> = f.flags().iter().map(|flag| format!("{flag:?}")).collect();
        let is_seen = flags.iter().any(|f| f.contains("Seen"));
        let is_flagged = flags.iter().any(|f| f.contains("Flagged"));

        if skip_flagged && is_flagged {
            continue;
        }

        let header_bytes = f.header().unwrap_or_default();
        let (from, subject, date) = parse_header_fields(header_bytes);

        out.push(EmailHeader {
            uid,
            from,
            subject,
            date,
            is_seen,
            is_flagged,
        });
    }
    Ok(out)
}

fn parse_header_fields(raw: &[u8]) -> (String, String, String) {
    let parsed = match mailparse::parse_mail(raw) {
        Ok(p) => p,
        Err(_) => return (String::new(), String::new(), String::new()),
    };
    let from = parsed
        .headers
        .get_first_value("From")
        .map(|v| decode_mime_words(v.as_bytes()))
        .unwrap_or_default();
    let subject = parsed
        .headers
        .get_first_value("Subject")
        .map(|v| decode_mime_words(v.as_bytes()))
        .unwrap_or_default();
    let date = parsed.headers.get_first_value("Date").unwrap_or_default();
    (from, subject, date)
}
