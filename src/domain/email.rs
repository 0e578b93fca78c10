//! Message-level domain types shared by fetch, cache, classify and apply.

pub type EmailId = u32;

/// One fetched message header, as produced by stage 1 of the worker
/// pipeline (`FETCH FLAGS BODY.PEEK[HEADER.FIELDS (FROM SUBJECT DATE)]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailHeader {
    pub uid: EmailId,
    pub from: String,
    pub subject: String,
    pub date: String,
    pub is_seen: bool,
    pub is_flagged: bool,
}

impl EmailHeader {
    pub fn new(uid: EmailId, from: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            uid,
            from: from.into(),
            subject: subject.into(),
            date: String::new(),
            is_seen: true,
            is_flagged: false,
        }
    }
}
