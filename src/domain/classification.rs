//! The result of classifying one message, whether freshly computed by the
//! LLM or replayed from the cache.

use crate::domain::action::Action;
use crate::domain::email::EmailId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub uid: EmailId,
    pub action: Action,
    pub folder: Option<String>,
    pub reason: Option<String>,
    pub from_cache: bool,
}

impl Classification {
    pub fn new(uid: EmailId, action: Action, folder: Option<String>, reason: Option<String>) -> Self {
        Self {
            uid,
            action,
            folder,
            reason,
            from_cache: false,
        }
    }
}
