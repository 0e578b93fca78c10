//! Closed sum for classification outcomes.
//!
//! The LLM contract and the `actions` table both speak the plain strings
//! named in spec §3 (`keep`, `inbox`, `receipt`, ... `skip`). `Action` is
//! the typed representation the apply stage actually branches on; it round
//! trips to those strings via `FromStr`/`Display` so storage and the wire
//! format are unaffected.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Receipt,
    Travel,
    Finance,
    Medical,
    Recruitment,
    File,
}

impl FileKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FileKind::Receipt => "receipt",
            FileKind::Travel => "travel",
            FileKind::Finance => "finance",
            FileKind::Medical => "medical",
            FileKind::Recruitment => "recruitment",
            FileKind::File => "file",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrashKind {
    Marketing,
    Ephemeral,
    Spam,
}

impl TrashKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrashKind::Marketing => "marketing",
            TrashKind::Ephemeral => "ephemeral",
            TrashKind::Spam => "spam",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Keep,
    Inbox,
    File(FileKind),
    Trash(TrashKind),
    /// Anything the policy engine didn't recognise — apply treats it as Keep,
    /// but the distinct variant lets `log_action`/events record the raw
    /// string for diagnosis.
    Unknown(String),
}

impl Action {
    /// Safe fallback used by the apply stage for anything not in the known
    /// action set (spec §4.2 stage 4, bucket "Anything else").
    pub fn is_trash(&self) -> bool {
        matches!(self, Action::Trash(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Action::File(_))
    }

    pub fn wire_str(&self) -> &str {
        match self {
            Action::Keep => "keep",
            Action::Inbox => "inbox",
            Action::File(k) => k.as_str(),
            Action::Trash(k) => k.as_str(),
            Action::Unknown(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_str())
    }
}

impl FromStr for Action {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "keep" => Action::Keep,
            "inbox" => Action::Inbox,
            "receipt" => Action::File(FileKind::Receipt),
            "travel" => Action::File(FileKind::Travel),
            "finance" => Action::File(FileKind::Finance),
            "medical" => Action::File(FileKind::Medical),
            "recruitment" => Action::File(FileKind::Recruitment),
            "file" => Action::File(FileKind::File),
            "marketing" => Action::Trash(TrashKind::Marketing),
            "ephemeral" => Action::Trash(TrashKind::Ephemeral),
            "spam" => Action::Trash(TrashKind::Spam),
            "skip" => Action::Unknown("skip".to_string()),
            other => Action::Unknown(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_actions() {
        for s in [
            "keep",
            "inbox",
            "receipt",
            "travel",
            "finance",
            "medical",
            "recruitment",
            "file",
            "marketing",
            "ephemeral",
            "spam",
        ] {
            let a: Action = s.parse().unwrap();
            assert_eq!(a.wire_str(), s);
        }
    }

    #[test]
    fn unknown_action_falls_back_safely() {
        let a: Action = "gibberish".parse().unwrap();
        assert_eq!(a, Action::Unknown("gibberish".to_string()));
    }
}
