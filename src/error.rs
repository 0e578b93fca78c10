//! Engine-wide error types.
//!
//! `ErrorCode` renders the exact wire strings used in `JobEvent` `error`
//! envelopes (see spec §7); `EngineError` is the typed `Result` error used
//! internally and carries an `ErrorCode` plus a human message.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ConnectionFailed,
    ImapMoveFailed,
    ParseError,
    RateLimit,
    ApiOverloaded,
    ApiError,
    LaunchFailed,
    WorkerCrash,
    Fatal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ImapMoveFailed => "IMAP_MOVE_FAILED",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::RateLimit => "RATE_LIMIT",
            ErrorCode::ApiOverloaded => "API_OVERLOADED",
            ErrorCode::ApiError => "API_ERROR",
            ErrorCode::LaunchFailed => "LAUNCH_FAILED",
            ErrorCode::WorkerCrash => "WORKER_CRASH",
            ErrorCode::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
}

impl EngineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionFailed, message)
    }

    pub fn imap_move_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ImapMoveFailed, message)
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Fatal, message)
    }
}
