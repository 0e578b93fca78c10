//! Provider-agnostic LLM classification transport.
//!
//! Request: system prompt + a JSON array of `{uid, from, subject, date}` as
//! user content. Response: a JSON array of `{uid, action, folder?, reason}`,
//! possibly wrapped in a single markdown code fence. The wire contract does
//! not name a vendor — `endpoint`, `model` and `api_key` are all
//! configuration, so any chat-completions-shaped HTTP endpoint works.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::domain::EmailHeader;
use crate::error::{EngineError, ErrorCode};

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
}

#[derive(Serialize)]
struct EmailForPrompt<'a> {
    uid: u32,
    from: &'a str,
    subject: &'a str,
    date: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawClassification {
    pub uid: u32,
    pub action: String,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^```(?:json)?\n?|\n?```$").expect("valid regex"))
}

/// Classify one batch. Errors are mapped to the wire error kinds from §7 so
/// the caller can emit the right `error` event and drop only this batch.
pub fn classify_batch(
    config: &LlmConfig,
    system_prompt: &str,
    batch: &[EmailHeader],
) -> Result<Vec<RawClassification>, EngineError> {
    let payload: Vec<EmailForPrompt> = batch
        .iter()
        .map(|e| EmailForPrompt {
            uid: e.uid,
            from: &e.from,
            subject: &e.subject,
            date: &e.date,
        })
        .collect();
    let emails_text =
        serde_json::to_string_pretty(&payload).map_err(|e| EngineError::parse_error(e.to_string()))?;

    let request = ChatRequest {
        model: &config.model,
        system: system_prompt,
        messages: vec![ChatMessage {
            role: "user",
            content: format!("Classify:\n\n{emails_text}"),
        }],
        max_tokens: 4096,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| EngineError::new(ErrorCode::ApiError, e.to_string()))?;

    let response = client
        .post(&config.endpoint)
        .bearer_auth(&config.api_key)
        .json(&request)
        .send()
        .map_err(|e| classify_transport_error(&e))?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(EngineError::new(
            ErrorCode::RateLimit,
            "LLM endpoint rate-limited this request",
        ));
    }
    if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
        return Err(EngineError::new(
            ErrorCode::ApiOverloaded,
            "LLM endpoint temporarily overloaded",
        ));
    }
    if !status.is_success() {
        return Err(EngineError::new(
            ErrorCode::ApiError,
            format!("LLM endpoint returned status {status}"),
        ));
    }

    let body: ChatResponse = response
        .json()
        .map_err(|e| EngineError::new(ErrorCode::ApiError, e.to_string()))?;

    let cleaned = fence_re().replace_all(body.content.trim(), "");
    serde_json::from_str(cleaned.trim()).map_err(|e| EngineError::parse_error(e.to_string()))
}

fn classify_transport_error(e: &reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::new(ErrorCode::ApiOverloaded, "LLM request timed out")
    } else {
        EngineError::new(ErrorCode::ApiError, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_stripping_removes_wrapping_fence() {
        let wrapped = "```json\n[{\"uid\":1,\"action\":\"keep\"}]\n```";
        let cleaned = fence_re().replace_all(wrapped, "");
        let parsed: Vec<RawClassification> = serde_json::from_str(cleaned.trim()).unwrap();
        assert_eq!(parsed[0].uid, 1);
        assert_eq!(parsed[0].action, "keep");
    }
}
