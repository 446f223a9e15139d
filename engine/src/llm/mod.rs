//! LLM Provider Abstraction Layer
//!
//! A common interface over chat-completion backends (Ollama, OpenAI). The
//! oracle asks for JSON-only completions; providers return the raw text plus
//! the token count reported by the backend, and the router adds failover.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod ollama;
pub mod openai;
pub mod router;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("All LLM providers exhausted")]
    AllProvidersExhausted,
}

impl From<LLMError> for ecu_sdk::EngineError {
    fn from(err: LLMError) -> Self {
        match err {
            LLMError::AllProvidersExhausted => ecu_sdk::EngineError::AllProvidersExhausted,
            other => ecu_sdk::EngineError::LLMProvider(other.to_string()),
        }
    }
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// Text returned by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,

    /// Prompt plus completion tokens as reported by the backend, or an
    /// estimate when the backend reports nothing
    pub tokens_used: u64,
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Returns true if this is a local provider (e.g., Ollama)
    fn is_local(&self) -> bool;

    /// Request a JSON-formatted completion
    ///
    /// # Arguments
    /// * `messages` - System prompt followed by the user prompt
    /// * `temperature` - Sampling temperature
    async fn complete(&self, messages: &[Message], temperature: f32) -> Result<Completion>;

    /// Check if the provider is currently healthy and available
    async fn check_health(&self) -> bool {
        true
    }
}

/// Rough token estimate (~4 characters per token) for backends that do not
/// report usage
pub fn estimate_tokens(messages: &[Message], completion: &str) -> u64 {
    let chars: usize = messages.iter().map(|m| m.content.len()).sum::<usize>() + completion.len();
    chars.div_ceil(4) as u64
}

/// Locate the JSON object in a model reply.
///
/// Handles multiple output formats:
/// 1. Raw JSON object
/// 2. Fenced JSON (with or without trailing text): ` ```json\n{...}\n``` `
/// 3. JSON embedded in prose, found by scanning for the first balanced `{...}`
pub fn extract_json_object(content: &str) -> Option<&str> {
    let trimmed = content.trim();

    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Some(trimmed);
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        let inner = inner.trim();
        if inner.starts_with('{') {
            return Some(inner);
        }
    }

    let mut offset = 0;
    while let Some(pos) = trimmed[offset..].find('{') {
        let candidate = &trimmed[offset + pos..];
        if let Some(json_str) = extract_balanced_json(candidate) {
            if serde_json::from_str::<serde_json::Value>(json_str).is_ok() {
                return Some(json_str);
            }
        }
        offset += pos + 1;
    }

    None
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.content, "Hello");

        let system_msg = Message::system("respond with JSON");
        assert_eq!(system_msg.role, MessageRole::System);
        assert_eq!(system_msg.role.to_string(), "system");
    }

    #[test]
    fn test_extract_raw_json() {
        let content = r#"  {"decision": "STOP"}  "#;
        assert_eq!(extract_json_object(content), Some(r#"{"decision": "STOP"}"#));
    }

    #[test]
    fn test_extract_fenced_json_with_trailing_prose() {
        let content = "Here you go:\n```json\n{\"patterns\": []}\n```\nHope that helps.";
        assert_eq!(extract_json_object(content), Some("{\"patterns\": []}"));
    }

    #[test]
    fn test_extract_embedded_json_skips_unbalanced_noise() {
        let content = r#"Set {x} aside. Result: {"answer": "a {nested} brace", "confidence": 7} done"#;
        assert_eq!(
            extract_json_object(content),
            Some(r#"{"answer": "a {nested} brace", "confidence": 7}"#)
        );
    }

    #[test]
    fn test_extract_none_without_object() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("[1, 2, 3]"), None);
    }

    #[test]
    fn test_estimate_tokens() {
        let messages = vec![Message::user("This is a test message")];
        // 22 chars + 2 chars of completion
        assert_eq!(estimate_tokens(&messages, "ok"), 6);
    }

    #[test]
    fn test_exhaustion_maps_to_engine_error() {
        let err: ecu_sdk::EngineError = LLMError::AllProvidersExhausted.into();
        assert!(matches!(err, ecu_sdk::EngineError::AllProvidersExhausted));

        let err: ecu_sdk::EngineError = LLMError::Timeout.into();
        assert!(matches!(err, ecu_sdk::EngineError::LLMProvider(_)));
    }
}
