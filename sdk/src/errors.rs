//! Error types and handling
//!
//! This module provides the error types used throughout the ECU engine.
//! All errors implement the `ErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! Per-step failures inside a reasoning session are absorbed by the engine
//! (empty retrieval results, empty oracle judgments). The variants here are
//! what surfaces before a session starts, or from the ingestion and
//! persistence collaborators.

use thiserror::Error;

/// Trait for ECU error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait ErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// API keys, file paths or raw oracle payloads.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors typically require a configuration change.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Database**: SQLite operation failures
/// - **LLM Provider**: API failures, authentication errors
/// - **Embedding**: Embedder failures and dimension mismatches
/// - **Oracle**: Malformed judgments from the oracle
/// - **Ingestion**: Batches rejected by store constraints
///
/// # Examples
///
/// ```
/// use ecu_sdk::errors::{EngineError, ErrorExt};
///
/// let error = EngineError::InvalidBatch("edge endpoints must differ".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::Config("unknown provider".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    #[error("All LLM providers exhausted")]
    AllProvidersExhausted,

    // Embedding errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // Oracle errors
    #[error("Oracle contract violation in {call}: {reason}")]
    OracleContract { call: String, reason: String },

    // Store errors
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Observation not found: {0}")]
    ObservationNotFound(i64),

    // Session errors
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            // Configuration errors
            Self::Config(_) => "Check your config.toml file for errors",

            // Database errors
            Self::Database(_) => "Database operation failed. Check the data directory",

            // LLM provider errors
            Self::LLMProvider(_) => "LLM provider unavailable. Check your API keys and network",
            Self::AllProvidersExhausted => "No LLM providers available. Check configuration",

            // Embedding errors
            Self::Embedding(_) => "Embedding backend failed. Check the [embedding] section",
            Self::DimensionMismatch { .. } => {
                "Embedding dimension does not match the store. Re-ingest or fix the config"
            }

            // Oracle errors
            Self::OracleContract { .. } => "The model returned an unusable answer. Try again",

            // Store errors
            Self::InvalidBatch(_) => "Ingestion batch rejected. Check the source documents",
            Self::ObservationNotFound(_) => "The requested observation does not exist",

            // Session errors
            Self::SessionNotFound(_) => "No session with that id. List sessions with 'ecu sessions'",

            // Generic IO error
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_) | Self::AllProvidersExhausted | Self::DimensionMismatch { .. } => {
                false
            }

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
