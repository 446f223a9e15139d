//! Embedders
//!
//! An `Embedder` turns text into fixed-dimension vectors. One instance is
//! built at startup from the `[embedding]` config section and handed to the
//! retrieval engine and the ingestion pipeline as `Arc<dyn Embedder>`; there
//! is no process-wide cached instance.

use async_trait::async_trait;
use ecu_sdk::errors::EngineError;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EmbeddingConfig, LLMConfig};

pub mod hashing;
pub mod ollama;
pub mod openai;

pub use hashing::HashingEmbedder;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAIEmbedder;

/// Result type for embedding operations
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur while embedding
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    Request(String),

    #[error("Unexpected embedding response: {0}")]
    Response(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Missing API key: {0}")]
    MissingApiKey(String),
}

impl From<EmbeddingError> for EngineError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::DimensionMismatch { expected, actual } => {
                EngineError::DimensionMismatch { expected, actual }
            }
            other => EngineError::Embedding(other.to_string()),
        }
    }
}

/// Text to vector capability
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Backend name, for logs and `doctor`
    fn name(&self) -> &str;

    /// Length of every vector this embedder returns
    fn dimension(&self) -> usize;

    /// Embed several texts, one vector per input in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Response("no vector returned".to_string()))
    }
}

/// Check that a backend returned one vector of the right size per input
pub(crate) fn check_vectors(
    vectors: &[Vec<f32>],
    inputs: usize,
    dimension: usize,
) -> Result<()> {
    if vectors.len() != inputs {
        return Err(EmbeddingError::Response(format!(
            "expected {} vectors, got {}",
            inputs,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }
    Ok(())
}

/// Build the configured embedder
///
/// Remote backends without their own `base_url` reuse the URL of the matching
/// `[llm]` provider.
pub fn from_config(
    embedding: &EmbeddingConfig,
    llm: &LLMConfig,
) -> std::result::Result<Arc<dyn Embedder>, EngineError> {
    let timeout = Duration::from_secs(llm.timeout_secs);

    let embedder: Arc<dyn Embedder> = match embedding.provider.as_str() {
        "hashing" => Arc::new(HashingEmbedder::new(embedding.dimension)),
        "ollama" => {
            let base_url = embedding
                .base_url
                .clone()
                .unwrap_or_else(|| llm.ollama.base_url.clone());
            Arc::new(OllamaEmbedder::new(
                base_url,
                embedding.model.clone(),
                embedding.dimension,
                timeout,
            )?)
        }
        "openai" => {
            let base_url = embedding
                .base_url
                .clone()
                .unwrap_or_else(|| llm.openai.base_url.clone());
            Arc::new(OpenAIEmbedder::new(
                base_url,
                embedding.model.clone(),
                llm.openai.api_key_env.clone(),
                embedding.dimension,
                timeout,
            )?)
        }
        other => {
            return Err(EngineError::Config(format!(
                "Unknown embedding provider '{}'",
                other
            )))
        }
    };

    tracing::info!(
        "Using {} embedder ({} dimensions)",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}
