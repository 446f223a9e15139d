//! ECU SDK
//!
//! Shared data model, vector helpers and error types for the ECU engine.
//! The observation store, retrieval engine and reasoning loop in `ecu-engine`
//! all speak these types.

/// Error types and handling
pub mod errors;

/// Observation and co-occurrence types
pub mod types;

/// Embedding vector helpers
pub mod vector;

// Re-export commonly used types
pub use errors::{EngineError, ErrorExt};
pub use types::{
    CooccurrenceEdge, Metadata, Observation, ObservationId, Relation, RetrievedObservation,
};
pub use vector::{cosine_similarity, decode_embedding, encode_embedding};
