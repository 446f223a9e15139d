//! ECU Engine Library
//!
//! Evidence reasoning over a document corpus: an append-only observation
//! store, a retrieval engine over it, and a bounded-memory reasoning loop
//! that consults an LLM oracle. Used by the `ecu` binary and the
//! integration tests.

/// Configuration management module
pub mod config;

/// Database module (observations, co-occurrence graph, sessions)
pub mod db;

/// Embedding backends
pub mod embedding;

/// LLM provider module
pub mod llm;

/// Typed oracle calls over the LLM router
pub mod oracle;

/// Retrieval engine and tool dispatch
pub mod retrieval;

/// Reasoning loop module
pub mod agent;

/// Document ingestion
pub mod ingest;

/// Telemetry and observability module
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
