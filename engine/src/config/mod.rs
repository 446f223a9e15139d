//! Configuration management
//!
//! This module handles loading, validation, and management of the ECU
//! configuration. Configuration is stored in TOML format at ~/.ecu/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory, database file
//! - **llm**: Oracle model providers
//! - **embedding**: Embedder backend and vector dimension
//! - **agent**: Iteration ceiling, budgets and routing thresholds
//! - **memory**: Working-memory caps and oracle windows
//! - **retrieval**: Defaults for retrieval tool parameters
//! - **ingestion**: Chunking and batch sizes
//!
//! Every section except `core` may be omitted and falls back to defaults.
//!
//! # Examples
//!
//! ```no_run
//! use ecu_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Database: {:?}", config.database_path());
//! println!("Default provider: {}", config.llm.default_provider);
//! # Ok(())
//! # }
//! ```

use ecu_sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// LLM provider configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Embedder configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Reasoning loop limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// Working-memory caps
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Retrieval tool defaults
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Ingestion pipeline settings
    #[serde(default)]
    pub ingestion: IngestionConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// SQLite file name inside `data_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Default LLM provider (ollama, openai)
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Per-provider request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// OpenAI-compatible provider settings
    #[serde(default)]
    pub openai: OpenAIConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// OpenAI provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// Base URL for OpenAI API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

/// Embedder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend (hashing, ollama, openai)
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Model name for remote backends
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Base URL override; defaults to the matching `[llm]` provider URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// Vector dimension every stored embedding must have
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
}

/// Reasoning loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard ceiling on meta-reasoning rounds
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Oracle token budget per session
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<u64>,

    /// Wall-clock budget per session in seconds
    #[serde(default)]
    pub max_session_secs: Option<u64>,

    /// Meta confidence (0-10) at which the loop synthesizes regardless of decision
    #[serde(default = "default_synthesize_confidence")]
    pub synthesize_confidence: f64,

    /// Meta confidence (0-10) below which the loop gives up...
    #[serde(default = "default_give_up_confidence")]
    pub give_up_confidence: f64,

    /// ...once this many iterations have completed
    #[serde(default = "default_give_up_after_iterations")]
    pub give_up_after_iterations: u32,

    /// Hypothesis confidence (0-1) required to reach synthesis
    #[serde(default = "default_high_confidence_hypothesis")]
    pub high_confidence_hypothesis: f64,
}

/// Working-memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_max_observations")]
    pub max_observations: usize,

    #[serde(default = "default_max_evidence_trail")]
    pub max_evidence_trail: usize,

    /// Leading trail entries that survive trail capping
    #[serde(default = "default_trail_head")]
    pub trail_head: usize,

    #[serde(default = "default_max_hypotheses")]
    pub max_hypotheses: usize,

    /// Characters of context shown to the oracle during pattern detection
    #[serde(default = "default_observation_context_limit")]
    pub observation_context_limit: usize,

    #[serde(default = "default_pattern_window")]
    pub pattern_window: usize,

    #[serde(default = "default_testing_window")]
    pub testing_window: usize,

    #[serde(default = "default_synthesis_window")]
    pub synthesis_window: usize,
}

/// Retrieval tool defaults, used when the oracle omits a parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_semantic_search_k")]
    pub semantic_search_k: usize,

    #[serde(default = "default_cooccurrence_limit")]
    pub cooccurrence_limit: usize,

    /// Seed observations resolved per surface-form co-occurrence lookup
    #[serde(default = "default_surface_form_seeds")]
    pub surface_form_seeds: usize,

    #[serde(default = "default_temporal_limit")]
    pub temporal_limit: usize,

    #[serde(default = "default_traverse_max_hops")]
    pub traverse_max_hops: usize,

    #[serde(default = "default_traverse_min_strength")]
    pub traverse_min_strength: f64,

    #[serde(default = "default_cluster_threshold")]
    pub cluster_threshold: f64,

    #[serde(default = "default_contradiction_k")]
    pub contradiction_k: usize,
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Words per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Words shared by consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Shortest context (characters) that becomes an observation
    #[serde(default = "default_min_observation_length")]
    pub min_observation_length: usize,

    /// Contexts are cut to this many characters
    #[serde(default = "default_max_observation_length")]
    pub max_observation_length: usize,

    /// Pending observations that trigger a store write
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    /// Files read per batch
    #[serde(default = "default_file_batch_size")]
    pub file_batch_size: usize,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.ecu")
}

fn default_database_file() -> String {
    "ecu.db".to_string()
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_embedding_dimension() -> usize {
    384
}

fn default_max_iterations() -> u32 {
    15
}

fn default_max_tokens() -> Option<u64> {
    Some(100_000)
}

fn default_synthesize_confidence() -> f64 {
    8.0
}

fn default_give_up_confidence() -> f64 {
    5.0
}

fn default_give_up_after_iterations() -> u32 {
    5
}

fn default_high_confidence_hypothesis() -> f64 {
    0.7
}

fn default_max_observations() -> usize {
    100
}

fn default_max_evidence_trail() -> usize {
    200
}

fn default_trail_head() -> usize {
    10
}

fn default_max_hypotheses() -> usize {
    50
}

fn default_observation_context_limit() -> usize {
    500
}

fn default_pattern_window() -> usize {
    20
}

fn default_testing_window() -> usize {
    50
}

fn default_synthesis_window() -> usize {
    100
}

fn default_semantic_search_k() -> usize {
    20
}

fn default_cooccurrence_limit() -> usize {
    50
}

fn default_surface_form_seeds() -> usize {
    10
}

fn default_temporal_limit() -> usize {
    50
}

fn default_traverse_max_hops() -> usize {
    2
}

fn default_traverse_min_strength() -> f64 {
    0.5
}

fn default_cluster_threshold() -> f64 {
    0.7
}

fn default_contradiction_k() -> usize {
    20
}

fn default_chunk_size() -> usize {
    500
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_min_observation_length() -> usize {
    50
}

fn default_max_observation_length() -> usize {
    1000
}

fn default_flush_threshold() -> usize {
    500
}

fn default_file_batch_size() -> usize {
    100
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            database_file: default_database_file(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            timeout_secs: default_llm_timeout(),
            ollama: OllamaConfig::default(),
            openai: OpenAIConfig::default(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            base_url: None,
            dimension: default_embedding_dimension(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tokens: default_max_tokens(),
            max_session_secs: None,
            synthesize_confidence: default_synthesize_confidence(),
            give_up_confidence: default_give_up_confidence(),
            give_up_after_iterations: default_give_up_after_iterations(),
            high_confidence_hypothesis: default_high_confidence_hypothesis(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_observations: default_max_observations(),
            max_evidence_trail: default_max_evidence_trail(),
            trail_head: default_trail_head(),
            max_hypotheses: default_max_hypotheses(),
            observation_context_limit: default_observation_context_limit(),
            pattern_window: default_pattern_window(),
            testing_window: default_testing_window(),
            synthesis_window: default_synthesis_window(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            semantic_search_k: default_semantic_search_k(),
            cooccurrence_limit: default_cooccurrence_limit(),
            surface_form_seeds: default_surface_form_seeds(),
            temporal_limit: default_temporal_limit(),
            traverse_max_hops: default_traverse_max_hops(),
            traverse_min_strength: default_traverse_min_strength(),
            cluster_threshold: default_cluster_threshold(),
            contradiction_k: default_contradiction_k(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_observation_length: default_min_observation_length(),
            max_observation_length: default_max_observation_length(),
            flush_threshold: default_flush_threshold(),
            file_batch_size: default_file_batch_size(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.ecu/config.toml)
    ///
    /// If the configuration file doesn't exist, a default one is written.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` if the file cannot be read or parsed, or
    /// if validation fails.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Load configuration from `path`, writing defaults there if it is missing
    pub fn load_or_create_at(path: &Path) -> Result<Self, EngineError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Written before processing so `~` stays unexpanded in the file
        let defaults = Self::default();
        let toml_string = toml::to_string_pretty(&defaults)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = defaults;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.ecu/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".ecu").join("config.toml"))
    }

    /// Full path of the SQLite database file
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join(&self.core.database_file)
    }

    /// Validate values and expand paths
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` naming the first offending field.
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["ollama", "openai"];
        if !valid_providers.contains(&self.llm.default_provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.llm.default_provider,
                valid_providers.join(", ")
            )));
        }

        let valid_embedders = ["hashing", "ollama", "openai"];
        if !valid_embedders.contains(&self.embedding.provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid embedding provider '{}'. Must be one of: {}",
                self.embedding.provider,
                valid_embedders.join(", ")
            )));
        }
        if self.embedding.dimension == 0 {
            return Err(EngineError::Config(
                "embedding.dimension must be positive".to_string(),
            ));
        }

        self.validate_agent()?;
        self.validate_memory()?;
        self.validate_retrieval()?;
        self.validate_ingestion()?;

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }

    fn validate_agent(&self) -> Result<(), EngineError> {
        let agent = &self.agent;
        if agent.max_iterations == 0 {
            return Err(EngineError::Config(
                "agent.max_iterations must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("synthesize_confidence", agent.synthesize_confidence),
            ("give_up_confidence", agent.give_up_confidence),
        ] {
            if !(0.0..=10.0).contains(&value) {
                return Err(EngineError::Config(format!(
                    "agent.{} must be between 0.0 and 10.0",
                    name
                )));
            }
        }
        if !(0.0..=1.0).contains(&agent.high_confidence_hypothesis) {
            return Err(EngineError::Config(
                "agent.high_confidence_hypothesis must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_memory(&self) -> Result<(), EngineError> {
        let memory = &self.memory;
        if memory.max_observations == 0 || memory.max_hypotheses == 0 {
            return Err(EngineError::Config(
                "memory.max_observations and memory.max_hypotheses must be positive".to_string(),
            ));
        }
        if memory.max_evidence_trail <= memory.trail_head {
            return Err(EngineError::Config(format!(
                "memory.max_evidence_trail ({}) must exceed memory.trail_head ({})",
                memory.max_evidence_trail, memory.trail_head
            )));
        }
        Ok(())
    }

    fn validate_retrieval(&self) -> Result<(), EngineError> {
        let retrieval = &self.retrieval;
        for (name, value) in [
            ("traverse_min_strength", retrieval.traverse_min_strength),
            ("cluster_threshold", retrieval.cluster_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Config(format!(
                    "retrieval.{} must be between 0.0 and 1.0",
                    name
                )));
            }
        }
        Ok(())
    }

    fn validate_ingestion(&self) -> Result<(), EngineError> {
        let ingestion = &self.ingestion;
        if ingestion.chunk_size == 0 || ingestion.chunk_overlap >= ingestion.chunk_size {
            return Err(EngineError::Config(
                "ingestion.chunk_overlap must be smaller than a positive chunk_size".to_string(),
            ));
        }
        if ingestion.min_observation_length > ingestion.max_observation_length {
            return Err(EngineError::Config(
                "ingestion.min_observation_length exceeds max_observation_length".to_string(),
            ));
        }
        if ingestion.flush_threshold == 0 || ingestion.file_batch_size == 0 {
            return Err(EngineError::Config(
                "ingestion.flush_threshold and file_batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            llm: LLMConfig::default(),
            embedding: EmbeddingConfig::default(),
            agent: AgentConfig::default(),
            memory: MemoryConfig::default(),
            retrieval: RetrievalConfig::default(),
            ingestion: IngestionConfig::default(),
        }
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
