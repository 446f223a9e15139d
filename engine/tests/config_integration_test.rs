//! Integration tests for configuration management
//!
//! These tests verify that config files are loaded, validated and turned
//! into working components.

use ecu_engine::config::Config;
use ecu_engine::embedding;
use ecu_engine::handlers::build_router;
use ecu_sdk::errors::EngineError;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    let data_dir = dir.join("data");
    let contents = format!(
        "[core]\nlog_level = \"debug\"\ndata_dir = \"{}\"\n\n{}",
        data_dir.display().to_string().replace('\\', "/"),
        body
    );
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_config_toml_parsing() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(
        temp_dir.path(),
        r#"
[llm]
default_provider = "openai"
timeout_secs = 30

[llm.ollama]
base_url = "http://localhost:11434"
model = "llama3.1:8b"

[llm.openai]
model = "gpt-4o-mini"
api_key_env = "ECU_CONFIG_TEST_KEY"

[embedding]
provider = "hashing"
dimension = 64

[agent]
max_iterations = 7
max_tokens = 5000
max_session_secs = 120

[memory]
max_observations = 40
max_hypotheses = 10

[retrieval]
semantic_search_k = 5
traverse_max_hops = 3

[ingestion]
chunk_size = 200
chunk_overlap = 20
"#,
    );

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert!(config.core.data_dir.exists());
    assert_eq!(config.database_path(), temp_dir.path().join("data").join("ecu.db"));
    assert_eq!(config.llm.default_provider, "openai");
    assert_eq!(config.llm.timeout_secs, 30);
    assert_eq!(config.llm.openai.api_key_env, "ECU_CONFIG_TEST_KEY");
    assert_eq!(config.embedding.dimension, 64);
    assert_eq!(config.agent.max_iterations, 7);
    assert_eq!(config.agent.max_tokens, Some(5000));
    assert_eq!(config.agent.max_session_secs, Some(120));
    assert_eq!(config.memory.max_observations, 40);
    assert_eq!(config.memory.max_hypotheses, 10);
    // Unset keys in a present section keep their defaults
    assert_eq!(config.memory.pattern_window, 20);
    assert_eq!(config.retrieval.semantic_search_k, 5);
    assert_eq!(config.retrieval.traverse_max_hops, 3);
    assert_eq!(config.ingestion.chunk_size, 200);
    assert_eq!(config.ingestion.flush_threshold, 500);
}

#[test]
fn test_invalid_config_rejected() {
    let cases = [
        "[agent]\nmax_iterations = 0\n",
        "[embedding]\ndimension = 0\n",
        "[embedding]\nprovider = \"word2vec\"\n",
        "[agent]\nhigh_confidence_hypothesis = 1.5\n",
        "[retrieval]\ncluster_threshold = -0.1\n",
        "[ingestion]\nmin_observation_length = 2000\n",
    ];

    for body in cases {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(temp_dir.path(), body);
        let result = Config::load_from_path(&path);
        assert!(
            matches!(result, Err(EngineError::Config(_))),
            "accepted invalid config:\n{}",
            body
        );
    }
}

#[test]
fn test_malformed_toml_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    fs::write(&path, "[core\nlog_level = ").unwrap();

    assert!(matches!(
        Config::load_from_path(&path),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn test_components_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(
        temp_dir.path(),
        "[embedding]\nprovider = \"hashing\"\ndimension = 32\n",
    );
    let config = Config::load_from_path(&path).unwrap();

    let embedder = embedding::from_config(&config.embedding, &config.llm).unwrap();
    assert_eq!(embedder.name(), "hashing");
    assert_eq!(embedder.dimension(), 32);

    let router = build_router(&config).unwrap();
    let ranked = router.rank_providers();
    assert_eq!(ranked[0].name(), "ollama");
}
