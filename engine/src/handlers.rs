//! Command handlers for CLI operations
//!
//! Each handler builds what its command needs from `Config`, runs it, and
//! prints either human-readable text or JSON. Setup failures (config,
//! database, providers, embedder/store dimension mismatch) are returned as
//! errors before any session starts.

use anyhow::{Context, Result};
use chrono::DateTime;
use ecu_sdk::errors::EngineError;
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{CancellationFlag, ReasoningLoop, SessionOutcome};
use crate::config::Config;
use crate::db::{Database, ObservationStore, SessionRecord, SessionStatus};
use crate::embedding::{self, Embedder};
use crate::ingest::Ingestor;
use crate::llm::ollama::OllamaProvider;
use crate::llm::openai::OpenAIProvider;
use crate::llm::router::LLMRouter;
use crate::llm::LLMProvider;
use crate::oracle::LlmOracle;
use crate::retrieval::{RetrievalEngine, ToolDispatcher};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::new(&config.database_path())
        .await
        .context("Failed to open database")
}

/// Observation store checked against the embedder's dimension
///
/// A corpus embedded at one dimension cannot be searched with vectors of
/// another, so a mismatch is a setup error.
async fn open_store(
    config: &Config,
    database: &Database,
    embedder: &Arc<dyn Embedder>,
) -> Result<ObservationStore> {
    let store = database.observations(
        embedder.dimension(),
        config.ingestion.min_observation_length,
    );

    if let Some(stored) = store.stored_dimension().await? {
        if stored != embedder.dimension() {
            return Err(EngineError::DimensionMismatch {
                expected: stored,
                actual: embedder.dimension(),
            })
            .context("Configured embedder does not match the ingested corpus");
        }
    }
    Ok(store)
}

/// Providers in registration order: Ollama always, OpenAI when its key is set
pub fn build_router(config: &Config) -> Result<LLMRouter> {
    let timeout = Duration::from_secs(config.llm.timeout_secs);
    let mut providers: Vec<Box<dyn LLMProvider>> = Vec::new();

    providers.push(Box::new(OllamaProvider::new(
        config.llm.ollama.base_url.clone(),
        config.llm.ollama.model.clone(),
        timeout,
    )?));

    // Only add OpenAI when a key is present in the environment
    if std::env::var(&config.llm.openai.api_key_env).is_ok_and(|key| !key.is_empty()) {
        providers.push(Box::new(OpenAIProvider::new(
            config.llm.openai.clone(),
            timeout,
        )?));
    } else if config.llm.default_provider == "openai" {
        tracing::warn!(
            "Default provider is openai but {} is not set; using Ollama",
            config.llm.openai.api_key_env
        );
    }

    Ok(LLMRouter::new(
        providers,
        config.llm.default_provider.clone(),
        timeout,
    ))
}

/// Wire the full reasoning stack for `config`
async fn build_loop(config: &Config, database: &Database) -> Result<ReasoningLoop> {
    let embedder = embedding::from_config(&config.embedding, &config.llm)?;
    let store = open_store(config, database, &embedder).await?;

    let retrieval = RetrievalEngine::new(store, embedder);
    let tools = ToolDispatcher::new(retrieval, config.retrieval.clone());
    let oracle = Arc::new(LlmOracle::new(build_router(config)?));

    Ok(ReasoningLoop::new(
        oracle,
        tools,
        config.agent.clone(),
        config.memory.clone(),
    )
    .with_sessions(database.sessions()))
}

/// Cancel the loop on Ctrl-C; the session stops before its next state
fn cancel_on_interrupt(flag: CancellationFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current step");
            flag.cancel();
        }
    });
}

/// Answer one question
pub async fn handle_query(
    text: String,
    session_id: Option<String>,
    max_iterations: Option<u32>,
    output: Option<PathBuf>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(max_iterations) = max_iterations {
        config.agent.max_iterations = max_iterations.max(1);
    }

    let database = open_database(&config).await?;
    let reasoning = build_loop(&config, &database).await?;
    cancel_on_interrupt(reasoning.cancellation());

    if let OutputFormat::Text = format {
        println!("Query: {}", text);
        println!();
    }

    let outcome = reasoning.run(&text, session_id).await?;
    print_outcome(&outcome, format)?;

    if let Some(path) = output {
        write_outcome(&outcome, &path).await?;
        if let OutputFormat::Text = format {
            println!("Results saved to: {}", path.display());
        }
    }

    database.close().await
}

/// Prompt loop; `quit`, `exit` or `q` leaves
pub async fn handle_interactive(config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let reasoning = build_loop(config, &database).await?;

    println!("ECU interactive mode");
    println!("Type your question, or 'quit' to exit.");

    let stdin = io::stdin();
    loop {
        print!("\nQuery> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();

        if matches!(query.to_lowercase().as_str(), "quit" | "exit" | "q") {
            break;
        }
        if query.is_empty() {
            continue;
        }

        match reasoning.run(query, None).await {
            Ok(outcome) => print_outcome(&outcome, format)?,
            Err(e) => println!("✗ Query failed: {:#}", e),
        }
    }

    println!("Goodbye!");
    database.close().await
}

/// Populate the observation store from a directory
pub async fn handle_ingest(
    dir: PathBuf,
    limit: Option<usize>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let database = open_database(config).await?;
    let embedder = embedding::from_config(&config.embedding, &config.llm)?;
    let store = open_store(config, &database, &embedder).await?;

    let ingestor = Ingestor::new(store.clone(), embedder, config.ingestion.clone())?;
    let report = ingestor.ingest_directory(&dir, limit).await?;

    let total_observations = store.count().await?;
    let total_documents = store.document_count().await?;

    match format {
        OutputFormat::Text => {
            println!("Ingestion complete: {}", dir.display());
            println!("  Files processed:      {}", report.files_seen);
            println!("  Files failed:         {}", report.files_failed);
            println!("  Observations stored:  {}", report.observations_stored);
            println!("  Edges stored:         {}", report.edges_stored);
            println!("  Batches rolled back:  {}", report.batches_rolled_back);
            println!();
            println!(
                "Corpus now holds {} observations from {} documents",
                total_observations, total_documents
            );
        }
        OutputFormat::Json => {
            let output = json!({
                "report": report,
                "total_observations": total_observations,
                "total_documents": total_documents,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    database.close().await
}

/// List recent sessions
pub async fn handle_sessions(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let sessions = database
        .sessions()
        .list_recent(limit)
        .await
        .context("Failed to fetch sessions")?;

    match format {
        OutputFormat::Text => {
            if sessions.is_empty() {
                println!("No sessions yet");
                return Ok(());
            }

            println!("Recent sessions (last {}):", limit);
            println!();
            for session in &sessions {
                println!("Session ID: {}", session.id);
                println!("  Query: {}", session.query);
                println!("  Status: {}", session.status.as_str());
                println!(
                    "  Iterations: {}  Confidence: {:.1}/10",
                    session.iteration_count, session.confidence_score
                );
                println!("  Created: {}", format_timestamp(session.created_at));
                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "sessions": sessions,
                "count": sessions.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Show one session with its evidence trail
pub async fn handle_session(id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let session = database
        .sessions()
        .get(&id)
        .await
        .context("Failed to fetch session")?
        .ok_or(EngineError::SessionNotFound(id))?;

    match format {
        OutputFormat::Text => print_session(&session),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&session)?),
    }
    Ok(())
}

/// Continue a session from its last snapshot
pub async fn handle_resume(id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let memory = database
        .sessions()
        .load_memory(&id)
        .await
        .with_context(|| format!("Cannot resume session {}", id))?;

    let reasoning = build_loop(config, &database).await?;
    cancel_on_interrupt(reasoning.cancellation());

    let outcome = reasoning.resume(memory).await?;
    print_outcome(&outcome, format)?;
    database.close().await
}

/// Corpus size and session averages
pub async fn handle_stats(config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let store = database.observations(
        config.embedding.dimension,
        config.ingestion.min_observation_length,
    );

    let observations = store.count().await?;
    let documents = store.document_count().await?;
    let sessions = database.sessions().stats().await?;

    match format {
        OutputFormat::Text => {
            println!("ECU Statistics");
            println!("==============");
            println!("  Observations:            {}", observations);
            println!("  Documents:               {}", documents);
            println!("  Sessions:                {}", sessions.total_sessions);
            println!("  Completed sessions:      {}", sessions.completed_sessions);
            println!(
                "  Avg confidence (last 10): {:.2}/10",
                sessions.avg_confidence
            );
            println!("  Avg iterations (last 10): {:.1}", sessions.avg_iterations);
        }
        OutputFormat::Json => {
            let output = json!({
                "observations": observations,
                "documents": documents,
                "sessions": sessions,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Validate configuration and check dependencies
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut checks: Vec<(String, String)> = Vec::new();
    let mut issues: Vec<String> = Vec::new();

    checks.push(("Config".to_string(), "Loaded".to_string()));
    checks.push((
        "Data directory".to_string(),
        config.core.data_dir.display().to_string(),
    ));

    // Database
    let database = match Database::new(&config.database_path()).await {
        Ok(database) => {
            checks.push(("Database connection".to_string(), "OK".to_string()));
            Some(database)
        }
        Err(e) => {
            checks.push(("Database connection".to_string(), "Failed".to_string()));
            issues.push(format!("Cannot open database: {:#}", e));
            None
        }
    };

    // Embedder
    match embedding::from_config(&config.embedding, &config.llm) {
        Ok(embedder) => {
            match embedder.embed("health check").await {
                Ok(_) => checks.push((
                    format!("Embedder ({})", embedder.name()),
                    format!("OK, {} dimensions", embedder.dimension()),
                )),
                Err(e) => {
                    checks.push((format!("Embedder ({})", embedder.name()), "Failed".to_string()));
                    issues.push(format!("Embedder is not responding: {}", e));
                }
            }

            if let Some(database) = &database {
                match open_store(config, database, &embedder).await {
                    Ok(store) => {
                        let count = store.count().await.unwrap_or(0);
                        checks.push(("Observations".to_string(), count.to_string()));
                        if count == 0 {
                            issues.push(
                                "Observation store is empty. Run 'ecu ingest <DIR>' first."
                                    .to_string(),
                            );
                        }
                    }
                    Err(e) => {
                        checks.push(("Corpus dimension".to_string(), "Mismatch".to_string()));
                        issues.push(format!("{:#}", e));
                    }
                }
            }
        }
        Err(e) => {
            checks.push(("Embedder".to_string(), "Misconfigured".to_string()));
            issues.push(e.to_string());
        }
    }

    // LLM providers
    match build_router(config) {
        Ok(router) => {
            let health = router.check_health().await;
            if !health.iter().any(|(_, healthy)| *healthy) {
                issues.push(
                    "No LLM provider is reachable. Start Ollama or set the OpenAI API key."
                        .to_string(),
                );
            }
            for (name, healthy) in health {
                let status = if healthy { "Available" } else { "Not available" };
                checks.push((format!("Provider {}", name), status.to_string()));
            }
        }
        Err(e) => {
            checks.push(("LLM providers".to_string(), "Misconfigured".to_string()));
            issues.push(format!("{:#}", e));
        }
    }

    if let Some(database) = database {
        database.close().await.ok();
    }

    match format {
        OutputFormat::Text => {
            println!("ECU System Diagnostics");
            println!("======================");
            println!();

            println!("System Checks:");
            for (check, status) in &checks {
                println!("  {:<25} {}", format!("{}:", check), status);
            }

            println!();

            if issues.is_empty() {
                println!("✓ All checks passed!");
            } else {
                println!("⚠ Issues found:");
                println!();
                for (i, issue) in issues.iter().enumerate() {
                    println!("  {}. {}", i + 1, issue);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "checks": checks.iter().map(|(name, status)| {
                    json!({
                        "name": name,
                        "status": status
                    })
                }).collect::<Vec<_>>(),
                "issues": issues,
                "healthy": issues.is_empty()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn print_outcome(outcome: &SessionOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("Answer:");
            println!("{}", outcome.answer);
            println!();
            if let Some(summary) = &outcome.summary {
                println!("Summary: {}", summary);
                println!();
            }
            if !outcome.uncertainties.is_empty() {
                println!("Uncertainties:");
                for uncertainty in &outcome.uncertainties {
                    println!("  - {}", uncertainty);
                }
                println!();
            }
            println!("Session:    {}", outcome.session_id);
            println!("Confidence: {:.1}/10", outcome.confidence);
            println!("Iterations: {}", outcome.iterations);
            if let Some(reason) = outcome.stop_reason {
                println!("Stopped:    {}", reason);
            }
            println!("Tokens:     {}", outcome.tokens_used);
            println!("Duration:   {}ms", outcome.duration_ms);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(outcome)?);
        }
    }
    Ok(())
}

fn print_session(session: &SessionRecord) {
    println!("Session: {}", session.id);
    println!();
    println!("Query:      {}", session.query);
    println!("Status:     {}", session.status.as_str());
    println!("Iterations: {}", session.iteration_count);
    println!("Confidence: {:.1}/10", session.confidence_score);
    if let Some(reason) = &session.stop_reason {
        println!("Stopped:    {}", reason);
    }
    println!("Tokens:     {}", session.tokens_used);
    println!("Created:    {}", format_timestamp(session.created_at));
    if let Some(completed) = session.completed_at {
        println!("Completed:  {}", format_timestamp(completed));
    }

    println!();
    match (&session.final_answer, session.status) {
        (Some(answer), _) => {
            println!("Answer:");
            println!("{}", answer);
        }
        (None, SessionStatus::InProgress) => {
            println!("No answer yet. Run 'ecu resume {}' to continue.", session.id)
        }
        (None, _) => println!("No answer available"),
    }

    if !session.evidence_trail.is_empty() {
        println!();
        println!("Evidence trail:");
        for (i, line) in session.evidence_trail.iter().enumerate() {
            println!("  {:>3}. {}", i + 1, line);
        }
    }
}

async fn write_outcome(outcome: &SessionOutcome, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(outcome)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn format_timestamp(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}
