// ECU evidence reasoning engine
// Main entry point for the ecu binary

use clap::Parser;
use ecu_engine::cli::{Cli, Command};
use ecu_engine::config::Config;
use ecu_engine::handlers::{
    handle_doctor, handle_ingest, handle_interactive, handle_query, handle_resume, handle_session,
    handle_sessions, handle_stats, OutputFormat,
};
use ecu_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");
    tracing::debug!("ECU Engine v{} ({} - {})", version, commit, timestamp);

    match cli.command {
        Command::Query {
            text,
            session,
            max_iterations,
            output,
        } => {
            tracing::info!("Executing query: {}", text);
            handle_query(text, session, max_iterations, output, &config, format).await
        }

        Command::Interactive => handle_interactive(&config, format).await,

        Command::Ingest { dir, limit } => {
            tracing::info!("Ingesting documents from {}", dir.display());
            handle_ingest(dir, limit, &config, format).await
        }

        Command::Sessions { limit } => handle_sessions(limit, &config, format).await,

        Command::Session { id } => handle_session(id, &config, format).await,

        Command::Resume { id } => {
            tracing::info!("Resuming session: {}", id);
            handle_resume(id, &config, format).await
        }

        Command::Stats => handle_stats(&config, format).await,

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }
    }
}
