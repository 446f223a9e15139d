//! CLI interface for ECU
//!
//! Commands and global flags, defined with clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ECU evidence reasoning engine
///
/// Answers questions over an ingested document corpus with an iterative,
/// bounded-memory reasoning loop.
#[derive(Parser, Debug)]
#[command(name = "ecu")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Answer a question
    Query {
        /// The question
        text: String,

        /// Session id to use instead of a generated one
        #[arg(long)]
        session: Option<String>,

        /// Override agent.max_iterations for this query
        #[arg(long, value_name = "N")]
        max_iterations: Option<u32>,

        /// Write the session outcome as JSON to this file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Ask questions in a prompt loop
    Interactive,

    /// Ingest a directory of .txt documents
    Ingest {
        /// Directory to walk
        dir: PathBuf,

        /// Process at most this many files
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List recent sessions
    Sessions {
        /// Number of sessions to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show one session with its evidence trail
    Session {
        /// Session ID
        id: String,
    },

    /// Continue an unfinished session from its last snapshot
    Resume {
        /// Session ID
        id: String,
    },

    /// Show corpus and session statistics
    Stats,

    /// Run system diagnostics
    Doctor,
}
