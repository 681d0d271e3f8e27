//! # Quarry CLI
//!
//! ## Commands
//!
//! - `daemon` - run the indexer and its control surface
//! - `status` - ask a running daemon for its state
//! - `index` - index a location through a running daemon
//! - `start` / `stop` / `pause` / `resume` - drive a running daemon
//! - `query` - run a pattern query against a running daemon
//! - `info` - show what the index holds for a path (daemon stopped)
//! - `extract` - run an extractor over one file, also the worker entry point
//! - `reset` - delete the index

mod commands;

use crate::client::ClientError;
use crate::engine::EngineError;
use clap::{Parser, Subcommand};
use quarry_core::{Config, QuarryError};
use std::path::PathBuf;

pub use commands::*;

/// Errors surfaced by CLI commands.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] QuarryError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Client(#[from] ClientError),

    /// The daemon handled the request and reported failure.
    #[error("{0}")]
    Failed(String),
}

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Quarry - incremental desktop indexer
///
/// Keeps a resource graph of the files under the configured directories up
/// to date, extracting metadata from the ones that changed.
#[derive(Parser, Debug)]
#[command(name = "quarry")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (defaults to $QUARRY_CONFIG, then built-in defaults)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Address of a running daemon
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    pub url: String,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json_mode: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the indexer with its HTTP control surface
    Daemon {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Show the state of a running daemon
    Status,

    /// Index a file or directory now
    Index {
        path: PathBuf,

        /// Index everything below a directory
        #[arg(short, long)]
        recursive: bool,

        /// Only accept these content graphs (repeatable)
        #[arg(short, long = "graph")]
        graphs: Vec<String>,
    },

    /// Resume dispatching
    Start,

    /// Hold dispatching; queued work is kept
    Stop,

    /// Pause indexing on behalf of an application
    Pause {
        #[arg(short, long, default_value = "quarry-cli")]
        application: String,

        #[arg(short, long, default_value = "")]
        reason: String,
    },

    /// Release a pause taken with `pause`
    Resume { cookie: u32 },

    /// Query the graph, one triple pattern per line (`?s nie:url ?u`)
    Query {
        patterns: String,

        /// Restrict matching to one named graph
        #[arg(short, long)]
        graph: Option<String>,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show the indexed resources of a path
    Info { path: PathBuf },

    /// Run an extractor over one file
    Extract {
        path: PathBuf,

        /// Print a single worker reply on stdout (used by process isolation)
        #[arg(long)]
        worker: bool,

        /// Module to run (default: chosen by MIME type)
        #[arg(short, long)]
        module: Option<String>,

        /// MIME type (default: guessed from the file name)
        #[arg(long)]
        mime: Option<String>,
    },

    /// Delete the index database
    Reset {
        /// Skip the confirmation check
        #[arg(short, long)]
        force: bool,
    },
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// The `--config` file, else `$QUARRY_CONFIG`, else defaults.
pub fn load_config(path: Option<&PathBuf>) -> Result<Config, QuarryError> {
    let path = path
        .cloned()
        .or_else(|| std::env::var_os("QUARRY_CONFIG").map(PathBuf::from));
    match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Loading configuration");
            Config::load(path)
        }
        None => {
            let mut config = Config::default();
            config.expand_home(quarry_core::config::home_dir().as_deref());
            config.validate()?;
            Ok(config)
        }
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

pub async fn execute(cli: Cli) -> Result<(), CliError> {
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Daemon { host, port }) => {
            let config = load_config(cli.config.as_ref())?;
            cmd_daemon(config, &host, port).await
        }
        Some(Commands::Index {
            path,
            recursive,
            graphs,
        }) => cmd_index(&cli.url, json_mode, &path, recursive, graphs).await,
        Some(Commands::Start) => cmd_start(&cli.url, json_mode).await,
        Some(Commands::Stop) => cmd_stop(&cli.url, json_mode).await,
        Some(Commands::Pause {
            application,
            reason,
        }) => cmd_pause(&cli.url, json_mode, &application, &reason).await,
        Some(Commands::Resume { cookie }) => cmd_resume(&cli.url, json_mode, cookie).await,
        Some(Commands::Query {
            patterns,
            graph,
            limit,
        }) => cmd_query(&cli.url, json_mode, &patterns, graph, limit).await,
        Some(Commands::Info { path }) => {
            let config = load_config(cli.config.as_ref())?;
            cmd_info(&config, json_mode, &path)
        }
        Some(Commands::Extract {
            path,
            worker,
            module,
            mime,
        }) => cmd_extract(json_mode, &path, worker, module, mime),
        Some(Commands::Reset { force }) => {
            let config = load_config(cli.config.as_ref())?;
            cmd_reset(&config, force)
        }
        Some(Commands::Status) | None => cmd_status(&cli.url, json_mode).await,
    }
}
