//! # Quarry - desktop indexing daemon
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     apps/quarry (THE DAEMON)                 │
//! │                                                              │
//! │  ┌──────────┐   ┌──────────────┐   ┌──────────────────────┐  │
//! │  │   CLI    │   │   HTTP API   │   │   Monitor (notify)   │  │
//! │  │  (clap)  │   │    (axum)    │   │                      │  │
//! │  └────┬─────┘   └──────┬───────┘   └──────────┬───────────┘  │
//! │       └────────────────┼──────────────────────┘              │
//! │                        ▼                                     │
//! │              ┌───────────────────┐     ┌─────────────────┐   │
//! │              │   engine loop     │────►│ ExtractorGateway│   │
//! │              └─────────┬─────────┘     └─────────────────┘   │
//! │                        ▼                                     │
//! │              ┌───────────────────┐                           │
//! │              │    quarry-core    │                           │
//! │              └───────────────────┘                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! quarry daemon --port 8080
//! quarry status
//! quarry index -r ~/Music
//! quarry query '?f nie:mimeType "audio/mpeg"'
//! ```
//!
//! Logs go to stderr: `quarry extract --worker` reserves stdout for its
//! reply.

use clap::Parser;
use quarry::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // QUARRY_LOG_FORMAT=json switches to machine-readable logs.
    let log_format = std::env::var("QUARRY_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if cli.verbose {
        "quarry=debug,quarry_core=debug,tower_http=debug"
    } else {
        "quarry=info,quarry_core=info,tower_http=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    eprintln!(
        r#"
   ___  _   _  __ _ _ __ _ __ _   _
  / _ \| | | |/ _` | '__| '__| | | |
 | (_) | |_| | (_| | |  | |  | |_| |
  \__, |\__,_|\__,_|_|  |_|   \__, |
     |_|                      |___/

  Desktop indexer v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
