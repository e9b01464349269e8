//! # Persona Bridge CLI (`persona-bridge`)
//!
//! ## Usage
//!
//! ```bash
//! persona-bridge --config ./config/persona-bridge.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `persona-bridge init` | Create the collections database and schema |
//! | `persona-bridge load <collection> <dir>` | Load a directory of documents into a collection |
//! | `persona-bridge collections` | List configured collections and document counts |
//! | `persona-bridge prompt "<message>"` | Print the assembled transcript for one message |
//! | `persona-bridge serve` | Start the OpenAI-compatible HTTP server |
//!
//! Without `--config`, built-in defaults are used.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use persona_bridge::config::{self, Config};
use persona_bridge::{ingest, inspect, migrate, server};

/// Persona Bridge: an OpenAI-compatible front for a local chat CLI, with
/// retrieval-grounded persona prompts.
#[derive(Parser)]
#[command(name = "persona-bridge", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the collections database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Load `*.md` / `*.txt` files from a directory into a collection.
    ///
    /// Re-loading a file replaces the stored document.
    Load {
        /// Collection key (`corpus`, `humor`, ...) or store name.
        collection: String,

        /// Directory to scan recursively.
        dir: PathBuf,

        /// Store each blank-line separated paragraph as its own document.
        #[arg(long)]
        split_paragraphs: bool,
    },

    /// List configured collections and their document counts.
    Collections,

    /// Print the transcript that would be sent to the backend.
    Prompt {
        /// The user message; also used as the retrieval query.
        message: String,
    },

    /// Start the HTTP server.
    Serve {
        /// Override `[server].host`.
        #[arg(long)]
        host: Option<String>,

        /// Override `[server].port`.
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Init => {
            migrate::run_init(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Load {
            collection,
            dir,
            split_paragraphs,
        } => {
            ingest::run_load(&cfg, &collection, &dir, split_paragraphs).await?;
        }
        Commands::Collections => {
            inspect::list_collections(&cfg).await?;
        }
        Commands::Prompt { message } => {
            inspect::run_prompt(&cfg, &message).await?;
        }
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                cfg.server.host = host;
            }
            if let Some(port) = port {
                cfg.server.port = port;
            }
            cfg.validate()?;
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
