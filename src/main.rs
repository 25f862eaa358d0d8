//! # Groundwork CLI (`gw`)
//!
//! ## Usage
//!
//! ```bash
//! gw --config ./config/gw.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gw ingest` | Sync the chunk store and indexes with the source directory |
//! | `gw ingest --reseed` | Discard all stored state and rebuild from scratch |
//! | `gw search "<question>"` | Retrieve grounding passages for a question |
//! | `gw status` | Summarize what is indexed |
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` level), so
//! stdout stays parseable, e.g. `gw search "..." --json | jq`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use groundwork::config::{self, RetrievalMode};
use groundwork::{ingest, retrieve, status};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Groundwork: incremental ingestion and hybrid retrieval for grounded answers.
#[derive(Parser)]
#[command(
    name = "gw",
    version,
    about = "Incremental document ingestion and hybrid retrieval",
    long_about = "Groundwork keeps a chunk store in sync with a directory of documents \
    (markdown, text, PDF, DOCX), re-chunking only what changed, and retrieves grounding \
    passages by fusing semantic and BM25 rankings, optionally reranked by an LLM judge."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/gw.toml`.
    #[arg(long, global = true, default_value = "./config/gw.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest the source directory.
    ///
    /// New and changed files are re-chunked, deleted files are purged and
    /// unchanged files are left alone. Files that fail to load are reported
    /// and retried on the next run.
    Ingest {
        /// Discard chunk store, manifest and vectors, then rebuild.
        ///
        /// Required after changing to an embedding model with a different
        /// dimension.
        #[arg(long)]
        reseed: bool,
    },

    /// Retrieve passages for a question.
    Search {
        /// The question.
        question: String,

        /// Retrieval mode; defaults to `retrieval.mode` from the config.
        #[arg(long, value_enum)]
        mode: Option<RetrievalMode>,

        /// Number of passages; defaults to `retrieval.default_top_k`.
        #[arg(long)]
        top_k: Option<usize>,

        /// Print passages as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show manifest and index status.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { reseed } => {
            ingest::run_ingest(&cfg, reseed).await?;
        }
        Commands::Search {
            question,
            mode,
            top_k,
            json,
        } => {
            retrieve::run_search(&cfg, &question, mode, top_k, json).await?;
        }
        Commands::Status => {
            status::run_status(&cfg)?;
        }
    }

    Ok(())
}
