//! # Vakil CLI (`vakil`)
//!
//! ## Usage
//!
//! ```bash
//! vakil --config ./config/vakil.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vakil init` | Create the SQLite database and run schema migrations |
//! | `vakil ingest` | Chunk, embed and index the legal corpus |
//! | `vakil search "<query>"` | Show the corpus chunks closest to a query |
//! | `vakil analyze <file>` | Run NDA risk analysis on a local PDF or text file |
//! | `vakil serve` | Start the HTTP server |

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use vakil::{config, document, ingest, migrate, search, server, telemetry};

/// Vakil: retrieval-augmented legal counsel over Indian law.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/vakil.example.toml` for a full example. API keys and
/// the internal shared secret are read from the environment (and from a
/// `.env` file in the working directory, if present).
#[derive(Parser)]
#[command(
    name = "vakil",
    about = "Vakil: NDA risk analysis and legal chat grounded in Indian law",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vakil.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and its tables (documents, chunks,
    /// chunk_vectors). Safe to run repeatedly.
    Init,

    /// Index the legal corpus.
    ///
    /// Loads `[corpus].path`, splits it into overlapping chunks, embeds them
    /// and stores everything in SQLite. Unchanged sources are skipped.
    Ingest {
        /// Show document and chunk counts without writing or embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the corpus chunks most similar to a query.
    Search {
        query: String,

        /// Number of chunks to show (defaults to `[retrieval].top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Analyse a local PDF or text file and print the JSON result.
    Analyze {
        path: PathBuf,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the environment may already be populated.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing(telemetry::DEFAULT_DIRECTIVE);

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { dry_run } => {
            ingest::run_ingest(&cfg, dry_run).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Analyze { path } => {
            let full_text = tokio::task::spawn_blocking({
                let path = path.clone();
                move || document::extract_file(&path)
            })
            .await?
            .with_context(|| format!("Failed to read {}", path.display()))?;

            let counsel = server::build_counsel(&cfg).await?;
            let outcome = counsel.analyze(&full_text).await?;
            println!("{}", serde_json::to_string_pretty(&outcome.into_value())?);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
