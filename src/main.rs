//! # RagFin CLI (`ragfin`)
//!
//! The `ragfin` binary drives the whole pipeline: database setup, scraper
//! orchestration, JSON combination, indexing, ad-hoc queries, and the
//! chat API server.
//!
//! ## Usage
//!
//! ```bash
//! ragfin --config ./config/ragfin.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragfin init` | Create the SQLite database and run schema migrations |
//! | `ragfin scrape` | Run every scraper script to completion |
//! | `ragfin combine` | Merge scraper JSON output into the combined file |
//! | `ragfin index` | Chunk and embed combined output into the store |
//! | `ragfin pipeline` | scrape → combine → index in one run |
//! | `ragfin query "<text>"` | Ask a question from the command line |
//! | `ragfin serve` | Start the chat API server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ragfin::{combiner, config, db, index, llm, migrate, retriever, runner, server};

/// RagFin CLI — a retrieval-augmented assistant for Indian financial
/// regulation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragfin.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ragfin",
    about = "RagFin — scrape, index, and query Indian financial notifications",
    version,
    long_about = "RagFin orchestrates scraper scripts that collect RBI and Income Tax \
    notifications, merges their JSON output, indexes the text into a SQLite vector store, \
    and serves a chat API that answers questions grounded in the latest circulars."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragfin.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Run every scraper script in the configured directory.
    ///
    /// Each script runs as its own process under a wall-clock timeout;
    /// runaway scripts are terminated. Prints a launch/completion tally.
    Scrape,

    /// Merge scraper JSON output into the combined file.
    ///
    /// Gathers every JSON file the scrapers wrote and produces a single
    /// top-level array next to them. Malformed files are skipped.
    Combine,

    /// Index the combined file into the notification store.
    ///
    /// Validates records, chunks their content, and embeds the chunks
    /// when an embedding provider is configured. Unchanged records are
    /// skipped.
    Index {
        /// Show record and chunk counts without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run the full pipeline: scrape, combine, then index.
    Pipeline,

    /// Ask a question from the command line.
    ///
    /// Retrieves the most relevant notification chunks and, unless
    /// `--retrieve-only` is set, forwards them to the LLM for an answer.
    Query {
        /// The question to ask.
        query: String,

        /// Number of chunks to retrieve (defaults to `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Print the retrieved chunks without calling the LLM.
        #[arg(long)]
        retrieve_only: bool,
    },

    /// Start the chat API server.
    ///
    /// Binds to `[server].bind` and serves the query, upload, and chat
    /// history endpoints.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ragfin=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Scrape => {
            run_scrape(&cfg).await?;
        }
        Commands::Combine => {
            run_combine(&cfg)?;
        }
        Commands::Index { dry_run } => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            index::run_index(&cfg, &pool, dry_run).await?;
            pool.close().await;
        }
        Commands::Pipeline => {
            run_scrape(&cfg).await?;
            run_combine(&cfg)?;
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            index::run_index(&cfg, &pool, false).await?;
            pool.close().await;
        }
        Commands::Query {
            query,
            top_k,
            retrieve_only,
        } => {
            let pool = db::connect(&cfg).await?;
            let k = top_k.unwrap_or(cfg.retrieval.top_k);
            let retrieved = retriever::semantic_search(&cfg, &pool, &query, k).await?;

            if retrieved.is_empty() {
                println!("No matching notifications found.");
            }
            for c in &retrieved {
                println!("[{:.3}] {} (chunk {})", c.score, c.source_key, c.chunk_index);
                if let Some(num) = &c.notification_number {
                    println!("        {}", num);
                }
            }

            if !retrieve_only {
                let rag_context: Vec<String> = retrieved.iter().map(|c| c.text.clone()).collect();
                let prompt = llm::build_prompt(&query, &rag_context, &[], cfg.llm.max_context_chars);
                let answer = llm::get_llm_response(&cfg.llm, &prompt).await?;
                println!();
                println!("{}", answer);
            }

            pool.close().await;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_scrape(cfg: &config::Config) -> anyhow::Result<()> {
    let summary = runner::run_scripts(&cfg.scrapers).await?;
    println!("scrape {}", cfg.scrapers.dir.display());
    println!("  launched: {}", summary.launched);
    println!("  completed: {}", summary.completed);
    println!("  timed out: {}", summary.timed_out);
    if summary.spawn_failures > 0 {
        println!("  spawn failures: {}", summary.spawn_failures);
    }
    if summary.abandoned > 0 {
        println!("  abandoned: {}", summary.abandoned);
    }
    println!("ok");
    Ok(())
}

fn run_combine(cfg: &config::Config) -> anyhow::Result<()> {
    let summary = combiner::combine(&cfg.scrapers)?;
    println!("combine {}", summary.output.display());
    println!("  files read: {}", summary.files_read);
    println!("  files skipped: {}", summary.files_skipped);
    println!("  records: {}", summary.records);
    println!("ok");
    Ok(())
}
