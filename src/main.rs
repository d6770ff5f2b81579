//! # Semantic Store CLI (`sstore`)
//!
//! ## Usage
//!
//! ```bash
//! sstore --config ./config/sstore.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sstore init` | Create the counter database and its table |
//! | `sstore query "<query>" --dir <DIR>` | Ingest a directory and run a search |
//! | `sstore counters` | Print aggregated cache counters |
//!
//! Logs go to stderr; set `RUST_LOG` or pass `--verbose` for more detail.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use semantic_store::config::{self, Config};
use semantic_store::counters::SqliteCounterSink;
use semantic_store::query_cmd::{run_query, QueryArgs};

/// Semantic Store CLI: chunk, embed, and search documents.
#[derive(Parser)]
#[command(
    name = "sstore",
    about = "Semantic Store: chunking, cached embeddings, and top-K similarity search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/sstore.toml`. A missing file means built-in
    /// defaults.
    #[arg(long, global = true, default_value = "./config/sstore.toml")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the cache counter database.
    ///
    /// Idempotent. Requires `[counters].path` in the config.
    Init,

    /// Ingest every `.md` and `.txt` file under a directory, then search.
    Query {
        /// Search text.
        query: String,

        /// Directory to ingest.
        #[arg(long)]
        dir: PathBuf,

        /// Source name recorded on every ingested document.
        #[arg(long, default_value = "files")]
        source: String,

        /// Tag recorded on every ingested document (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Number of results (1-20).
        #[arg(long)]
        top_k: Option<usize>,

        /// Minimum cosine similarity (0-1).
        #[arg(long)]
        min_score: Option<f32>,

        /// Only return chunks from this source.
        #[arg(long)]
        filter_source: Option<String>,

        /// Only return chunks carrying this tag (repeatable).
        #[arg(long = "filter-tag")]
        filter_tags: Vec<String>,

        /// Ollama host to use instead of the configured provider.
        #[arg(long)]
        host: Option<String>,

        /// Print results and stats as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print aggregated cache counters from the counter database.
    Counters,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load(path: &std::path::Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        debug!(path = %path.display(), "Config file not found; using defaults");
        Ok(Config::default())
    }
}

async fn counter_sink(cfg: &Config) -> Result<SqliteCounterSink> {
    let Some(path) = &cfg.counters.path else {
        bail!("[counters].path is not set in the config file");
    };
    SqliteCounterSink::connect(path, &cfg.counters.stats_id).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let sink = counter_sink(&cfg).await?;
            sink.close().await;
            println!("Counter database initialized successfully.");
        }
        Commands::Query {
            query,
            dir,
            source,
            tags,
            top_k,
            min_score,
            filter_source,
            filter_tags,
            host,
            json,
        } => {
            run_query(
                &cfg,
                QueryArgs {
                    query,
                    dir,
                    source,
                    tags,
                    top_k,
                    min_score,
                    filter_source,
                    filter_tags,
                    host,
                    json,
                },
            )
            .await?;
        }
        Commands::Counters => {
            let sink = counter_sink(&cfg).await?;
            let totals = sink.load_totals().await?;
            sink.close().await;

            let lookups = totals.hit_count + totals.miss_count;
            let rate = if lookups > 0 {
                totals.hit_count as f64 / lookups as f64 * 100.0
            } else {
                0.0
            };
            let updated = chrono::DateTime::from_timestamp(totals.updated_at, 0)
                .filter(|_| totals.updated_at > 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "never".to_string());

            println!("Embedding cache counters ({})", sink.stats_id());
            println!("  Hits:       {}", totals.hit_count);
            println!("  Misses:     {}", totals.miss_count);
            println!("  Evictions:  {}", totals.eviction_count);
            println!("  Hit rate:   {:.1}%", rate);
            println!("  Updated:    {}", updated);
        }
    }

    Ok(())
}
