//! # Thread Sync CLI (`tsync`)
//!
//! ## Usage
//!
//! ```bash
//! tsync --config ./config/tsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tsync index` | Embed changed items and upsert them into the vector index |
//! | `tsync upload` | Store changed item text in object storage |
//!
//! ## Examples
//!
//! ```bash
//! # Last three days of r/rust, at most 200 vectors
//! tsync index --lookback-days 3 --sub rust --max-vectors 200
//!
//! # Count what an upload would look at, without credentials
//! tsync upload --dry-run
//! ```
//!
//! Exit codes: `0` on success (including budget and rate-limit stops),
//! `1` on fatal errors, `2` on configuration errors.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use thread_sync::config::load_config;
use thread_sync::error::exit_code;
use thread_sync::index_cmd::run_index;
use thread_sync::progress::ProgressMode;
use thread_sync::run::SyncArgs;
use thread_sync::upload_cmd::run_upload;

/// Incremental sync of staged discussion threads into a vector index and
/// object storage.
#[derive(Parser)]
#[command(name = "tsync", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tsync.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed changed items and upsert them into the vector index.
    Index {
        #[command(flatten)]
        window: WindowArgs,

        /// Override `index.max_vectors_per_run`.
        #[arg(long)]
        max_vectors: Option<u64>,
    },

    /// Store changed item text in object storage.
    Upload {
        #[command(flatten)]
        window: WindowArgs,

        /// Override `upload.max_objects_per_run` (0 = unlimited).
        #[arg(long)]
        max_objects: Option<u64>,
    },
}

#[derive(Args)]
struct WindowArgs {
    /// Override `staging.lookback_days` (0 or less scans everything).
    #[arg(long, allow_negative_numbers = true)]
    lookback_days: Option<i64>,

    /// Subreddit to scan; repeat for several. Replaces the configured list.
    #[arg(long = "sub")]
    subreddits: Vec<String>,

    /// Scan and fingerprint only; no credentials or network needed.
    #[arg(long)]
    dry_run: bool,
}

impl WindowArgs {
    fn into_sync_args(self, max_per_run: Option<u64>) -> SyncArgs {
        SyncArgs {
            lookback_days: self.lookback_days,
            subreddits: self.subreddits,
            max_per_run,
            dry_run: self.dry_run,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli.config)?;
    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    match cli.command {
        Commands::Index {
            window,
            max_vectors,
        } => {
            run_index(&config, &window.into_sync_args(max_vectors), progress.as_ref()).await?;
        }
        Commands::Upload {
            window,
            max_objects,
        } => {
            run_upload(&config, &window.into_sync_args(max_objects), progress.as_ref()).await?;
        }
    }

    Ok(())
}
