//! `tsync index`: embed changed items and upsert them into the vector index.

use anyhow::Result;

use crate::artifact::ArtifactTarget;
use crate::config::Config;
use crate::embedding::create_provider;
use crate::error::ConfigError;
use crate::executor::{ExecutorSettings, TokioSleeper};
use crate::models::ContentKind;
use crate::progress::SyncProgressReporter;
use crate::run::{run_sync, survey, RunOptions, RunReport, SyncArgs};
use crate::scanner::scan_window;
use crate::staged::ParquetReader;
use crate::vectorize::{VectorIndexSink, VectorizeClient, VectorizeCredentials};

pub async fn run_index(
    config: &Config,
    args: &SyncArgs,
    progress: &dyn SyncProgressReporter,
) -> Result<RunReport> {
    let index = config.require_index()?;
    let max_per_run = args.max_per_run.unwrap_or(index.max_vectors_per_run);
    if max_per_run == 0 {
        return Err(ConfigError::invalid("--max-vectors must be > 0").into());
    }
    let subreddits = args.subreddits(&config.staging.subreddits);
    if subreddits.is_empty() {
        return Err(ConfigError::invalid("no subreddits configured; set staging.subreddits or pass --sub").into());
    }
    let lookback = args.lookback_days.unwrap_or(config.staging.lookback_days);

    if args.dry_run {
        let candidates = scan_window(&config.staging.root, subreddits, &ContentKind::ALL, lookback)?;
        let report = survey(
            &format!("index:{}", index.name),
            &candidates,
            &ParquetReader,
            config.staging.max_chars,
            max_per_run,
        );
        report.print("index run");
        return Ok(report);
    }

    // Everything that can be misconfigured is checked before the first request.
    let creds = VectorizeCredentials::from_env()?;
    let embedder = create_provider(&config.embedding)?;
    tracing::info!(
        index = %index.name,
        model = embedder.model_name(),
        dims = embedder.dims(),
        "index run starting"
    );
    let client = VectorizeClient::new(index, &creds)?;
    let sink = VectorIndexSink::new(&index.name, client, embedder);

    let candidates = scan_window(&config.staging.root, subreddits, &ContentKind::ALL, lookback)?;

    let opts = RunOptions {
        max_per_run,
        flush_size: index.probe_batch_size,
        probe_batch_size: index.probe_batch_size,
        max_chars: config.staging.max_chars,
        executor: ExecutorSettings::from_pacing(config.index_pacing(), index.write_batch_size),
        artifact: ArtifactTarget::new(&index.artifact_dir, "index"),
    };

    let report = run_sync(
        &candidates,
        &ParquetReader,
        &sink,
        &opts,
        &TokioSleeper,
        progress,
    )
    .await?;
    report.print("index run");
    Ok(report)
}
