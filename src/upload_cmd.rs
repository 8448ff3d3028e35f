//! `tsync upload`: store changed item text in object storage.
//!
//! `max_objects_per_run = 0` means no cap.

use anyhow::Result;

use crate::artifact::ArtifactTarget;
use crate::config::{Config, MAX_PROBE_BATCH};
use crate::error::ConfigError;
use crate::executor::{ExecutorSettings, TokioSleeper};
use crate::models::ContentKind;
use crate::object_store::{ObjectStoreClient, ObjectStoreCredentials, ObjectStoreSink};
use crate::progress::SyncProgressReporter;
use crate::run::{run_sync, survey, RunOptions, RunReport, SyncArgs};
use crate::scanner::scan_window;
use crate::staged::ParquetReader;

fn budget(configured: u64) -> u64 {
    if configured == 0 {
        u64::MAX
    } else {
        configured
    }
}

pub async fn run_upload(
    config: &Config,
    args: &SyncArgs,
    progress: &dyn SyncProgressReporter,
) -> Result<RunReport> {
    let upload = config.require_upload()?;
    let max_per_run = budget(args.max_per_run.unwrap_or(upload.max_objects_per_run));
    let subreddits = args.subreddits(&config.staging.subreddits);
    if subreddits.is_empty() {
        return Err(ConfigError::invalid("no subreddits configured; set staging.subreddits or pass --sub").into());
    }
    let lookback = args.lookback_days.unwrap_or(config.staging.lookback_days);
    let label = format!("objects:{}", upload.bucket);

    if args.dry_run {
        let candidates = scan_window(&config.staging.root, subreddits, &ContentKind::ALL, lookback)?;
        let report = survey(
            &label,
            &candidates,
            &ParquetReader,
            config.staging.max_chars,
            max_per_run,
        );
        report.print("upload run");
        return Ok(report);
    }

    let creds = ObjectStoreCredentials::from_env(upload.endpoint_url.as_deref())?;
    let client = ObjectStoreClient::new(upload, &creds)?;
    let sink = ObjectStoreSink::new(client, &upload.prefix, upload.check_exists);

    let candidates = scan_window(&config.staging.root, subreddits, &ContentKind::ALL, lookback)?;

    let opts = RunOptions {
        max_per_run,
        flush_size: upload.flush_size,
        probe_batch_size: MAX_PROBE_BATCH,
        max_chars: config.staging.max_chars,
        executor: ExecutorSettings::from_pacing(config.upload_pacing(), upload.write_batch_size),
        artifact: ArtifactTarget::new(&upload.artifact_dir, "upload"),
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
    report.print("upload run");
    Ok(report)
}
