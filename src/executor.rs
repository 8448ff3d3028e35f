//! Batched sync executor.
//!
//! Writes a planned set of items in fixed-size chunks. Each chunk is handed
//! to [`RemoteSink::write`], which converts the text to the remote payload
//! and writes it. Rate limiting is the only retried condition:
//!
//! ```text
//! delay(attempt) = retry_backoff × 2^attempt      attempt = 0, 1, .. retry_max-1
//! ```
//!
//! A retry resends only the items of the chunk the sink did not accept.
//! When retries run out the executor stops, keeps what it already wrote, and
//! reports `stopped` so the caller can end the run cleanly. Any other failure
//! aborts the run; the artifact of that flush is kept and its path is
//! attached to the error. Between successful chunks it sleeps a fixed pace plus a
//! bounded random jitter.

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use std::path::PathBuf;
use std::time::Duration;

use crate::artifact::{ArtifactTarget, ArtifactWriter};
use crate::config::PacingConfig;
use crate::models::ContentItem;
use crate::sink::{ChunkWrite, Outcome, RemoteSink};

/// Source of delays. Production code sleeps on the tokio timer; tests
/// record the requested durations instead.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Items per remote write call.
    pub write_batch_size: usize,
    pub retry_max: u32,
    pub retry_backoff: Duration,
    /// Fixed pause after each successful chunk.
    pub pace: Duration,
    /// Upper bound of the random addition to `pace`, in milliseconds.
    pub jitter_ms: u64,
}

impl ExecutorSettings {
    pub fn from_pacing(pacing: &PacingConfig, write_batch_size: usize) -> Self {
        Self {
            write_batch_size: write_batch_size.max(1),
            retry_max: pacing.retry_max,
            retry_backoff: Duration::from_millis(pacing.retry_backoff_ms),
            pace: Duration::from_millis(pacing.sleep_ms),
            jitter_ms: pacing.jitter_ms,
        }
    }

    fn pacing_delay(&self) -> Duration {
        if self.jitter_ms == 0 {
            return self.pace;
        }
        let jitter = rand::rng().random_range(0..=self.jitter_ms);
        self.pace + Duration::from_millis(jitter)
    }
}

/// `base × 2^attempt`, saturating.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

/// What one flush accomplished.
#[derive(Debug, Default)]
pub struct FlushResult {
    /// Items the remote accepted.
    pub written: u64,
    /// Rate-limit retries ran out; the caller should end the run.
    pub stopped: bool,
    /// Artifact path, if anything was written.
    pub artifact: Option<PathBuf>,
}

/// Write `items` (already diffed and budget-truncated) through `sink`.
pub async fn execute_plan(
    sink: &dyn RemoteSink,
    items: &[ContentItem],
    settings: &ExecutorSettings,
    sleeper: &dyn Sleeper,
    target: &ArtifactTarget,
) -> Result<FlushResult> {
    let mut result = FlushResult::default();
    if items.is_empty() {
        return Ok(result);
    }

    let mut artifact = ArtifactWriter::create(target)?;
    let chunks: Vec<&[ContentItem]> = items.chunks(settings.write_batch_size.max(1)).collect();
    let total = items.len();

    'chunks: for (idx, chunk) in chunks.iter().enumerate() {
        let mut attempt: u32 = 0;
        let mut pending: &[ContentItem] = chunk;

        loop {
            let ChunkWrite { accepted, outcome } = sink.write(pending).await;
            if !accepted.is_empty() {
                artifact.append(&accepted)?;
                result.written += accepted.len() as u64;
                pending = &pending[accepted.len().min(pending.len())..];
            }

            match outcome {
                Outcome::Success(()) => break,
                Outcome::RateLimited(detail) => {
                    if attempt >= settings.retry_max {
                        tracing::warn!(
                            sink = %sink.label(),
                            written = result.written,
                            retries = attempt,
                            reason = %detail,
                            "rate limit retries exhausted, stopping"
                        );
                        result.stopped = true;
                        break 'chunks;
                    }
                    let delay = backoff_delay(settings.retry_backoff, attempt);
                    attempt += 1;
                    tracing::warn!(
                        sink = %sink.label(),
                        attempt,
                        retry_max = settings.retry_max,
                        sleep_ms = delay.as_millis() as u64,
                        reason = %detail,
                        "rate limited, backing off"
                    );
                    sleeper.sleep(delay).await;
                }
                Outcome::Failed(e) => {
                    let e = e.context(format!(
                        "write to {} failed after {} items",
                        sink.label(),
                        result.written
                    ));
                    return Err(keep_partial_artifact(artifact, e));
                }
            }
        }

        tracing::info!(sink = %sink.label(), done = result.written, total, "write progress");

        if idx + 1 < chunks.len() {
            let delay = settings.pacing_delay();
            if !delay.is_zero() {
                sleeper.sleep(delay).await;
            }
        }
    }

    let lines = artifact.lines();
    result.artifact = artifact.finish()?;
    if let Some(path) = &result.artifact {
        tracing::info!(path = %path.display(), lines, "emitted artifact");
    }
    Ok(result)
}

/// Close the artifact of an aborted flush. The remote error stays the
/// primary cause; the retained path is attached to it.
fn keep_partial_artifact(artifact: ArtifactWriter, err: anyhow::Error) -> anyhow::Error {
    let lines = artifact.lines();
    match artifact.finish() {
        Ok(Some(path)) => {
            tracing::warn!(path = %path.display(), lines, "kept artifact of aborted flush");
            err.context(format!("partial artifact kept at {}", path.display()))
        }
        Ok(None) => err,
        Err(finish_err) => {
            tracing::warn!(error = %finish_err, "failed to close artifact of aborted flush");
            err
        }
    }
}
