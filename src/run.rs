//! Run accumulator: the sync loop.
//!
//! Drives one run from scanned candidates to a terminal state:
//!
//! ```text
//! SCANNING → BUFFERING → PROBING → DIFFING → WRITING ─┐
//!     ▲                                               │
//!     └───────────── next file ◀──────────────────────┘
//!                         │
//!                         ▼
//!                     TERMINAL  (input exhausted | budget exhausted | rate limited)
//! ```
//!
//! Items are buffered until `flush_size` is reached, then probed, diffed,
//! budget-truncated and written. All counters live in a [`RunState`] that is
//! passed into and returned from each flush. Only accepted writes advance
//! `total_written`, so the counter never overstates what the remote holds.
//! Nothing is resumed across restarts; fingerprint diffing makes a rerun
//! from the scanner cheap.

use anyhow::Result;
use std::fmt;
use std::path::PathBuf;

use crate::artifact::ArtifactTarget;
use crate::executor::{execute_plan, ExecutorSettings, Sleeper};
use crate::fingerprint::build_items;
use crate::models::{ContentItem, StagedFile};
use crate::planner::{plan_writes, prepare_batch};
use crate::probe::probe_remote;
use crate::progress::{format_budget, SyncProgressEvent, SyncProgressReporter};
use crate::sink::RemoteSink;
use crate::staged::StagedReader;

/// How often (in parsed files) a parsing progress event is emitted.
const PROGRESS_EVERY: u64 = 50;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    InputExhausted,
    BudgetExhausted,
    RateLimited,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::InputExhausted => "input_exhausted",
            StopReason::BudgetExhausted => "budget_exhausted",
            StopReason::RateLimited => "rate_limited",
        })
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub total_written: u64,
    pub files_parsed: u64,
    /// Staged files that produced no text at all.
    pub empty_records: u64,
    /// Files the reader could not decode.
    pub unreadable: u64,
    pub items_seen: u64,
    pub skipped_unchanged: u64,
    pub deferred: u64,
    pub flushes: u64,
    pub artifacts: Vec<PathBuf>,
    pub stop: Option<StopReason>,
}

impl RunState {
    /// Writes still allowed under `max_per_run`.
    pub fn remaining(&self, max_per_run: u64) -> u64 {
        max_per_run.saturating_sub(self.total_written)
    }
}

/// Per-invocation overrides taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct SyncArgs {
    pub lookback_days: Option<i64>,
    /// Replaces the configured subreddit list when non-empty.
    pub subreddits: Vec<String>,
    pub max_per_run: Option<u64>,
    pub dry_run: bool,
}

impl SyncArgs {
    pub fn subreddits<'a>(&'a self, configured: &'a [String]) -> &'a [String] {
        if self.subreddits.is_empty() {
            configured
        } else {
            &self.subreddits
        }
    }
}

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Hard cap on writes; `u64::MAX` for unlimited.
    pub max_per_run: u64,
    /// Buffered items that trigger a flush.
    pub flush_size: usize,
    /// Ids per remote lookup call.
    pub probe_batch_size: usize,
    pub max_chars: usize,
    pub executor: ExecutorSettings,
    pub artifact: ArtifactTarget,
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub sink: String,
    pub candidates: u64,
    pub max_per_run: u64,
    pub dry_run: bool,
    pub state: RunState,
}

impl RunReport {
    /// Print the summary on stdout.
    pub fn print(&self, command: &str) {
        let state = &self.state;
        if self.dry_run {
            println!("{} (dry-run)", command);
        } else {
            println!("{}", command);
        }
        println!("  sink: {}", self.sink);
        println!("  candidates: {}", self.candidates);
        println!("  files parsed: {}", state.files_parsed);
        println!("  empty records: {}", state.empty_records);
        if state.unreadable > 0 {
            println!("  unreadable files: {}", state.unreadable);
        }
        println!("  items seen: {}", state.items_seen);
        if !self.dry_run {
            println!("  unchanged: {}", state.skipped_unchanged);
            println!("  deferred: {}", state.deferred);
            println!(
                "  written: {} / {}",
                state.total_written,
                format_budget(self.max_per_run)
            );
            println!("  artifacts: {}", state.artifacts.len());
            for path in &state.artifacts {
                println!("    {}", path.display());
            }
        }
        if let Some(stop) = state.stop {
            println!("  stop: {}", stop);
        }
        println!("ok");
    }
}

struct RunContext<'a> {
    sink: &'a dyn RemoteSink,
    opts: &'a RunOptions,
    sleeper: &'a dyn Sleeper,
    progress: &'a dyn SyncProgressReporter,
}

/// Read and fingerprint one file, counting unreadable files instead of
/// failing the run.
fn read_items(
    file: &StagedFile,
    reader: &dyn StagedReader,
    max_chars: usize,
    state: &mut RunState,
) -> Option<Vec<ContentItem>> {
    match build_items(file, reader, max_chars) {
        Ok(items) => Some(items),
        Err(e) => {
            tracing::warn!(path = %file.path.display(), error = %e, "skipping unreadable staged file");
            state.unreadable += 1;
            None
        }
    }
}

/// Run the full sync loop over `candidates`.
pub async fn run_sync(
    candidates: &[StagedFile],
    reader: &dyn StagedReader,
    sink: &dyn RemoteSink,
    opts: &RunOptions,
    sleeper: &dyn Sleeper,
    progress: &dyn SyncProgressReporter,
) -> Result<RunReport> {
    let ctx = RunContext {
        sink,
        opts,
        sleeper,
        progress,
    };
    let total = candidates.len() as u64;
    let flush_size = opts.flush_size.max(1);

    progress.report(SyncProgressEvent::Scanned {
        sink: sink.label(),
        candidates: total,
    });
    tracing::info!(sink = %sink.label(), candidates = total, max_per_run = opts.max_per_run, "starting run");

    let mut state = RunState::default();
    let mut buffer: Vec<ContentItem> = Vec::new();

    'files: for file in candidates {
        if state.remaining(opts.max_per_run) == 0 {
            break;
        }

        let Some(items) = read_items(file, reader, opts.max_chars, &mut state) else {
            continue;
        };
        state.files_parsed += 1;
        if items.is_empty() {
            state.empty_records += 1;
        }

        for item in items {
            buffer.push(item);
            state.items_seen += 1;

            if buffer.len() >= flush_size {
                state = flush(std::mem::take(&mut buffer), state, &ctx).await?;
                if state.stop.is_some() || state.remaining(opts.max_per_run) == 0 {
                    break 'files;
                }
            }
        }

        if state.files_parsed % PROGRESS_EVERY == 0 {
            progress.report(SyncProgressEvent::Parsing {
                sink: sink.label(),
                files: state.files_parsed,
                total,
                written: state.total_written,
            });
            tracing::info!(
                files_parsed = state.files_parsed,
                buffered = buffer.len(),
                written = state.total_written,
                last = %file.path.display(),
                "scan progress"
            );
        }
    }

    if state.stop.is_none() && state.remaining(opts.max_per_run) > 0 && !buffer.is_empty() {
        state = flush(std::mem::take(&mut buffer), state, &ctx).await?;
    }

    if state.stop.is_none() {
        state.stop = Some(if state.remaining(opts.max_per_run) == 0 {
            StopReason::BudgetExhausted
        } else {
            StopReason::InputExhausted
        });
    }

    tracing::info!(
        sink = %sink.label(),
        written = state.total_written,
        unchanged = state.skipped_unchanged,
        deferred = state.deferred,
        stop = %state.stop.unwrap_or(StopReason::InputExhausted),
        "run finished"
    );

    Ok(RunReport {
        sink: sink.label(),
        candidates: total,
        max_per_run: opts.max_per_run,
        dry_run: false,
        state,
    })
}

/// Probe, diff and write one buffered batch.
async fn flush(batch: Vec<ContentItem>, mut state: RunState, ctx: &RunContext<'_>) -> Result<RunState> {
    let remaining = state.remaining(ctx.opts.max_per_run);
    if batch.is_empty() || remaining == 0 {
        return Ok(state);
    }

    let batch = prepare_batch(batch);
    let remote = probe_remote(ctx.sink, &batch, ctx.opts.probe_batch_size).await?;
    let plan = plan_writes(batch, &remote, remaining);

    state.skipped_unchanged += plan.unchanged;
    state.deferred += plan.deferred;
    state.flushes += 1;

    if plan.to_write.is_empty() {
        tracing::debug!(unchanged = plan.unchanged, "flush had nothing to write");
        return Ok(state);
    }

    tracing::info!(
        to_write = plan.to_write.len(),
        unchanged = plan.unchanged,
        budget_left = remaining,
        "flush plan"
    );

    let result = execute_plan(
        ctx.sink,
        &plan.to_write,
        &ctx.opts.executor,
        ctx.sleeper,
        &ctx.opts.artifact,
    )
    .await?;

    state.total_written += result.written;
    if let Some(path) = result.artifact {
        state.artifacts.push(path);
    }
    if result.stopped {
        state.stop = Some(StopReason::RateLimited);
    }

    ctx.progress.report(SyncProgressEvent::Flushed {
        sink: ctx.sink.label(),
        flushed: result.written,
        written: state.total_written,
        budget: ctx.opts.max_per_run,
    });

    Ok(state)
}

/// Dry run: scan and fingerprint without touching the remote.
pub fn survey(
    sink_label: &str,
    candidates: &[StagedFile],
    reader: &dyn StagedReader,
    max_chars: usize,
    max_per_run: u64,
) -> RunReport {
    let mut state = RunState::default();

    for file in candidates {
        let Some(items) = read_items(file, reader, max_chars, &mut state) else {
            continue;
        };
        state.files_parsed += 1;
        if items.is_empty() {
            state.empty_records += 1;
        }
        state.items_seen += items.len() as u64;
    }
    state.stop = Some(StopReason::InputExhausted);

    RunReport {
        sink: sink_label.to_string(),
        candidates: candidates.len() as u64,
        max_per_run,
        dry_run: true,
        state,
    }
}
