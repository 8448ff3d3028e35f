//! Sync progress reporting.
//!
//! Reports observable progress during `tsync index` and `tsync upload` so
//! users can see how far a run got and how much of its budget is spent.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a sync run.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// The scanner found `candidates` staged files.
    Scanned { sink: String, candidates: u64 },
    /// `files` staged files parsed out of `total`.
    Parsing {
        sink: String,
        files: u64,
        total: u64,
        written: u64,
    },
    /// A flush finished; `written` is the run total so far.
    Flushed {
        sink: String,
        flushed: u64,
        written: u64,
        budget: u64,
    },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "index:reddit  parsing  50 / 1,234 files".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Scanned { sink, candidates } => {
                format!("{}  scanned  {} files\n", sink, format_number(*candidates))
            }
            SyncProgressEvent::Parsing {
                sink,
                files,
                total,
                written,
            } => format!(
                "{}  parsing  {} / {} files  ({} written)\n",
                sink,
                format_number(*files),
                format_number(*total),
                format_number(*written)
            ),
            SyncProgressEvent::Flushed {
                sink,
                flushed,
                written,
                budget,
            } => format!(
                "{}  flushed  {} items  ({} / {} written)\n",
                sink,
                format_number(*flushed),
                format_number(*written),
                format_budget(*budget)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Scanned { sink, candidates } => serde_json::json!({
                "event": "progress",
                "sink": sink,
                "phase": "scanned",
                "candidates": candidates
            }),
            SyncProgressEvent::Parsing {
                sink,
                files,
                total,
                written,
            } => serde_json::json!({
                "event": "progress",
                "sink": sink,
                "phase": "parsing",
                "files": files,
                "total": total,
                "written": written
            }),
            SyncProgressEvent::Flushed {
                sink,
                flushed,
                written,
                budget,
            } => serde_json::json!({
                "event": "progress",
                "sink": sink,
                "phase": "flushed",
                "flushed": flushed,
                "written": written,
                "budget": budget
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Like [`format_number`], but an unlimited budget prints as `unlimited`.
pub(crate) fn format_budget(n: u64) -> String {
    if n == u64::MAX {
        "unlimited".to_string()
    } else {
        format_number(n)
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
