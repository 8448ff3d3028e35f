//! Window scanner.
//!
//! Enumerates staged parquet files under
//! `<root>/r_<subreddit>/<kind>/<YYYY>/<MMDD>/` for a trailing window of
//! UTC days. With a positive lookback only the `L + 1` day directories are
//! opened, so the cost of a scan does not grow with the size of the archive.
//! A lookback `<= 0` walks every directory under each base.
//!
//! The result is sorted by path so repeated runs visit files in the same
//! order.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

use crate::models::{ContentKind, StagedFile};

static STAGED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<hms>\d{6})_(?P<sid>[A-Za-z0-9]+)_(?P<cap14>\d{14})_(?P<h>[0-9a-fA-F]+)\.parquet$")
        .expect("staged file pattern is valid")
});

/// Fields encoded in a staged file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedName {
    /// `HHMMSS` of the thread's creation time.
    pub hms: String,
    /// Thread (submission) id.
    pub thread_id: String,
    /// `YYYYMMDDhhmmss` capture timestamp.
    pub captured: String,
    /// Content hash assigned by the import step.
    pub hash: String,
}

/// Parse a staged file name; `None` for anything that is not a staged file.
pub fn parse_staged_name(file_name: &str) -> Option<StagedName> {
    let caps = STAGED_NAME.captures(file_name)?;
    Some(StagedName {
        hms: caps["hms"].to_string(),
        thread_id: caps["sid"].to_string(),
        captured: caps["cap14"].to_string(),
        hash: caps["h"].to_string(),
    })
}

/// Strip `r/` / `r_` prefixes and whitespace from a subreddit name.
pub fn normalize_subreddit(name: &str) -> String {
    let s = name.trim();
    let s = ["r/", "R/", "r_", "R_"]
        .iter()
        .find_map(|p| s.strip_prefix(p))
        .unwrap_or(s);
    s.trim().to_string()
}

/// `(year, month-day)` directory names for today back to today − `lookback_days`.
///
/// Returns `None` when the window is unbounded.
pub fn window_days(today: NaiveDate, lookback_days: i64) -> Option<Vec<(String, String)>> {
    if lookback_days <= 0 {
        return None;
    }
    Some(
        (0..=lookback_days)
            .map(|i| today - Duration::days(i))
            .map(|d| (d.format("%Y").to_string(), d.format("%m%d").to_string()))
            .collect(),
    )
}

/// Base directory holding one subreddit's files of one kind.
pub fn base_dir(root: &Path, subreddit: &str, kind: ContentKind) -> PathBuf {
    root.join(format!("r_{}", subreddit)).join(kind.dir_name())
}

/// Scan the staging root using today's UTC date.
pub fn scan_window(
    root: &Path,
    subreddits: &[String],
    kinds: &[ContentKind],
    lookback_days: i64,
) -> Result<Vec<StagedFile>> {
    scan_window_at(root, subreddits, kinds, lookback_days, Utc::now().date_naive())
}

/// Scan the staging root relative to a fixed `today`.
pub fn scan_window_at(
    root: &Path,
    subreddits: &[String],
    kinds: &[ContentKind],
    lookback_days: i64,
    today: NaiveDate,
) -> Result<Vec<StagedFile>> {
    let days = window_days(today, lookback_days);

    let mut subs: Vec<String> = subreddits
        .iter()
        .map(|s| normalize_subreddit(s))
        .filter(|s| !s.is_empty())
        .collect();
    subs.sort();
    subs.dedup();

    let mut files = Vec::new();

    for sub in &subs {
        for &kind in kinds {
            let base = base_dir(root, sub, kind);
            if !base.is_dir() {
                tracing::warn!(
                    subreddit = %sub,
                    kind = %kind,
                    path = %base.display(),
                    "skipping missing staged directory"
                );
                continue;
            }

            let found = match &days {
                None => walk_all(&base)?,
                Some(days) => {
                    let mut found = Vec::new();
                    for (year, month_day) in days {
                        found.extend(list_day(&base.join(year).join(month_day))?);
                    }
                    found
                }
            };

            files.extend(found.into_iter().map(|path| StagedFile {
                subreddit: sub.clone(),
                kind,
                path,
            }));
        }
    }

    files.sort_by(|a, b| a.path.as_os_str().cmp(b.path.as_os_str()));
    Ok(files)
}

fn is_staged_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| STAGED_NAME.is_match(n))
        .unwrap_or(false)
}

fn walk_all(base: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(base) {
        let entry = entry.with_context(|| format!("failed to walk {}", base.display()))?;
        if entry.file_type().is_file() && is_staged_file(entry.path()) {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

fn list_day(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && is_staged_file(&path) {
            out.push(path);
        }
    }
    Ok(out)
}
