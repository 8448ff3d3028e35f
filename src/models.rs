//! Core data models that flow through the sync pipeline.
//!
//! A [`StagedFile`] is what the scanner finds on disk, a [`ContentItem`] is
//! one unit of text derived from it, and an [`ArtifactRecord`] is the audit
//! line written for every item a remote service accepted.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Metadata tags attached to every item, ordered by key.
pub type Metadata = BTreeMap<String, String>;

/// Whether a staged file holds a thread's submission or its comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentKind {
    Submission,
    Comment,
}

impl ContentKind {
    /// Both kinds, in the order the scanner visits them.
    pub const ALL: [ContentKind; 2] = [ContentKind::Submission, ContentKind::Comment];

    /// Directory name under `r_<subreddit>/`.
    pub fn dir_name(self) -> &'static str {
        match self {
            ContentKind::Submission => "submissions",
            ContentKind::Comment => "comments",
        }
    }

    /// One-letter tag used in item ids, metadata and object keys.
    pub fn tag(self) -> &'static str {
        match self {
            ContentKind::Submission => "s",
            ContentKind::Comment => "c",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A staged parquet file inside the lookback window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub subreddit: String,
    pub kind: ContentKind,
    pub path: PathBuf,
}

impl StagedFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// One submission or comment body, ready to be synchronized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    /// Stable id, e.g. `r:c:rust:k3x9a1`.
    pub item_id: String,
    pub kind: ContentKind,
    pub subreddit: String,
    /// Submission id for submissions, comment id for comments.
    pub local_id: String,
    /// Trimmed and length-capped text; exactly what is sent downstream.
    pub text: String,
    /// 16 hex chars of SHA-256 over `text`.
    pub fingerprint: String,
    pub metadata: Metadata,
}

/// One line of an NDJSON output artifact.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ArtifactRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub metadata: Metadata,
}
