//! Fingerprint builder.
//!
//! Turns a staged file into [`ContentItem`]s: normalizes the text, caps its
//! length, and derives the item id and content fingerprint. Truncation
//! happens before hashing, so the fingerprint always covers exactly the text
//! that is sent downstream.

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::models::{ContentItem, ContentKind, Metadata, StagedFile};
use crate::scanner::parse_staged_name;
use crate::staged::{CommentRow, StagedReader, SubmissionRow};

/// Source tag carried in every item id and in the `src` metadata field.
pub const SOURCE_TAG: &str = "r";

/// Number of hex characters kept from the SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 16;

/// First [`FINGERPRINT_LEN`] hex chars of SHA-256 over the UTF-8 bytes.
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// Stable id: `<source>:<kind>:<subreddit>:<local id>`.
pub fn item_id(kind: ContentKind, subreddit: &str, local_id: &str) -> String {
    format!("{}:{}:{}:{}", SOURCE_TAG, kind.tag(), subreddit, local_id)
}

/// Keep at most `max_chars` characters. No word-boundary awareness.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Trim and cap text; `None` when nothing is left.
pub fn normalize_text(raw: &str, max_chars: usize) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(truncate_chars(trimmed, max_chars).to_string())
}

/// Title and body joined by a blank line; either part may be empty.
pub fn submission_text(title: &str, body: &str) -> String {
    let title = title.trim();
    let body = body.trim();
    match (title.is_empty(), body.is_empty()) {
        (_, true) => title.to_string(),
        (true, false) => body.to_string(),
        (false, false) => format!("{}\n\n{}", title, body),
    }
}

fn make_item(
    kind: ContentKind,
    subreddit: &str,
    thread_id: &str,
    local_id: &str,
    parent_id: Option<&str>,
    text: String,
) -> ContentItem {
    let fingerprint = fingerprint(&text);

    let mut metadata = Metadata::new();
    metadata.insert("src".to_string(), SOURCE_TAG.to_string());
    metadata.insert("sub".to_string(), subreddit.to_string());
    metadata.insert("t".to_string(), kind.tag().to_string());
    metadata.insert("sid".to_string(), thread_id.to_string());
    if let Some(pid) = parent_id {
        metadata.insert("pid".to_string(), pid.to_string());
    }
    metadata.insert("h".to_string(), fingerprint.clone());

    ContentItem {
        item_id: item_id(kind, subreddit, local_id),
        kind,
        subreddit: subreddit.to_string(),
        local_id: local_id.to_string(),
        text,
        fingerprint,
        metadata,
    }
}

pub fn submission_item(
    subreddit: &str,
    thread_id: &str,
    row: &SubmissionRow,
    max_chars: usize,
) -> Option<ContentItem> {
    let text = normalize_text(&submission_text(&row.title, &row.body), max_chars)?;
    Some(make_item(
        ContentKind::Submission,
        subreddit,
        thread_id,
        thread_id,
        None,
        text,
    ))
}

pub fn comment_items(
    subreddit: &str,
    thread_id: &str,
    rows: &[CommentRow],
    max_chars: usize,
) -> Vec<ContentItem> {
    rows.iter()
        .filter(|row| !row.comment_id.is_empty())
        .filter_map(|row| {
            let text = normalize_text(&row.body, max_chars)?;
            Some(make_item(
                ContentKind::Comment,
                subreddit,
                thread_id,
                &row.comment_id,
                Some(&row.parent_id),
                text,
            ))
        })
        .collect()
}

/// Read one staged file and build its items.
///
/// A file whose name is not a staged-file name yields no items.
pub fn build_items(
    file: &StagedFile,
    reader: &dyn StagedReader,
    max_chars: usize,
) -> Result<Vec<ContentItem>> {
    let Some(name) = parse_staged_name(&file.file_name()) else {
        return Ok(Vec::new());
    };

    match file.kind {
        ContentKind::Submission => Ok(reader
            .read_submission(&file.path)?
            .and_then(|row| submission_item(&file.subreddit, &name.thread_id, &row, max_chars))
            .into_iter()
            .collect()),
        ContentKind::Comment => {
            let rows = reader.read_comments(&file.path)?;
            Ok(comment_items(&file.subreddit, &name.thread_id, &rows, max_chars))
        }
    }
}
