//! Remote sink abstraction.
//!
//! A [`RemoteSink`] is the remote side of a sync run: it can report the
//! fingerprints it already holds and accept writes. The vector index
//! ([`crate::vectorize::VectorIndexSink`]) and object storage
//! ([`crate::object_store::ObjectStoreSink`]) both implement it, which lets
//! the prober, planner and executor stay the same for both.
//!
//! Remote calls return a tagged [`Outcome`] instead of an error string, so
//! the retry loop switches on the tag rather than inspecting messages.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use crate::models::{ArtifactRecord, ContentItem};

/// Result of one remote call.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    /// The service asked us to slow down (HTTP 429 or an equivalent
    /// structured signal). Carries a short description for logs.
    RateLimited(String),
    /// Anything else. Never retried.
    Failed(anyhow::Error),
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(v) => Outcome::Success(f(v)),
            Outcome::RateLimited(d) => Outcome::RateLimited(d),
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }

    /// Collapse into a `Result`, treating rate limiting as an error.
    ///
    /// Used on paths that do not retry, such as probing.
    pub fn into_result(self) -> Result<T> {
        match self {
            Outcome::Success(v) => Ok(v),
            Outcome::RateLimited(d) => Err(anyhow::anyhow!("rate limited: {}", d)),
            Outcome::Failed(e) => Err(e),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Outcome::RateLimited(_))
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(v) => Outcome::Success(v),
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// Result of one chunk write.
///
/// A sink that sends a chunk in several requests can fail part way.
/// `accepted` then holds the records for the items that did go out, so they
/// still reach the artifact and the run totals.
#[derive(Debug)]
pub struct ChunkWrite {
    /// One audit record per accepted item; a prefix of the chunk, in order.
    pub accepted: Vec<ArtifactRecord>,
    /// `Success` only when the whole chunk was written.
    pub outcome: Outcome<()>,
}

impl ChunkWrite {
    pub fn complete(records: Vec<ArtifactRecord>) -> Self {
        Self {
            accepted: records,
            outcome: Outcome::Success(()),
        }
    }

    /// Stopped after `accepted`; the rest of the chunk was not written.
    pub fn partial(accepted: Vec<ArtifactRecord>, outcome: Outcome<()>) -> Self {
        Self { accepted, outcome }
    }
}

impl From<Outcome<Vec<ArtifactRecord>>> for ChunkWrite {
    fn from(outcome: Outcome<Vec<ArtifactRecord>>) -> Self {
        match outcome {
            Outcome::Success(records) => Self::complete(records),
            Outcome::RateLimited(d) => Self::partial(Vec::new(), Outcome::RateLimited(d)),
            Outcome::Failed(e) => Self::partial(Vec::new(), Outcome::Failed(e)),
        }
    }
}

/// The remote side of a sync run.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    /// Short label for logs and progress output (e.g. `"index:reddit"`).
    fn label(&self) -> String;

    /// Fingerprints the remote already holds for `items`.
    ///
    /// Ids missing from the map have never been synchronized. Called with
    /// at most one sub-batch at a time; see [`crate::probe`].
    async fn fetch_fingerprints(&self, items: &[ContentItem]) -> Result<HashMap<String, String>>;

    /// Convert and write one chunk. Returns an audit record per accepted
    /// item, in input order. After rate limiting the executor retries only
    /// the items that were not accepted, so a write must be safe to repeat.
    async fn write(&self, chunk: &[ContentItem]) -> ChunkWrite;
}
