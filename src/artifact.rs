//! NDJSON output artifacts.
//!
//! Every flush opens a fresh, uniquely named file and appends one line per
//! item the remote accepted, in acceptance order. Lines are flushed to disk
//! after each chunk so the file reflects what was sent even if the process
//! dies mid-flush. A file that ends up empty is removed.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::models::ArtifactRecord;

/// Where artifacts for a run are written.
#[derive(Debug, Clone)]
pub struct ArtifactTarget {
    pub dir: PathBuf,
    /// File name prefix, e.g. `"index"` gives `index_<uuid>.ndjson`.
    pub prefix: String,
}

impl ArtifactTarget {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }
}

/// An open artifact file.
pub struct ArtifactWriter {
    path: PathBuf,
    out: BufWriter<File>,
    lines: u64,
}

impl ArtifactWriter {
    /// Create a new, uniquely named file under `target.dir`.
    pub fn create(target: &ArtifactTarget) -> Result<Self> {
        std::fs::create_dir_all(&target.dir)
            .with_context(|| format!("failed to create {}", target.dir.display()))?;
        let path = target
            .dir
            .join(format!("{}_{}.ndjson", target.prefix, Uuid::new_v4()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("failed to create artifact {}", path.display()))?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
            lines: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Append records and flush them to disk.
    pub fn append(&mut self, records: &[ArtifactRecord]) -> Result<()> {
        for record in records {
            serde_json::to_writer(&mut self.out, record)?;
            self.out.write_all(b"\n")?;
            self.lines += 1;
        }
        self.out
            .flush()
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// Close the file. Returns its path if anything was written; otherwise
    /// deletes it and returns `None`.
    pub fn finish(mut self) -> Result<Option<PathBuf>> {
        self.out.flush()?;
        drop(self.out);
        if self.lines == 0 {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove empty artifact");
            }
            return Ok(None);
        }
        Ok(Some(self.path))
    }
}
