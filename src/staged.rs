//! Staged-file reader.
//!
//! Staged records are parquet files written by the import step. Submission
//! files hold one row (`author`, `title`, `body`); comment files hold one row
//! per comment (`comment_id`, `parent_id`, `author`, `body`). Null strings
//! read as empty, and comment rows without a `comment_id` are dropped.

use anyhow::{bail, Context, Result};
use arrow_array::cast::AsArray;
use arrow_array::{Array, RecordBatch};
use arrow_schema::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionRow {
    pub author: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentRow {
    pub comment_id: String,
    pub parent_id: String,
    pub author: String,
    pub body: String,
}

/// Reads rows out of a staged file. Synchronous and local.
pub trait StagedReader: Send + Sync {
    /// First row of a submission file, or `None` if the file has no rows.
    fn read_submission(&self, path: &Path) -> Result<Option<SubmissionRow>>;

    /// All comment rows with a non-null `comment_id`.
    fn read_comments(&self, path: &Path) -> Result<Vec<CommentRow>>;
}

/// [`StagedReader`] over parquet files.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParquetReader;

impl StagedReader for ParquetReader {
    fn read_submission(&self, path: &Path) -> Result<Option<SubmissionRow>> {
        for batch in read_batches(path)? {
            if batch.num_rows() == 0 {
                continue;
            }
            let author = string_column(&batch, "author")?;
            let title = string_column(&batch, "title")?;
            let body = string_column(&batch, "body")?;
            return Ok(Some(SubmissionRow {
                author: coalesce(&author, 0),
                title: coalesce(&title, 0),
                body: coalesce(&body, 0),
            }));
        }
        Ok(None)
    }

    fn read_comments(&self, path: &Path) -> Result<Vec<CommentRow>> {
        let mut rows = Vec::new();
        for batch in read_batches(path)? {
            let comment_id = string_column(&batch, "comment_id")?;
            let parent_id = string_column(&batch, "parent_id")?;
            let author = string_column(&batch, "author")?;
            let body = string_column(&batch, "body")?;

            for i in 0..batch.num_rows() {
                let Some(Some(cid)) = comment_id.get(i) else {
                    continue;
                };
                rows.push(CommentRow {
                    comment_id: cid.clone(),
                    parent_id: coalesce(&parent_id, i),
                    author: coalesce(&author, i),
                    body: coalesce(&body, i),
                });
            }
        }
        Ok(rows)
    }
}

fn read_batches(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("failed to read parquet metadata from {}", path.display()))?
        .build()?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch.with_context(|| format!("failed to decode {}", path.display()))?);
    }
    Ok(batches)
}

/// Values of a string column; a missing column reads as all-null.
fn string_column(batch: &RecordBatch, name: &str) -> Result<Vec<Option<String>>> {
    let Some(column) = batch.column_by_name(name) else {
        return Ok(vec![None; batch.num_rows()]);
    };

    let values = match column.data_type() {
        DataType::Utf8 => column
            .as_string::<i32>()
            .iter()
            .map(|v| v.map(str::to_string))
            .collect(),
        DataType::LargeUtf8 => column
            .as_string::<i64>()
            .iter()
            .map(|v| v.map(str::to_string))
            .collect(),
        DataType::Utf8View => column
            .as_string_view()
            .iter()
            .map(|v| v.map(str::to_string))
            .collect(),
        DataType::Null => vec![None; column.len()],
        other => bail!("column '{}' has unsupported type {}", name, other),
    };
    Ok(values)
}

fn coalesce(values: &[Option<String>], i: usize) -> String {
    values.get(i).cloned().flatten().unwrap_or_default()
}
