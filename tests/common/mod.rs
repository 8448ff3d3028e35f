#![allow(dead_code)]

use arrow_array::{ArrayRef, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use chrono::NaiveDate;
use parquet::arrow::ArrowWriter;
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thread_sync::executor::Sleeper;
use thread_sync::models::{ArtifactRecord, ContentItem};
use thread_sync::sink::{ChunkWrite, Outcome, RemoteSink};

pub fn write_parquet(path: &Path, columns: Vec<(&str, Vec<Option<&str>>)>) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, _)| Field::new(*name, DataType::Utf8, true))
        .collect();
    let schema = Arc::new(Schema::new(fields));
    let arrays: Vec<ArrayRef> = columns
        .into_iter()
        .map(|(_, values)| Arc::new(StringArray::from(values)) as ArrayRef)
        .collect();
    let batch = RecordBatch::try_new(schema.clone(), arrays).unwrap();
    let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

fn staged_path(root: &Path, sub: &str, kind_dir: &str, day: NaiveDate, thread_id: &str) -> PathBuf {
    root.join(format!("r_{}", sub))
        .join(kind_dir)
        .join(day.format("%Y").to_string())
        .join(day.format("%m%d").to_string())
        .join(format!(
            "120000_{}_{}120000_ab12cd34.parquet",
            thread_id,
            day.format("%Y%m%d")
        ))
}

pub fn stage_submission(
    root: &Path,
    sub: &str,
    day: NaiveDate,
    thread_id: &str,
    title: &str,
    body: &str,
) -> PathBuf {
    let path = staged_path(root, sub, "submissions", day, thread_id);
    write_parquet(
        &path,
        vec![
            ("author", vec![Some("someone")]),
            ("title", vec![Some(title)]),
            ("body", vec![Some(body)]),
        ],
    );
    path
}

/// `comments` are `(comment_id, parent_id, body)`.
pub fn stage_comments(
    root: &Path,
    sub: &str,
    day: NaiveDate,
    thread_id: &str,
    comments: &[(&str, &str, &str)],
) -> PathBuf {
    let path = staged_path(root, sub, "comments", day, thread_id);
    write_parquet(
        &path,
        vec![
            ("comment_id", comments.iter().map(|c| Some(c.0)).collect()),
            ("parent_id", comments.iter().map(|c| Some(c.1)).collect()),
            ("author", comments.iter().map(|_| Some("someone")).collect()),
            ("body", comments.iter().map(|c| Some(c.2)).collect()),
        ],
    );
    path
}

// ============ Fakes ============

/// How the fake answers one write call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Accept,
    RateLimit,
    Fail,
}

/// In-memory remote keyed by item id.
pub struct FakeSink {
    pub store: Mutex<HashMap<String, String>>,
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    pub write_calls: Mutex<Vec<Vec<String>>>,
    pub probe_calls: Mutex<Vec<usize>>,
}

impl FakeSink {
    pub fn new() -> Self {
        Self::scripted(Vec::new(), Reply::Accept)
    }

    /// Answer write calls from `script` in order, then with `fallback`.
    pub fn scripted(script: Vec<Reply>, fallback: Reply) -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
            script: Mutex::new(script.into()),
            fallback,
            write_calls: Mutex::new(Vec::new()),
            probe_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn stored(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    pub fn accepted_writes(&self) -> usize {
        self.write_calls.lock().unwrap().iter().map(|c| c.len()).sum()
    }
}

#[async_trait]
impl RemoteSink for FakeSink {
    fn label(&self) -> String {
        "fake".to_string()
    }

    async fn fetch_fingerprints(
        &self,
        items: &[ContentItem],
    ) -> anyhow::Result<HashMap<String, String>> {
        self.probe_calls.lock().unwrap().push(items.len());
        let store = self.store.lock().unwrap();
        Ok(items
            .iter()
            .filter_map(|i| store.get(&i.item_id).map(|h| (i.item_id.clone(), h.clone())))
            .collect())
    }

    async fn write(&self, chunk: &[ContentItem]) -> ChunkWrite {
        let reply = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);
        match reply {
            Reply::RateLimit => {
                ChunkWrite::partial(Vec::new(), Outcome::RateLimited("HTTP 429".to_string()))
            }
            Reply::Fail => {
                ChunkWrite::partial(Vec::new(), Outcome::Failed(anyhow::anyhow!("HTTP 500")))
            }
            Reply::Accept => {
                let mut store = self.store.lock().unwrap();
                for item in chunk {
                    store.insert(item.item_id.clone(), item.fingerprint.clone());
                }
                self.write_calls
                    .lock()
                    .unwrap()
                    .push(chunk.iter().map(|i| i.item_id.clone()).collect());
                ChunkWrite::complete(
                    chunk
                        .iter()
                        .map(|i| ArtifactRecord {
                            id: i.item_id.clone(),
                            values: None,
                            body: Some(i.text.clone()),
                            metadata: i.metadata.clone(),
                        })
                        .collect(),
                )
            }
        }
    }
}

/// Records requested sleeps instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    pub slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn calls(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

pub fn ndjson_lines(path: &Path) -> Vec<serde_json::Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}
