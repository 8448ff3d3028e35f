//! Vector index sink (Cloudflare Vectorize v2).
//!
//! Two endpoints are used, both under
//! `{api_base}/accounts/{account}/vectorize/v2/indexes/{index}`:
//!
//! | Operation    | Body                                  | Used by             |
//! |--------------|---------------------------------------|---------------------|
//! | `get_by_ids` | `{"ids": [...]}`, at most 20 ids      | remote state probe  |
//! | `upsert`     | NDJSON, one `{id, values, metadata}`  | sync executor       |
//!
//! The stored fingerprint lives in vector metadata under `h`.
//!
//! Redirects are replayed by hand against the resolved `Location` so the
//! method and body survive (reqwest rewrites a redirected POST otherwise).
//! A 2xx response without `"success": true` is still a failure.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::Url;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::IndexConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::require_env;
use crate::models::{ArtifactRecord, ContentItem};
use crate::sink::{ChunkWrite, Outcome, RemoteSink};

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 5;

/// Account credentials for the Cloudflare API.
#[derive(Debug, Clone)]
pub struct VectorizeCredentials {
    pub account_id: String,
    pub api_token: String,
}

impl VectorizeCredentials {
    /// Load `CF_ACCOUNT_ID` and `CF_API_TOKEN`.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            account_id: require_env("CF_ACCOUNT_ID")?,
            api_token: require_env("CF_API_TOKEN")?,
        })
    }
}

/// A request body and its content type, kept as bytes so it can be replayed.
struct RequestBody {
    content_type: &'static str,
    bytes: Vec<u8>,
}

impl RequestBody {
    fn json(value: &Value) -> Result<Self> {
        Ok(Self {
            content_type: "application/json",
            bytes: serde_json::to_vec(value)?,
        })
    }

    fn ndjson(records: &[ArtifactRecord]) -> Result<Self> {
        let mut bytes = Vec::new();
        for record in records {
            serde_json::to_writer(&mut bytes, record)?;
            bytes.push(b'\n');
        }
        Ok(Self {
            content_type: "application/x-ndjson",
            bytes,
        })
    }
}

/// HTTP client bound to one index.
pub struct VectorizeClient {
    http: reqwest::Client,
    index_url: String,
    token: String,
}

impl VectorizeClient {
    pub fn new(config: &IndexConfig, creds: &VectorizeCredentials) -> Result<Self> {
        let index_url = format!(
            "{}/accounts/{}/vectorize/v2/indexes/{}",
            config.api_base.trim_end_matches('/'),
            creds.account_id,
            config.name
        );
        Self::with_index_url(&index_url, &creds.api_token, config.timeout_secs)
    }

    /// Build a client against an explicit index URL.
    pub fn with_index_url(index_url: &str, token: &str, timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            index_url: index_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Look up stored vectors by id. Returns the `result` array entries.
    pub async fn get_by_ids(&self, ids: &[String]) -> Outcome<Vec<Value>> {
        if ids.is_empty() {
            return Outcome::Success(Vec::new());
        }
        let body = match RequestBody::json(&serde_json::json!({ "ids": ids })) {
            Ok(b) => b,
            Err(e) => return Outcome::Failed(e),
        };
        self.post("get_by_ids", body).await.map(|json| {
            json.get("result")
                .and_then(|r| r.as_array())
                .cloned()
                .unwrap_or_default()
        })
    }

    /// Insert or replace vectors.
    pub async fn upsert(&self, records: &[ArtifactRecord]) -> Outcome<Value> {
        match RequestBody::ndjson(records) {
            Ok(body) => self.post("upsert", body).await,
            Err(e) => Outcome::Failed(e),
        }
    }

    async fn post(&self, op: &str, body: RequestBody) -> Outcome<Value> {
        let mut url = match Url::parse(&format!("{}/{}", self.index_url, op)) {
            Ok(u) => u,
            Err(e) => return Outcome::Failed(anyhow!("invalid index URL: {}", e)),
        };

        for _ in 0..=MAX_REDIRECTS {
            let resp = match self
                .http
                .post(url.clone())
                .bearer_auth(&self.token)
                .header(CONTENT_TYPE, body.content_type)
                .body(body.bytes.clone())
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    return Outcome::Failed(anyhow!(e).context(format!("vectorize {} failed", op)))
                }
            };

            let status = resp.status();
            if status.is_redirection() {
                let next = resp
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(|loc| url.join(loc));
                match next {
                    Some(Ok(next)) => {
                        tracing::debug!(op, from = %url, to = %next, "following redirect");
                        url = next;
                        continue;
                    }
                    Some(Err(e)) => {
                        return Outcome::Failed(anyhow!(
                            "vectorize {} redirect has a bad Location: {}",
                            op,
                            e
                        ))
                    }
                    None => {
                        return Outcome::Failed(anyhow!(
                            "vectorize {} got HTTP {} without a Location header",
                            op,
                            status.as_u16()
                        ))
                    }
                }
            }

            let text = match resp.text().await {
                Ok(t) => t,
                Err(e) => {
                    return Outcome::Failed(
                        anyhow!(e).context(format!("vectorize {} response unreadable", op)),
                    )
                }
            };
            return classify_response(op, status.as_u16(), &text);
        }

        Outcome::Failed(anyhow!(
            "vectorize {} exceeded {} redirects",
            op,
            MAX_REDIRECTS
        ))
    }
}

fn classify_response(op: &str, status: u16, body: &str) -> Outcome<Value> {
    if status == 429 {
        return Outcome::RateLimited(format!("vectorize {} HTTP 429", op));
    }
    if !(200..300).contains(&status) {
        let snippet: String = body.chars().take(300).collect();
        return Outcome::Failed(anyhow!("vectorize {} HTTP {}: {}", op, status, snippet));
    }
    let json: Value = match serde_json::from_str(body) {
        Ok(j) => j,
        Err(e) => return Outcome::Failed(anyhow!("vectorize {} returned invalid JSON: {}", op, e)),
    };
    if json.get("success").and_then(|s| s.as_bool()) != Some(true) {
        let errors = json.get("errors").cloned().unwrap_or(Value::Null);
        return Outcome::Failed(anyhow!("vectorize {} reported failure: {}", op, errors));
    }
    Outcome::Success(json)
}

/// Remote sink that embeds items and upserts them into the index.
pub struct VectorIndexSink {
    name: String,
    client: VectorizeClient,
    embedder: Box<dyn EmbeddingProvider>,
}

impl VectorIndexSink {
    pub fn new(name: &str, client: VectorizeClient, embedder: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            name: name.to_string(),
            client,
            embedder,
        }
    }

    async fn embed_and_upsert(&self, chunk: &[ContentItem]) -> Outcome<Vec<ArtifactRecord>> {
        let texts: Vec<String> = chunk.iter().map(|i| i.text.clone()).collect();
        let vectors = match self.embedder.embed(&texts).await {
            Outcome::Success(v) => v,
            Outcome::RateLimited(d) => return Outcome::RateLimited(d),
            Outcome::Failed(e) => return Outcome::Failed(e.context("embedding failed")),
        };

        if vectors.len() != chunk.len() {
            return Outcome::Failed(anyhow!(
                "embedding returned {} vectors for {} texts",
                vectors.len(),
                chunk.len()
            ));
        }
        let dims = self.embedder.dims();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Outcome::Failed(anyhow!(
                "embedding dimension mismatch: expected {}, got {}",
                dims,
                bad.len()
            ));
        }

        let records: Vec<ArtifactRecord> = chunk
            .iter()
            .zip(vectors)
            .map(|(item, values)| ArtifactRecord {
                id: item.item_id.clone(),
                values: Some(values),
                body: None,
                metadata: item.metadata.clone(),
            })
            .collect();

        self.client.upsert(&records).await.map(|_| records)
    }
}

#[async_trait]
impl RemoteSink for VectorIndexSink {
    fn label(&self) -> String {
        format!("index:{}", self.name)
    }

    async fn fetch_fingerprints(&self, items: &[ContentItem]) -> Result<HashMap<String, String>> {
        let ids: Vec<String> = items.iter().map(|i| i.item_id.clone()).collect();
        let found = self.client.get_by_ids(&ids).await.into_result()?;

        Ok(found
            .iter()
            .filter_map(|entry| {
                let id = entry.get("id")?.as_str()?;
                let h = entry.pointer("/metadata/h")?.as_str()?;
                Some((id.to_string(), h.to_string()))
            })
            .collect())
    }

    async fn write(&self, chunk: &[ContentItem]) -> ChunkWrite {
        // One upsert per chunk: the index takes all of it or none.
        self.embed_and_upsert(chunk).await.into()
    }
}
