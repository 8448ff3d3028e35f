//! Embedding providers.
//!
//! Converts item text into vectors for the index sink. Implementations:
//! - **[`GeminiProvider`]**: `batchEmbedContents` on the Generative Language API.
//! - **[`OpenAIProvider`]**: `POST /v1/embeddings`.
//!
//! Providers never retry on their own. A rate-limit signal is returned as
//! [`Outcome::RateLimited`] so the executor's backoff loop owns every sleep.
//!
//! | HTTP / body                                  | Outcome         |
//! |----------------------------------------------|-----------------|
//! | 2xx with one vector per input                | `Success`       |
//! | 429                                          | `RateLimited`   |
//! | JSON `error.status == "RESOURCE_EXHAUSTED"`  | `RateLimited`   |
//! | anything else                                | `Failed`        |

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{require_any_env, require_env, ConfigError};
use crate::sink::Outcome;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// A text embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"gemini-embedding-001"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality the provider was asked for.
    fn dims(&self) -> usize;
    /// Embed `texts`, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Outcome<Vec<Vec<f32>>>;
}

// ============ Gemini Provider ============

/// Embedding provider for the Gemini API.
///
/// Requires `GEMINI_API_KEY` (or `GOOGLE_API_KEY`).
pub struct GeminiProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dims: usize,
    task_type: String,
}

impl GeminiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = require_any_env(&["GEMINI_API_KEY", "GOOGLE_API_KEY"])?;
        let api_base = config.api_base.as_deref().unwrap_or(GEMINI_API_BASE);
        Self::with_key(config, api_base, &api_key)
    }

    /// Build a provider with an explicit endpoint and key.
    pub fn with_key(config: &EmbeddingConfig, api_base: &str, api_key: &str) -> Result<Self> {
        let (model, dims) = model_and_dims(config)?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model,
            dims,
            task_type: config.task_type.clone(),
        })
    }

    fn request_body(&self, texts: &[String]) -> Value {
        let model_ref = format!("models/{}", self.model);
        let requests: Vec<Value> = texts
            .iter()
            .map(|text| {
                serde_json::json!({
                    "model": model_ref,
                    "content": { "parts": [{ "text": text }] },
                    "taskType": self.task_type,
                    "outputDimensionality": self.dims,
                })
            })
            .collect();
        serde_json::json!({ "requests": requests })
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Outcome<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Outcome::Success(Vec::new());
        }
        let url = format!("{}/models/{}:batchEmbedContents", self.api_base, self.model);
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(texts))
            .send()
            .await;

        match read_json("Gemini", resp).await {
            Outcome::Success(json) => parse_gemini_response(&json).into(),
            Outcome::RateLimited(d) => Outcome::RateLimited(d),
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }
}

/// Extract `embeddings[].values` in order.
fn parse_gemini_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("invalid Gemini response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|item| {
            item.get("values")
                .and_then(|v| v.as_array())
                .ok_or_else(|| anyhow!("invalid Gemini response: missing values"))
                .and_then(|values| floats(values))
        })
        .collect()
}

// ============ OpenAI Provider ============

/// Embedding provider for the OpenAI API. Requires `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config)?;
        let api_key = require_env("OPENAI_API_KEY")?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| OPENAI_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Outcome<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Outcome::Success(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dims,
        });
        let resp = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;

        match read_json("OpenAI", resp).await {
            Outcome::Success(json) => parse_openai_response(&json).into(),
            Outcome::RateLimited(d) => Outcome::RateLimited(d),
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }
}

/// Extract `data[].embedding`, ordered by `index` when present.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        indexed.push((index, floats(embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Shared HTTP handling ============

fn model_and_dims(config: &EmbeddingConfig) -> Result<(String, usize), ConfigError> {
    let model = config.model.clone().ok_or_else(|| {
        ConfigError::invalid(format!(
            "embedding.model required for provider '{}'",
            config.provider
        ))
    })?;
    let dims = config.dims.filter(|d| *d > 0).ok_or_else(|| {
        ConfigError::invalid(format!(
            "embedding.dims required for provider '{}'",
            config.provider
        ))
    })?;
    Ok((model, dims))
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("failed to build HTTP client")
}

fn floats(values: &[Value]) -> Result<Vec<f32>> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("non-numeric embedding value: {}", v))
        })
        .collect()
}

/// Read a provider response and sort it into an [`Outcome`].
async fn read_json(
    provider: &str,
    resp: reqwest::Result<reqwest::Response>,
) -> Outcome<Value> {
    let resp = match resp {
        Ok(r) => r,
        Err(e) => return Outcome::Failed(anyhow!(e).context(format!("{} request failed", provider))),
    };
    let status = resp.status().as_u16();
    let text = match resp.text().await {
        Ok(t) => t,
        Err(e) => {
            return Outcome::Failed(anyhow!(e).context(format!("{} response unreadable", provider)))
        }
    };
    classify_response(provider, status, &text)
}

/// Pure classification of a provider response, separated for testing.
fn classify_response(provider: &str, status: u16, body: &str) -> Outcome<Value> {
    let json: Option<Value> = serde_json::from_str(body).ok();

    if status == 429 {
        return Outcome::RateLimited(format!("{} HTTP 429", provider));
    }
    if let Some(err_status) = json
        .as_ref()
        .and_then(|j| j.pointer("/error/status"))
        .and_then(|s| s.as_str())
    {
        if err_status == "RESOURCE_EXHAUSTED" {
            return Outcome::RateLimited(format!("{} {}", provider, err_status));
        }
    }
    if !(200..300).contains(&status) {
        let snippet: String = body.chars().take(300).collect();
        return Outcome::Failed(anyhow!("{} API error {}: {}", provider, status, snippet));
    }
    match json {
        Some(j) => Outcome::Success(j),
        None => Outcome::Failed(anyhow!("{} returned a non-JSON body", provider)),
    }
}

/// Create the [`EmbeddingProvider`] named by `config.provider`.
///
/// A disabled provider, missing keys or missing model settings surface as
/// [`ConfigError`].
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => bail!(ConfigError::invalid(
            "index requires an embedding provider; set [embedding] provider"
        )),
        "gemini" => Ok(Box::new(GeminiProvider::new(config)?)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        other => bail!(ConfigError::invalid(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}
