//! Object storage sink (S3-compatible, e.g. Cloudflare R2).
//!
//! Each item is stored as a plain-text object whose key embeds its
//! fingerprint:
//!
//! ```text
//! [<prefix>/]r/<kind-tag>/<subreddit>/<local-id>/<fingerprint>.txt
//! ```
//!
//! Because the key carries the fingerprint, a successful `HEAD` means the
//! remote already holds exactly this text and a 404 means it does not.
//! Requests are path-style (`/<bucket>/<key>`) and signed with AWS
//! Signature V4 using the pure-Rust `hmac` + `sha2` crates.
//!
//! # Environment Variables
//!
//! - `R2_ACCESS_KEY_ID`, `R2_SECRET_ACCESS_KEY`: required
//! - `R2_ENDPOINT`: optional; otherwise derived from `CF_ACCOUNT_ID` as
//!   `https://<account>.r2.cloudflarestorage.com`
//!
//! # Rate limiting
//!
//! HTTP 429, or 503 with a `SlowDown` error code, is reported as
//! [`Outcome::RateLimited`]. `HEAD` responses carry no body, so a bare 503
//! on `HEAD` counts as `SlowDown` too.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode, Url};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::UploadConfig;
use crate::error::{require_env, ConfigError};
use crate::fingerprint::SOURCE_TAG;
use crate::models::{ArtifactRecord, ContentItem, ContentKind};
use crate::sink::{ChunkWrite, Outcome, RemoteSink};

type HmacSha256 = Hmac<Sha256>;

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

// ============ Credentials ============

/// Access keys and endpoint for the object store.
#[derive(Debug, Clone)]
pub struct ObjectStoreCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: String,
}

impl ObjectStoreCredentials {
    /// Load keys from the environment. `endpoint_override` (from config)
    /// wins over `R2_ENDPOINT`, which wins over the account-derived URL.
    pub fn from_env(endpoint_override: Option<&str>) -> Result<Self, ConfigError> {
        let access_key_id = require_env("R2_ACCESS_KEY_ID")?;
        let secret_access_key = require_env("R2_SECRET_ACCESS_KEY")?;

        let endpoint = match endpoint_override.map(str::trim).filter(|e| !e.is_empty()) {
            Some(e) => e.to_string(),
            None => match require_env("R2_ENDPOINT") {
                Ok(e) => e,
                Err(_) => {
                    let account = require_env("CF_ACCOUNT_ID").map_err(|_| {
                        ConfigError::MissingEnv("R2_ENDPOINT or CF_ACCOUNT_ID".to_string())
                    })?;
                    format!("https://{}.r2.cloudflarestorage.com", account)
                }
            },
        };

        Ok(Self {
            access_key_id,
            secret_access_key,
            endpoint,
        })
    }
}

// ============ Keys ============

/// Object key for one item.
pub fn object_key(
    prefix: &str,
    kind: ContentKind,
    subreddit: &str,
    local_id: &str,
    fingerprint: &str,
) -> String {
    let tail = format!(
        "{}/{}/{}/{}/{}.txt",
        SOURCE_TAG,
        kind.tag(),
        subreddit,
        local_id,
        fingerprint
    );
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        tail
    } else {
        format!("{}/{}", prefix, tail)
    }
}

fn item_key(prefix: &str, item: &ContentItem) -> String {
    object_key(
        prefix,
        item.kind,
        &item.subreddit,
        &item.local_id,
        &item.fingerprint,
    )
}

// ============ Client ============

/// Signed S3 client bound to one bucket.
pub struct ObjectStoreClient {
    http: reqwest::Client,
    endpoint: Url,
    bucket: String,
    region: String,
    access_key_id: String,
    secret_access_key: String,
}

/// Result of a `HEAD` on one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadStatus {
    Present,
    Absent,
}

impl ObjectStoreClient {
    pub fn new(config: &UploadConfig, creds: &ObjectStoreCredentials) -> Result<Self> {
        let endpoint = Url::parse(creds.endpoint.trim_end_matches('/'))
            .with_context(|| format!("invalid object store endpoint: {}", creds.endpoint))?;
        if endpoint.host_str().is_none() {
            bail!("object store endpoint has no host: {}", creds.endpoint);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            endpoint,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            access_key_id: creds.access_key_id.clone(),
            secret_access_key: creds.secret_access_key.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// `HEAD /<bucket>/<key>`.
    pub async fn head(&self, key: &str) -> Outcome<HeadStatus> {
        let resp = match self.send(Method::HEAD, key, Vec::new(), None).await {
            Ok(r) => r,
            Err(e) => return Outcome::Failed(e),
        };
        let status = resp.status();
        match status {
            s if s.is_success() => Outcome::Success(HeadStatus::Present),
            s if s == StatusCode::NOT_FOUND => Outcome::Success(HeadStatus::Absent),
            _ => classify_error("HEAD", key, status.as_u16(), "", true),
        }
    }

    /// `PUT /<bucket>/<key>` with a text body.
    pub async fn put_text(&self, key: &str, text: &str) -> Outcome<()> {
        let resp = match self
            .send(Method::PUT, key, text.as_bytes().to_vec(), Some(TEXT_CONTENT_TYPE))
            .await
        {
            Ok(r) => r,
            Err(e) => return Outcome::Failed(e),
        };
        let status = resp.status();
        if status.is_success() {
            return Outcome::Success(());
        }
        let body = resp.text().await.unwrap_or_default();
        classify_error("PUT", key, status.as_u16(), &body, false)
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response> {
        let canonical_uri = format!("/{}/{}", uri_encode(&self.bucket), encode_key(key));
        let mut url = self.endpoint.clone();
        url.set_path(&canonical_uri);

        let host = host_header(&url)?;
        let payload_hash = hex_sha256(&body);
        let signed = sign_request(
            &SigningInput {
                method: method.as_str(),
                host: &host,
                canonical_uri: &canonical_uri,
                payload_hash: &payload_hash,
                region: &self.region,
                access_key_id: &self.access_key_id,
                secret_access_key: &self.secret_access_key,
            },
            Utc::now(),
        );

        let mut req = self
            .http
            .request(method.clone(), url)
            .header("Authorization", &signed.authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &signed.amz_date);
        if let Some(ct) = content_type {
            req = req.header(CONTENT_TYPE, ct);
        }
        if method == Method::PUT {
            req = req.body(body);
        }

        req.send()
            .await
            .map_err(|e| anyhow!("{} s3://{}/{} failed: {}", method, self.bucket, key, e))
    }
}

/// Sort a non-success status into rate limiting or failure.
fn classify_error<T>(op: &str, key: &str, status: u16, body: &str, bodyless: bool) -> Outcome<T> {
    let slow_down = body.contains("<Code>SlowDown</Code>") || (bodyless && body.is_empty());
    if status == 429 || (status == 503 && slow_down) {
        return Outcome::RateLimited(format!("object store {} HTTP {}", op, status));
    }
    let snippet: String = body.chars().take(300).collect();
    Outcome::Failed(anyhow!(
        "object store {} failed (HTTP {}) for key '{}': {}",
        op,
        status,
        key,
        snippet
    ))
}

// ============ Sink ============

/// Remote sink that stores item text as objects.
pub struct ObjectStoreSink {
    client: ObjectStoreClient,
    prefix: String,
    check_exists: bool,
}

impl ObjectStoreSink {
    pub fn new(client: ObjectStoreClient, prefix: &str, check_exists: bool) -> Self {
        Self {
            client,
            prefix: prefix.to_string(),
            check_exists,
        }
    }
}

#[async_trait]
impl RemoteSink for ObjectStoreSink {
    fn label(&self) -> String {
        format!("objects:{}", self.client.bucket())
    }

    async fn fetch_fingerprints(&self, items: &[ContentItem]) -> Result<HashMap<String, String>> {
        let mut known = HashMap::new();
        if !self.check_exists {
            return Ok(known);
        }
        for item in items {
            let key = item_key(&self.prefix, item);
            match self.client.head(&key).await.into_result()? {
                HeadStatus::Present => {
                    known.insert(item.item_id.clone(), item.fingerprint.clone());
                }
                HeadStatus::Absent => {}
            }
        }
        Ok(known)
    }

    /// One `PUT` per item. A refused `PUT` ends the chunk; the objects
    /// stored before it are still reported as accepted.
    async fn write(&self, chunk: &[ContentItem]) -> ChunkWrite {
        let mut records = Vec::with_capacity(chunk.len());
        for item in chunk {
            let key = item_key(&self.prefix, item);
            match self.client.put_text(&key, &item.text).await {
                Outcome::Success(()) => {}
                refused => return ChunkWrite::partial(records, refused),
            }
            let mut metadata = item.metadata.clone();
            metadata.insert("key".to_string(), key);
            records.push(ArtifactRecord {
                id: item.item_id.clone(),
                values: None,
                body: Some(item.text.clone()),
                metadata,
            });
        }
        ChunkWrite::complete(records)
    }
}

// ============ AWS SigV4 ============

struct SigningInput<'a> {
    method: &'a str,
    host: &'a str,
    canonical_uri: &'a str,
    payload_hash: &'a str,
    region: &'a str,
    access_key_id: &'a str,
    secret_access_key: &'a str,
}

struct SignedHeaders {
    authorization: String,
    amz_date: String,
}

/// Sign a request with no query string.
fn sign_request(input: &SigningInput<'_>, now: DateTime<Utc>) -> SignedHeaders {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let headers = [
        ("host", input.host),
        ("x-amz-content-sha256", input.payload_hash),
        ("x-amz-date", amz_date.as_str()),
    ];
    let signed_headers = headers
        .iter()
        .map(|(k, _)| *k)
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        input.method, input.canonical_uri, canonical_headers, signed_headers, input.payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, input.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key =
        derive_signing_key(input.secret_access_key, &date_stamp, input.region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    SignedHeaders {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            input.access_key_id, credential_scope, signed_headers, signature
        ),
        amz_date,
    }
}

/// `host[:port]` as sent in the `Host` header.
fn host_header(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("URL has no host: {}", url))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding; only `A-Z a-z 0-9 - _ . ~` pass through.
fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}

/// Encode each key segment, keeping `/` separators.
fn encode_key(key: &str) -> String {
    key.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}
