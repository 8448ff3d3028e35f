use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Largest `get_by_ids` request the vector index accepts.
pub const MAX_PROBE_BATCH: usize = 20;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub staging: StagingConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: Option<IndexConfig>,
    #[serde(default)]
    pub upload: Option<UploadConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StagingConfig {
    pub root: PathBuf,
    #[serde(default)]
    pub subreddits: Vec<String>,
    /// Trailing days to scan; `<= 0` walks everything.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

fn default_lookback_days() -> i64 {
    7
}
fn default_max_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PacingConfig {
    #[serde(default = "default_sleep_ms")]
    pub sleep_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_retry_max")]
    pub retry_max: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_on_rate_limit")]
    pub on_rate_limit: String,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            sleep_ms: default_sleep_ms(),
            jitter_ms: default_jitter_ms(),
            retry_max: default_retry_max(),
            retry_backoff_ms: default_retry_backoff_ms(),
            on_rate_limit: default_on_rate_limit(),
        }
    }
}

fn default_sleep_ms() -> u64 {
    250
}
fn default_jitter_ms() -> u64 {
    250
}
fn default_retry_max() -> u32 {
    5
}
fn default_retry_backoff_ms() -> u64 {
    1000
}
fn default_on_rate_limit() -> String {
    "stop".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Overrides the provider's public endpoint.
    #[serde(default)]
    pub api_base: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            task_type: default_task_type(),
            timeout_secs: default_timeout_secs(),
            api_base: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_task_type() -> String {
    "RETRIEVAL_DOCUMENT".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Vector index name.
    pub name: String,
    pub vector_dims: usize,
    #[serde(default = "default_probe_batch_size")]
    pub probe_batch_size: usize,
    #[serde(default = "default_index_write_batch_size")]
    pub write_batch_size: usize,
    pub max_vectors_per_run: u64,
    #[serde(default = "default_index_artifact_dir")]
    pub artifact_dir: PathBuf,
    #[serde(default = "default_cf_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub pacing: Option<PacingConfig>,
}

fn default_probe_batch_size() -> usize {
    MAX_PROBE_BATCH
}
fn default_index_write_batch_size() -> usize {
    16
}
fn default_index_artifact_dir() -> PathBuf {
    PathBuf::from("data/reddit/03_index")
}
fn default_cf_api_base() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    /// HEAD each key before writing it.
    #[serde(default = "default_check_exists")]
    pub check_exists: bool,
    /// `0` means unlimited.
    #[serde(default)]
    pub max_objects_per_run: u64,
    #[serde(default = "default_region")]
    pub region: String,
    /// Falls back to `R2_ENDPOINT`, then to the account's R2 endpoint.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_probe_batch_size")]
    pub flush_size: usize,
    #[serde(default = "default_upload_write_batch_size")]
    pub write_batch_size: usize,
    #[serde(default = "default_upload_artifact_dir")]
    pub artifact_dir: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub pacing: Option<PacingConfig>,
}

fn default_check_exists() -> bool {
    true
}
fn default_region() -> String {
    "auto".to_string()
}
fn default_upload_write_batch_size() -> usize {
    1
}
fn default_upload_artifact_dir() -> PathBuf {
    PathBuf::from("data/reddit/03_objects")
}

impl Config {
    pub fn index_pacing(&self) -> &PacingConfig {
        self.index
            .as_ref()
            .and_then(|i| i.pacing.as_ref())
            .unwrap_or(&self.pacing)
    }

    pub fn upload_pacing(&self) -> &PacingConfig {
        self.upload
            .as_ref()
            .and_then(|u| u.pacing.as_ref())
            .unwrap_or(&self.pacing)
    }

    /// The `[index]` section, or a configuration error naming it.
    pub fn require_index(&self) -> Result<&IndexConfig, ConfigError> {
        self.index
            .as_ref()
            .ok_or_else(|| ConfigError::invalid("[index] section is required for `index`"))
    }

    /// The `[upload]` section, or a configuration error naming it.
    pub fn require_upload(&self) -> Result<&UploadConfig, ConfigError> {
        self.upload
            .as_ref()
            .ok_or_else(|| ConfigError::invalid("[upload] section is required for `upload`"))
    }
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    validate(&mut config)?;
    Ok(config)
}

/// Check cross-field constraints and clamp values with hard service limits.
pub fn validate(config: &mut Config) -> Result<(), ConfigError> {
    if config.staging.max_chars == 0 {
        return Err(ConfigError::invalid("staging.max_chars must be > 0"));
    }

    validate_pacing("pacing", &config.pacing)?;

    match config.embedding.provider.as_str() {
        "disabled" | "gemini" | "openai" => {}
        other => {
            return Err(ConfigError::invalid(format!(
                "unknown embedding provider: '{}'. Must be disabled, gemini, or openai.",
                other
            )))
        }
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            return Err(ConfigError::invalid(format!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            )));
        }
        if config.embedding.model.is_none() {
            return Err(ConfigError::invalid(format!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            )));
        }
    }

    if let Some(index) = config.index.as_mut() {
        if index.name.trim().is_empty() {
            return Err(ConfigError::invalid("index.name must not be empty"));
        }
        if index.max_vectors_per_run == 0 {
            return Err(ConfigError::invalid("index.max_vectors_per_run must be > 0"));
        }
        if index.write_batch_size == 0 {
            return Err(ConfigError::invalid("index.write_batch_size must be > 0"));
        }
        index.probe_batch_size = index.probe_batch_size.clamp(1, MAX_PROBE_BATCH);
        if let Some(pacing) = &index.pacing {
            validate_pacing("index.pacing", pacing)?;
        }
        if let Some(dims) = config.embedding.dims {
            if dims != index.vector_dims {
                return Err(ConfigError::invalid(format!(
                    "embedding.dims must equal index.vector_dims (embedding.dims={} vector_dims={})",
                    dims, index.vector_dims
                )));
            }
        }
    }

    if let Some(upload) = config.upload.as_mut() {
        if upload.bucket.trim().is_empty() {
            return Err(ConfigError::invalid("upload.bucket must not be empty"));
        }
        if upload.write_batch_size == 0 {
            return Err(ConfigError::invalid("upload.write_batch_size must be > 0"));
        }
        upload.flush_size = upload.flush_size.max(1);
        if let Some(pacing) = &upload.pacing {
            validate_pacing("upload.pacing", pacing)?;
        }
    }

    Ok(())
}

fn validate_pacing(section: &str, pacing: &PacingConfig) -> Result<(), ConfigError> {
    if pacing.on_rate_limit != "stop" {
        return Err(ConfigError::invalid(format!(
            "{}.on_rate_limit must be \"stop\" (got \"{}\")",
            section, pacing.on_rate_limit
        )));
    }
    if pacing.retry_max > 16 {
        return Err(ConfigError::invalid(format!(
            "{}.retry_max must be <= 16",
            section
        )));
    }
    Ok(())
}
