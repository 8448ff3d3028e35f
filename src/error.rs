//! Error types that need to be told apart at the process boundary.
//!
//! Most plumbing in this crate propagates [`anyhow::Error`]. Configuration
//! problems are the exception: they must be reported before any network
//! activity and exit with code 2, so they carry their own type and `main`
//! finds them with [`exit_code`].

use std::path::PathBuf;

use thiserror::Error;

/// Exit code for configuration errors (missing credentials, bad values).
pub const EXIT_CONFIG: u8 = 2;
/// Exit code for fatal transport, service, or I/O errors.
pub const EXIT_FAILURE: u8 = 1;

/// A problem with the configuration file, CLI flags, or environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A required environment variable is unset or empty.
    #[error("missing environment variable: {0}")]
    MissingEnv(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ConfigError::Invalid(msg.into())
    }
}

/// Map a top-level error to the process exit code.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    if err.chain().any(|cause| cause.is::<ConfigError>()) {
        EXIT_CONFIG
    } else {
        EXIT_FAILURE
    }
}

/// Read a required, non-empty environment variable.
pub fn require_env(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::MissingEnv(name.to_string())),
    }
}

/// Read the first non-empty variable among `names`.
pub fn require_any_env(names: &[&str]) -> Result<String, ConfigError> {
    names
        .iter()
        .find_map(|name| require_env(name).ok())
        .ok_or_else(|| ConfigError::MissingEnv(names.join(" or ")))
}
