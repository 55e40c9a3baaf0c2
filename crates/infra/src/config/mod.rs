//! Configuration loading.
//!
//! Environment variables win; a TOML or JSON config file is the fallback.
//! `load` probes `TALLYPORT_CONFIG`, then `tallyport.toml`, then
//! `config/tallyport.toml` relative to the working directory.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tallyport_common::resilience::rate_limit::{ServiceLimits, SubjectLimits};
use thiserror::Error;
use tracing::debug;

/// Environment variable naming the config file explicitly.
const CONFIG_PATH_VAR: &str = "TALLYPORT_CONFIG";

/// Probed when no explicit path is set.
const CONFIG_PROBE_PATHS: &[&str] = &["tallyport.toml", "config/tallyport.toml"];

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is unset
    #[error("missing required environment variable {0}")]
    MissingVar(String),

    /// An environment variable could not be parsed
    #[error("invalid value for {name}: {reason}")]
    InvalidVar {
        /// Variable name
        name: String,
        /// Why parsing failed
        reason: String,
    },

    /// Neither environment variables nor a config file were found
    #[error("no configuration found: set TALLYPORT_* variables or provide tallyport.toml")]
    NotFound,

    /// Config file could not be read
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("failed to parse config file {path}: {reason}")]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// Config file extension is not toml or json
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
}

/// OAuth provider endpoints and client credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Token endpoint URL
    pub token_endpoint: String,
    /// Revocation endpoint URL
    pub revoke_endpoint: String,
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Vault keying material.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultConfig {
    /// Long-lived master secret the per-blob keys derive from
    pub master_secret: String,
    /// PBKDF2 iteration count
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
}

/// Rate limiter window limits.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Per `(subject, service)` limits
    #[serde(default)]
    pub service: ServiceLimits,
    /// Per-subject aggregate limits
    #[serde(default)]
    pub subject: SubjectLimits,
}

/// Lifecycle timing knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleConfig {
    /// Refresh lead time in seconds
    #[serde(default = "default_refresh_buffer_secs")]
    pub refresh_buffer_secs: u64,
    /// Stale-credential retention in days
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Interval between sweeper runs in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            refresh_buffer_secs: default_refresh_buffer_secs(),
            retention_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Provider endpoints and credentials
    pub provider: ProviderConfig,
    /// Vault keying
    pub vault: VaultConfig,
    /// Rate limits
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    /// Lifecycle timing
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_kdf_iterations() -> u32 {
    200_000
}

const fn default_refresh_buffer_secs() -> u64 {
    300
}

const fn default_retention_days() -> u32 {
    30
}

const fn default_sweep_interval_secs() -> u64 {
    3600
}

impl Config {
    /// Load configuration, environment first, file fallback.
    pub fn load() -> Result<Self, ConfigError> {
        // A .env file is a convenience, not a requirement
        dotenvy::dotenv().ok();

        if std::env::var("TALLYPORT_TOKEN_ENDPOINT").is_ok() {
            debug!("loading configuration from environment");
            return Self::from_env();
        }

        if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
            return Self::from_file(Path::new(&path));
        }
        for candidate in CONFIG_PROBE_PATHS {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::from_file(path);
            }
        }
        Err(ConfigError::NotFound)
    }

    /// Build configuration purely from `TALLYPORT_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            provider: ProviderConfig {
                token_endpoint: require_var("TALLYPORT_TOKEN_ENDPOINT")?,
                revoke_endpoint: require_var("TALLYPORT_REVOKE_ENDPOINT")?,
                client_id: require_var("TALLYPORT_CLIENT_ID")?,
                client_secret: require_var("TALLYPORT_CLIENT_SECRET")?,
                timeout_secs: parse_var("TALLYPORT_PROVIDER_TIMEOUT_SECS", default_timeout_secs())?,
            },
            vault: VaultConfig {
                master_secret: require_var("TALLYPORT_VAULT_MASTER_SECRET")?,
                kdf_iterations: parse_var("TALLYPORT_KDF_ITERATIONS", default_kdf_iterations())?,
            },
            rate_limits: RateLimitConfig::default(),
            lifecycle: LifecycleConfig {
                refresh_buffer_secs: parse_var(
                    "TALLYPORT_REFRESH_BUFFER_SECS",
                    default_refresh_buffer_secs(),
                )?,
                retention_days: parse_var("TALLYPORT_RETENTION_DAYS", default_retention_days())?,
                sweep_interval_secs: parse_var(
                    "TALLYPORT_SWEEP_INTERVAL_SECS",
                    default_sweep_interval_secs(),
                )?,
            },
        })
    }

    /// Parse a config file, dispatching on its extension.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or_default();
        match extension {
            "toml" => toml::from_str(&contents).map_err(|err| ConfigError::Parse {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }),
            "json" => serde_json::from_str(&contents).map_err(|err| ConfigError::Parse {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }
}

fn require_var(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|err: T::Err| ConfigError::InvalidVar {
            name: name.to_string(),
            reason: err.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
