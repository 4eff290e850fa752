//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (LAZYDB_*, nested keys split on `__`)
//! 2. TOML config file (if LAZYDB_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::ErrorKind;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (LAZYDB_*)
/// 2. TOML config file (if LAZYDB_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite database.
    ///
    /// Set via LAZYDB_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Connection (busy) timeout in milliseconds.
    ///
    /// Set via LAZYDB_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Rows pulled from the cursor per step when streaming single rows.
    ///
    /// Set via LAZYDB_FETCH_SIZE environment variable.
    #[serde(default = "default_chunk_size")]
    pub fetch_size: usize,

    /// Rows per batch for batch streaming.
    ///
    /// Set via LAZYDB_BATCH_SIZE environment variable.
    #[serde(default = "default_chunk_size")]
    pub batch_size: usize,

    /// Rows per page for pagination.
    ///
    /// Set via LAZYDB_PAGE_SIZE environment variable.
    #[serde(default = "default_chunk_size")]
    pub page_size: usize,

    /// Retry policy for wrapped operations (LAZYDB_RETRY__*).
    #[serde(default)]
    pub retry: RetrySettings,

    /// Result cache bounds (LAZYDB_CACHE__*).
    #[serde(default)]
    pub cache: CacheSettings,
}

/// Retry settings for wrapped database operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    #[serde(default = "default_retries")]
    pub retries: usize,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Multiplier applied to the delay after every failed attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Upper bound for the delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Inflate each wait by up to 10%.
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Error kinds worth another attempt.
    #[serde(default = "default_retry_on")]
    pub retry_on: Vec<ErrorKind>,
}

/// Result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Maximum number of cached results.
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,

    /// Entry lifetime in seconds; entries never expire when unset.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./users.db")
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_chunk_size() -> usize {
    100
}

fn default_retries() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

fn default_retry_on() -> Vec<ErrorKind> {
    vec![ErrorKind::Connectivity, ErrorKind::Busy]
}

fn default_cache_max_size() -> usize {
    100
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            timeout_ms: default_timeout_ms(),
            fetch_size: default_chunk_size(),
            batch_size: default_chunk_size(),
            page_size: default_chunk_size(),
            retry: RetrySettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
            retry_on: default_retry_on(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { max_size: default_cache_max_size(), ttl_secs: None }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

impl AppConfig {
    /// Connection timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `LAZYDB_`
    /// 2. TOML file from `LAZYDB_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("LAZYDB_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("LAZYDB_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
