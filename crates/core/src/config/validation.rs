//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Largest retry budget accepted from configuration.
const MAX_RETRIES: usize = 100;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `db_path` is empty
    /// - `timeout_ms` is 0 or exceeds 5 minutes
    /// - `fetch_size`, `batch_size`, `page_size` or `cache.max_size` is 0
    /// - the retry policy has a backoff factor below 1, a base delay above
    ///   its max delay, or more than 100 retries
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_path.as_os_str().is_empty() {
            return Err(invalid("db_path", "must not be empty"));
        }

        if self.timeout_ms == 0 {
            return Err(invalid("timeout_ms", "must be greater than 0"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        for (field, value) in [
            ("fetch_size", self.fetch_size),
            ("batch_size", self.batch_size),
            ("page_size", self.page_size),
            ("cache.max_size", self.cache.max_size),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        if self.retry.retries > MAX_RETRIES {
            return Err(invalid("retry.retries", "must not exceed 100"));
        }
        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return Err(invalid("retry.backoff_factor", "must be a finite number >= 1.0"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(invalid("retry.base_delay_ms", "must not exceed retry.max_delay_ms"));
        }

        if self.retry.retries > 0 && self.retry.retry_on.is_empty() {
            tracing::warn!(retries = self.retry.retries, "retry.retry_on is empty; no error will be retried");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheSettings, RetrySettings};

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_timeout_zero() {
        let config = AppConfig { timeout_ms: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));
    }

    #[test]
    fn test_validate_timeout_exceeds_limit() {
        let config = AppConfig { timeout_ms: 301_000, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));
    }

    #[test]
    fn test_validate_zero_page_size() {
        let config = AppConfig { page_size: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "page_size"));
    }

    #[test]
    fn test_validate_zero_cache_size() {
        let config = AppConfig { cache: CacheSettings { max_size: 0, ttl_secs: None }, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "cache.max_size"));
    }

    #[test]
    fn test_validate_backoff_below_one() {
        let config =
            AppConfig { retry: RetrySettings { backoff_factor: 0.5, ..Default::default() }, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "retry.backoff_factor"));
    }

    #[test]
    fn test_validate_backoff_nan() {
        let config =
            AppConfig { retry: RetrySettings { backoff_factor: f64::NAN, ..Default::default() }, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_base_delay_above_max() {
        let config = AppConfig {
            retry: RetrySettings { base_delay_ms: 5_000, max_delay_ms: 1_000, ..Default::default() },
            ..Default::default()
        };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "retry.base_delay_ms"));
    }

    #[test]
    fn test_validate_edge_case_values() {
        let config = AppConfig {
            timeout_ms: 1,
            fetch_size: 1,
            batch_size: 1,
            page_size: 1,
            retry: RetrySettings { retries: 0, backoff_factor: 1.0, ..Default::default() },
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_max_values() {
        let config = AppConfig {
            timeout_ms: 300_000,
            retry: RetrySettings { retries: 100, ..Default::default() },
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
