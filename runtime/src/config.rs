//! Typed service configuration.
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. A TOML file ([`Config::load`])
//! 3. Environment variables, which always win
//!
//! Environment overrides go through a lookup function so that tests can
//! supply a map instead of touching the process environment.
//!
//! | Variable | Field |
//! |---|---|
//! | `SERVICE_ID` | `service_id` |
//! | `HOST` | `host` |
//! | `PORT` | `port` |
//! | `IDEMPOTENCY_TTL_SECONDS` | `idempotency_ttl_seconds` |
//! | `SHUTDOWN_TIMEOUT_SECONDS` | `shutdown_timeout_seconds` |
//! | `READ_HEADER_TIMEOUT_SECONDS` | `read_header_timeout_seconds` |
//! | `CACHE_DEFAULT_TTL_SECONDS` | `cache.default_ttl_seconds` |
//! | `DATABASE_URL` | `dependencies.database_url` |
//! | `REDIS_URL` | `dependencies.redis_url` |
//! | `KAFKA_BROKERS` | `dependencies.kafka_brokers` |
//!
//! # Example
//!
//! ```
//! use service_spine_runtime::config::Config;
//!
//! let config = Config::from_lookup(|name| match name {
//!     "SERVICE_ID" => Some("cache".to_string()),
//!     "PORT" => Some("9000".to_string()),
//!     _ => None,
//! })?;
//! assert_eq!(config.service_id, "cache");
//! assert_eq!(config.port, 9000);
//! assert_eq!(config.idempotency_ttl_seconds, 604_800);
//! # Ok::<(), service_spine_runtime::config::ConfigError>(())
//! ```

use crate::idempotency::{DEFAULT_TTL_SECONDS, MAX_TTL_SECONDS};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`Config`].
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying parse error.
        source: toml::de::Error,
    },

    /// An environment override has the wrong type.
    #[error("environment variable {name} has invalid value {value:?}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },

    /// The merged configuration is unusable.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Cache domain settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when a put request asks for none.
    pub default_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 300,
        }
    }
}

/// Optional external dependencies, reported by `/health`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    /// Relational database URL.
    pub database_url: Option<String>,
    /// Redis URL.
    pub redis_url: Option<String>,
    /// Kafka bootstrap brokers (comma-separated).
    pub kafka_brokers: Option<String>,
}

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service id; used in metric labels and health reports.
    pub service_id: String,
    /// Listen host.
    pub host: String,
    /// Listen port. `0` picks an ephemeral port.
    pub port: u16,
    /// Lifetime of idempotency records.
    pub idempotency_ttl_seconds: u64,
    /// Drain deadline on shutdown.
    pub shutdown_timeout_seconds: u64,
    /// Maximum time to receive request headers.
    pub read_header_timeout_seconds: u64,
    /// Cache domain settings.
    pub cache: CacheConfig,
    /// External dependencies.
    pub dependencies: DependencyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_id: "service-spine".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            idempotency_ttl_seconds: DEFAULT_TTL_SECONDS,
            shutdown_timeout_seconds: 5,
            read_header_timeout_seconds: 5,
            cache: CacheConfig::default(),
            dependencies: DependencyConfig::default(),
        }
    }
}

impl Config {
    /// Load a TOML file, then apply process environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, an
    /// override is malformed, or validation fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.with_overrides(|name| std::env::var(name).ok())
    }

    /// Defaults plus process environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an override is malformed or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults plus overrides from an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an override is malformed or validation fails.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Self::default().with_overrides(lookup)
    }

    /// Parse TOML without applying overrides or validating.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for malformed input.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply environment overrides, then validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an override is malformed or validation fails.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).map(|value| value.trim().to_string()).filter(|value| !value.is_empty());

        if let Some(value) = get("SERVICE_ID") {
            self.service_id = value;
        }
        if let Some(value) = get("HOST") {
            self.host = value;
        }
        if let Some(value) = get("PORT") {
            self.port = parse_env("PORT", value)?;
        }
        if let Some(value) = get("IDEMPOTENCY_TTL_SECONDS") {
            self.idempotency_ttl_seconds = parse_env("IDEMPOTENCY_TTL_SECONDS", value)?;
        }
        if let Some(value) = get("SHUTDOWN_TIMEOUT_SECONDS") {
            self.shutdown_timeout_seconds = parse_env("SHUTDOWN_TIMEOUT_SECONDS", value)?;
        }
        if let Some(value) = get("READ_HEADER_TIMEOUT_SECONDS") {
            self.read_header_timeout_seconds = parse_env("READ_HEADER_TIMEOUT_SECONDS", value)?;
        }
        if let Some(value) = get("CACHE_DEFAULT_TTL_SECONDS") {
            self.cache.default_ttl_seconds = parse_env("CACHE_DEFAULT_TTL_SECONDS", value)?;
        }
        if let Some(value) = get("DATABASE_URL") {
            self.dependencies.database_url = Some(value);
        }
        if let Some(value) = get("REDIS_URL") {
            self.dependencies.redis_url = Some(value);
        }
        if let Some(value) = get("KAFKA_BROKERS") {
            self.dependencies.kafka_brokers = Some(value);
        }

        self.validate()?;
        Ok(self)
    }

    /// Check invariants of the merged configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_id.trim().is_empty() {
            return Err(ConfigError::Validation("service_id must not be empty".into()));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation("host must not be empty".into()));
        }
        if self.idempotency_ttl_seconds == 0 || self.idempotency_ttl_seconds > MAX_TTL_SECONDS {
            return Err(ConfigError::Validation(format!(
                "idempotency_ttl_seconds must be between 1 and {MAX_TTL_SECONDS}"
            )));
        }
        if self.shutdown_timeout_seconds == 0 {
            return Err(ConfigError::Validation("shutdown_timeout_seconds must be positive".into()));
        }
        if self.read_header_timeout_seconds == 0 {
            return Err(ConfigError::Validation("read_header_timeout_seconds must be positive".into()));
        }
        if self.cache.default_ttl_seconds == 0 {
            return Err(ConfigError::Validation("cache.default_ttl_seconds must be positive".into()));
        }
        Ok(())
    }

    /// Listen address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `host` is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .or_else(|_| format!("[{}]:{}", self.host, self.port).parse())
            .map_err(|_| ConfigError::Validation(format!("host {} is not an IP address", self.host)))
    }

    /// Drain deadline on shutdown.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// Read-header timeout.
    #[must_use]
    pub const fn read_header_timeout(&self) -> Duration {
        Duration::from_secs(self.read_header_timeout_seconds)
    }
}

fn parse_env<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.idempotency_ttl_seconds, 604_800);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(config.read_header_timeout(), Duration::from_secs(5));
        assert_eq!(config.cache.default_ttl_seconds, 300);
        assert!(config.dependencies.database_url.is_none());
    }

    #[test]
    fn test_env_overrides_file() {
        let file = Config::from_toml_str(
            r#"
            service_id = "webhooks"
            port = 7000

            [dependencies]
            redis_url = "redis://file"
            "#,
        )
        .unwrap();
        assert_eq!(file.port, 7000);
        assert_eq!(file.idempotency_ttl_seconds, DEFAULT_TTL_SECONDS);

        let merged = file
            .with_overrides(lookup(&[("PORT", "7100"), ("REDIS_URL", "redis://env")]))
            .unwrap();
        assert_eq!(merged.service_id, "webhooks");
        assert_eq!(merged.port, 7100);
        assert_eq!(merged.dependencies.redis_url.as_deref(), Some("redis://env"));
    }

    #[test]
    fn test_blank_override_is_ignored() {
        let config = Config::from_lookup(lookup(&[("SERVICE_ID", "  ")])).unwrap();
        assert_eq!(config.service_id, "service-spine");
    }

    #[test]
    fn test_malformed_override_names_the_variable() {
        let err = Config::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { name: "PORT", .. }));
    }

    #[test]
    fn test_zero_ttl_is_rejected() {
        let err = Config::from_lookup(lookup(&[("IDEMPOTENCY_TTL_SECONDS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_bind_addr() {
        let config = Config::from_lookup(lookup(&[("HOST", "127.0.0.1"), ("PORT", "0")])).unwrap();
        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:0");

        let config = Config::from_lookup(lookup(&[("HOST", "::1")])).unwrap();
        assert_eq!(config.bind_addr().unwrap().to_string(), "[::1]:8080");

        let config = Config::from_lookup(lookup(&[("HOST", "localhost")])).unwrap();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
