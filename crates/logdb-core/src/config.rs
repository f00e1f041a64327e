//! Configuration types for logdb.
//!
//! [`Config::load`] layers, in order: the embedded defaults, an optional TOML
//! file, and `LOGDB_*` environment variables (`__` separates sections, e.g.
//! `LOGDB_STORE__URL`). The result is validated once; a bad value is a
//! [`ConfigError`] at startup. [`Config::defaults`] returns the same defaults
//! without touching the filesystem or environment (useful in tests).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::types::sanitize_tag;

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"
[server]
listen             = "127.0.0.1:9000"
network            = "tcp"
request_timeout_ms = 100
max_connections    = 100

[store]
url        = "http://localhost:7700"
api_key    = ""
timeout_ms = 100

[breaker]
max_error_count     = 100
reset_interval_secs = 600

[logging]
level  = "info"
format = "console"

[ingest]
default_tag = "default"
"#;

const ENV_PREFIX: &str = "LOGDB";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Source(#[from] config::ConfigError),

    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Public config types
// ---------------------------------------------------------------------------

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Socket family the HTTP surface listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Tcp,
    Unix,
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_network")]
    pub network: Network,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Admission pool capacity: writes allowed in flight at once.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_listen() -> String { "127.0.0.1:9000".to_string() }
fn default_network() -> Network { Network::Tcp }
fn default_request_timeout_ms() -> u64 { 100 }
fn default_max_connections() -> usize { 100 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            network: default_network(),
            request_timeout_ms: default_request_timeout_ms(),
            max_connections: default_max_connections(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// `[store]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
    /// Bearer token; empty means unauthenticated.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_store_url() -> String { "http://localhost:7700".to_string() }
fn default_store_timeout_ms() -> u64 { 100 }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            api_key: String::new(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn api_key(&self) -> Option<&str> {
        Some(self.api_key.as_str()).filter(|key| !key.is_empty())
    }
}

/// `[breaker]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_max_error_count")]
    pub max_error_count: u32,
    #[serde(default = "default_reset_interval_secs")]
    pub reset_interval_secs: u64,
}

fn default_max_error_count() -> u32 { 100 }
fn default_reset_interval_secs() -> u64 { 600 }

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_error_count: default_max_error_count(),
            reset_interval_secs: default_reset_interval_secs(),
        }
    }
}

impl BreakerConfig {
    pub fn reset_interval(&self) -> Duration {
        Duration::from_secs(self.reset_interval_secs)
    }
}

/// Output format of the process log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Console,
    Json,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> LogFormat { LogFormat::Console }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// `[ingest]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IngestConfig {
    /// Destination for tags that are empty after sanitization.
    #[serde(default = "default_tag")]
    pub default_tag: String,
}

fn default_tag() -> String { "default".to_string() }

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_tag: default_tag(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    /// Load the embedded defaults, then `path` (if given, it must exist),
    /// then `LOGDB_*` environment overrides, and validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml));
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let cfg: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Return the built-in defaults without touching the filesystem.
    pub fn defaults() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            breaker: BreakerConfig::default(),
            logging: LoggingConfig::default(),
            ingest: IngestConfig::default(),
        }
    }

    /// Reject values the rest of the process cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen.trim().is_empty() {
            return Err(invalid("server.listen", "must not be empty"));
        }
        if self.server.max_connections == 0 {
            return Err(invalid("server.max_connections", "must be at least 1"));
        }
        if self.server.request_timeout_ms == 0 {
            return Err(invalid("server.request_timeout_ms", "must be at least 1"));
        }
        if !self.store.url.starts_with("http://") || self.store.url.len() <= "http://".len() {
            return Err(invalid(
                "store.url",
                format!("expected an http:// URL, got {:?}", self.store.url),
            ));
        }
        if self.store.timeout_ms == 0 {
            return Err(invalid("store.timeout_ms", "must be at least 1"));
        }
        if self.breaker.reset_interval_secs == 0 {
            return Err(invalid("breaker.reset_interval_secs", "must be at least 1"));
        }
        if self.logging.level.trim().is_empty() {
            return Err(invalid("logging.level", "must not be empty"));
        }
        let tag = &self.ingest.default_tag;
        if tag.is_empty() || sanitize_tag(tag) != *tag {
            return Err(invalid(
                "ingest.default_tag",
                format!("{tag:?} must be non-empty and alphanumeric"),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
