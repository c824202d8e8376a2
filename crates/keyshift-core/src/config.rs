//! Configuration module for keyshift
//!
//! Loads and validates configuration from TOML files, with defaults for
//! every value. Command-line flags are applied on top by the binary.
//!
//! ```toml
//! [source]
//! url = "redis://old-host:6379"
//!
//! [destination]
//! url = "redis://:s3cret@new-host:6379"
//!
//! [transfer]
//! workers = 100
//! enumeration = "scan"
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::address::EndpointAddr;
use crate::error::{KeyshiftError, Result};

/// Default number of concurrent transfer workers
pub const DEFAULT_WORKERS: usize = 100;

/// Default number of commands sent per pipeline round-trip during flush
pub const DEFAULT_PIPELINE_BATCH: usize = 1000;

/// Default `COUNT` hint for `SCAN`
pub const DEFAULT_SCAN_COUNT: u64 = 1000;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store the keys are read from
    pub source: EndpointConfig,

    /// Store the keys are written to (cleared first)
    pub destination: EndpointConfig,

    /// Transfer engine tuning
    pub transfer: TransferSettings,

    /// Network timeouts
    pub timeouts: TimeoutConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            KeyshiftError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| KeyshiftError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate the configuration
    ///
    /// Both endpoint URLs must be present and parseable, and must not point
    /// at the same instance.
    pub fn validate(&self) -> Result<()> {
        let source = self.source.addr("source")?;
        let destination = self.destination.addr("destination")?;

        if source.host == destination.host && source.port == destination.port {
            return Err(KeyshiftError::Config(format!(
                "source and destination are the same instance ({})",
                source.socket_addr()
            )));
        }

        self.transfer.validate()?;
        self.timeouts.validate()?;
        Ok(())
    }

    /// Serialize the effective configuration back to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| KeyshiftError::Config(format!("Failed to serialize config: {}", e)))
    }
}

/// Connection settings for one endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Connection string, see [`EndpointAddr`]
    pub url: Option<String>,

    /// Maximum pooled connections (defaults to the worker count)
    pub max_connections: Option<usize>,
}

impl EndpointConfig {
    /// Parse the configured URL; `role` names the endpoint in errors.
    pub fn addr(&self, role: &str) -> Result<EndpointAddr> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| KeyshiftError::Config(format!("{} url is required", role)))?;
        EndpointAddr::parse(url)
    }
}

/// How keys are listed on the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnumerationStrategy {
    /// A single `KEYS <pattern>` call
    #[default]
    Keys,

    /// Cursor iteration with `SCAN`
    Scan,
}

impl std::str::FromStr for EnumerationStrategy {
    type Err = KeyshiftError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "keys" => Ok(Self::Keys),
            "scan" => Ok(Self::Scan),
            other => Err(KeyshiftError::Config(format!(
                "unknown enumeration strategy '{}', expected keys or scan",
                other
            ))),
        }
    }
}

/// Transfer engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Number of concurrent workers
    pub workers: usize,

    /// Task queue capacity; `None` sizes the queue to the key count
    pub queue_capacity: Option<usize>,

    /// Key pattern to enumerate. Reconciliation compares whole-database
    /// counts regardless, so a narrower pattern ends in a mismatch unless
    /// every source key matches.
    pub pattern: String,

    /// Enumeration strategy
    pub enumeration: EnumerationStrategy,

    /// `COUNT` hint per `SCAN` call
    pub scan_count: u64,

    /// Commands per pipeline round-trip when flushing
    pub pipeline_batch: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: None,
            pattern: "*".to_string(),
            enumeration: EnumerationStrategy::Keys,
            scan_count: DEFAULT_SCAN_COUNT,
            pipeline_batch: DEFAULT_PIPELINE_BATCH,
        }
    }
}

impl TransferSettings {
    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(KeyshiftError::Config("workers cannot be 0".to_string()));
        }
        if self.queue_capacity == Some(0) {
            return Err(KeyshiftError::Config(
                "queue_capacity cannot be 0".to_string(),
            ));
        }
        if self.pattern.is_empty() {
            return Err(KeyshiftError::Config("pattern cannot be empty".to_string()));
        }
        if self.scan_count == 0 {
            return Err(KeyshiftError::Config("scan_count cannot be 0".to_string()));
        }
        if self.pipeline_batch == 0 {
            return Err(KeyshiftError::Config(
                "pipeline_batch cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Network timeouts, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP connect plus handshake
    pub connect_ms: u64,

    /// A single request/reply, or one pipeline chunk
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            request_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    /// Connect timeout as a `Duration`
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    /// Request timeout as a `Duration`
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.connect_ms == 0 || self.request_ms == 0 {
            return Err(KeyshiftError::Config(
                "timeouts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json, compact)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human-readable format
    Pretty,

    /// JSON format
    Json,

    /// Single-line human-readable format
    #[default]
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = KeyshiftError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => Err(KeyshiftError::Config(format!(
                "unknown log format '{}'",
                other
            ))),
        }
    }
}
