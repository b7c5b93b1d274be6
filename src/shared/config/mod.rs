//! Application configuration module
//!
//! Configuration is assembled in three layers:
//!
//! 1. Built-in defaults (`AppConfig::default()`)
//! 2. An optional TOML file named by the `CANVAS_CONFIG` environment variable
//! 3. Environment overrides (`DATABASE_URL`, `SERVER_PORT`, `BIND_ADDR`)
//!
//! Tests bypass all of this with `AppConfig::builder()`.
//!
//! # Example file
//!
//! ```toml
//! database_url = "sqlite://canvas.db?mode=rwc"
//! poll_interval_ms = 2000
//!
//! [[providers]]
//! name = "imagine"
//! mode = "poll"
//! base_url = "https://imagine.example.com/v1"
//! task_types = ["image"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::shared::task::{CompletionMode, TaskType};

/// Environment variable naming the optional TOML config file
pub const CONFIG_PATH_ENV: &str = "CANVAS_CONFIG";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Address the HTTP server binds to
    pub bind_addr: String,
    /// Port the HTTP server listens on
    pub port: u16,
    /// sqlx connection URL (SQLite)
    pub database_url: String,
    /// Interval between periodic snapshot saves
    pub snapshot_interval_secs: u64,
    /// Interval between polling passes while tasks are outstanding
    pub poll_interval_ms: u64,
    /// Delay before the first poll of a freshly submitted task
    pub initial_poll_delay_ms: u64,
    /// Base delay for exponential retry backoff
    pub retry_base_delay_ms: u64,
    /// Default retry budget for new tasks
    pub max_retries: u32,
    /// Tasks older than this are no longer polled
    pub task_horizon_secs: u64,
    /// Maximum size of a single persisted snapshot chunk
    pub chunk_size_bytes: usize,
    /// Attempts per snapshot load/save before giving up
    pub storage_retry_attempts: u32,
    /// Linear backoff step between storage attempts
    pub storage_retry_backoff_ms: u64,
    /// Ceiling for description attempts per node
    pub description_retry_limit: u32,
    /// External generation providers
    pub providers: Vec<ProviderConfig>,
}

/// One external provider reachable over HTTP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub mode: CompletionMode,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub task_types: Vec<TaskType>,
    /// Per-request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 3000,
            database_url: "sqlite://canvas-collab.db?mode=rwc".to_string(),
            snapshot_interval_secs: 300,
            poll_interval_ms: 5_000,
            initial_poll_delay_ms: 10_000,
            retry_base_delay_ms: 2_000,
            max_retries: 3,
            task_horizon_secs: 24 * 60 * 60,
            chunk_size_bytes: 512 * 1024,
            storage_retry_attempts: 3,
            storage_retry_backoff_ms: 100,
            description_retry_limit: 3,
            providers: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Create a new AppConfigBuilder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Load configuration from the environment (and `.env`, if present)
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse TOML config text; missing keys take their defaults
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply environment overrides using `lookup` as the variable source
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(addr) = lookup("BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(port) = lookup("SERVER_PORT") {
            self.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                field: "SERVER_PORT",
                message: format!("'{}' is not a port number", port),
            })?;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "chunk_size_bytes",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.storage_retry_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "storage_retry_attempts",
                message: "must be at least one".to_string(),
            });
        }
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_retries",
                message: "must be at least one".to_string(),
            });
        }
        for provider in &self.providers {
            if provider.task_types.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "providers",
                    message: format!("provider '{}' handles no task types", provider.name),
                });
            }
            if provider.base_url.is_empty() {
                return Err(ConfigError::MissingValue("providers.base_url"));
            }
        }
        Ok(())
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn initial_poll_delay(&self) -> Duration {
        Duration::from_millis(self.initial_poll_delay_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn task_horizon(&self) -> Duration {
        Duration::from_secs(self.task_horizon_secs)
    }

    pub fn storage_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.storage_retry_backoff_ms)
    }
}

/// Builder for AppConfig
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = url.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn snapshot_interval(mut self, interval: Duration) -> Self {
        self.config.snapshot_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn initial_poll_delay(mut self, delay: Duration) -> Self {
        self.config.initial_poll_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn chunk_size_bytes(mut self, size: usize) -> Self {
        self.config.chunk_size_bytes = size;
        self
    }

    pub fn storage_retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.storage_retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn description_retry_limit(mut self, limit: u32) -> Self {
        self.config.description_retry_limit = limit;
        self
    }

    pub fn provider(mut self, provider: ProviderConfig) -> Self {
        self.config.providers.push(provider);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
    #[error("missing value: {0}")]
    MissingValue(&'static str),
}
