//! Configuration module for deltamirror.
//!
//! Typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for deltamirror.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub retry: RetryConfig,
    pub remote: RemoteConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Sync worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum concurrent content pipeline calls per run.
    pub max_concurrency: usize,
    /// Seconds each remote or pipeline call may take before the item fails.
    pub item_timeout_secs: u64,
    /// Maximum number of entries kept in a record's failed item list.
    pub failed_items_cap: usize,
    /// A `syncing` record untouched for this many seconds counts as interrupted.
    pub stale_run_after_secs: u64,
    /// Capacity of the push notification channel.
    pub event_buffer: usize,
    /// How often a run re-reads its record while it waits on a retry backoff.
    pub cancel_poll_interval_ms: u64,
}

/// Backoff settings for transient remote failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each further attempt.
    pub base_delay_ms: u64,
}

/// Remote source (Microsoft Graph) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Graph API base URL.
    pub base_url: String,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
}

/// Sync record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite database holding sync records.
    pub database_path: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/deltamirror/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("deltamirror")
            .join("config.yaml")
    }
}

impl SyncConfig {
    /// Per-call timeout as a [`Duration`].
    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    /// Staleness threshold for interrupted-run recovery.
    pub fn stale_run_after(&self) -> Duration {
        Duration::from_secs(self.stale_run_after_secs)
    }

    /// Cancellation polling period as a [`Duration`].
    pub fn cancel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_interval_ms)
    }
}

impl RetryConfig {
    /// Delay before the first retry as a [`Duration`].
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl RemoteConfig {
    /// Per-request HTTP timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            item_timeout_secs: 120,
            failed_items_cap: crate::domain::DEFAULT_FAILED_ITEMS_CAP,
            stale_run_after_secs: 3600,
            event_buffer: 256,
            cancel_poll_interval_ms: 1000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.microsoft.com/v1.0".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("deltamirror");
        Self {
            database_path: data_dir.join("state.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.max_concurrency"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for `sync.max_concurrency`.
const MAX_CONCURRENCY: usize = 64;

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.max_concurrency == 0 || self.sync.max_concurrency > MAX_CONCURRENCY {
            errors.push(ValidationError::new(
                "sync.max_concurrency",
                format!("must be between 1 and {MAX_CONCURRENCY}"),
            ));
        }
        if self.sync.item_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "sync.item_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.sync.failed_items_cap == 0 {
            errors.push(ValidationError::new(
                "sync.failed_items_cap",
                "must be greater than 0",
            ));
        }
        if self.sync.stale_run_after_secs < self.sync.item_timeout_secs {
            errors.push(ValidationError::new(
                "sync.stale_run_after_secs",
                "must not be shorter than sync.item_timeout_secs",
            ));
        }
        if self.sync.cancel_poll_interval_ms == 0 {
            errors.push(ValidationError::new(
                "sync.cancel_poll_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.sync.event_buffer == 0 {
            errors.push(ValidationError::new(
                "sync.event_buffer",
                "must be greater than 0",
            ));
        }

        // --- retry ---
        if self.retry.max_retries > 10 {
            errors.push(ValidationError::new("retry.max_retries", "must be at most 10"));
        }
        if self.retry.max_retries > 0 && self.retry.base_delay_ms == 0 {
            errors.push(ValidationError::new(
                "retry.base_delay_ms",
                "must be greater than 0 when retries are enabled",
            ));
        }

        // --- remote ---
        if !(self.remote.base_url.starts_with("https://")
            || self.remote.base_url.starts_with("http://"))
        {
            errors.push(ValidationError::new(
                "remote.base_url",
                format!("must be an http(s) URL: {}", self.remote.base_url),
            ));
        }
        if self.remote.request_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "remote.request_timeout_secs",
                "must be greater than 0",
            ));
        }

        // --- store ---
        if self.store.database_path.as_os_str().is_empty() {
            errors.push(ValidationError::new("store.database_path", "must not be empty"));
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError::new(
                "logging.level",
                format!(
                    "invalid level '{}', expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            ));
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Config`], starting from defaults.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from [`Config::default`].
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.sync.max_concurrency = n;
        self
    }

    pub fn item_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.sync.item_timeout_secs = seconds;
        self
    }

    pub fn failed_items_cap(mut self, cap: usize) -> Self {
        self.config.sync.failed_items_cap = cap;
        self
    }

    pub fn stale_run_after_secs(mut self, seconds: u64) -> Self {
        self.config.sync.stale_run_after_secs = seconds;
        self
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.config.sync.event_buffer = capacity;
        self
    }

    pub fn cancel_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.sync.cancel_poll_interval_ms = ms;
        self
    }

    // --- retry ---

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    pub fn retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry.base_delay_ms = ms;
        self
    }

    // --- remote ---

    pub fn remote_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.base_url = url.into();
        self
    }

    pub fn remote_request_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.remote.request_timeout_secs = seconds;
        self
    }

    // --- store ---

    pub fn database_path(mut self, path: PathBuf) -> Self {
        self.config.store.database_path = path;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
