//! Configuration module for mirrorfs.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.
//! Every mirrorfs process sharing a state database should load the same file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for mirrorfs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub locking: LockingConfig,
    pub logging: LoggingConfig,
}

/// State database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite file shared by all mirrorfs processes.
    pub path: PathBuf,
    /// Seconds a connection waits for another process's write transaction.
    pub busy_timeout_secs: u64,
}

/// How the wait between lock acquisition attempts evolves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Always wait `retry_interval_ms`.
    #[default]
    Fixed,
    /// Double the wait after every attempt, capped at `max_interval_ms`.
    Exponential,
}

/// Inode lock acquisition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    /// Retries after the first failed attempt. `0` means a single attempt.
    pub max_retries: u32,
    /// Wait before the first retry, in milliseconds.
    pub retry_interval_ms: u64,
    /// Backoff strategy between retries.
    pub backoff: BackoffStrategy,
    /// Upper bound for a single wait with exponential backoff, in milliseconds.
    pub max_interval_ms: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/mirrorfs/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("mirrorfs")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("mirrorfs")
                .join("state.db"),
            busy_timeout_secs: 5,
        }
    }
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_interval_ms: 1000,
            backoff: BackoffStrategy::Fixed,
            max_interval_ms: 30_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"locking.retry_interval_ms"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- store ---
        if self.store.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "store.path".into(),
                message: "must not be empty".into(),
            });
        }
        if self.store.busy_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "store.busy_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- locking ---
        if self.locking.retry_interval_ms == 0 {
            errors.push(ValidationError {
                field: "locking.retry_interval_ms".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.locking.backoff == BackoffStrategy::Exponential
            && self.locking.max_interval_ms < self.locking.retry_interval_ms
        {
            errors.push(ValidationError {
                field: "locking.max_interval_ms".into(),
                message: format!(
                    "max_interval_ms ({}) must not be below retry_interval_ms ({})",
                    self.locking.max_interval_ms, self.locking.retry_interval_ms
                ),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust
/// use mirrorfs_core::config::{BackoffStrategy, ConfigBuilder};
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .store_path(PathBuf::from("/var/lib/mirrorfs/state.db"))
///     .locking_max_retries(10)
///     .locking_backoff(BackoffStrategy::Exponential)
///     .build();
/// assert_eq!(config.locking.max_retries, 10);
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- store ---

    pub fn store_path(mut self, path: PathBuf) -> Self {
        self.config.store.path = path;
        self
    }

    pub fn store_busy_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.store.busy_timeout_secs = seconds;
        self
    }

    // --- locking ---

    pub fn locking_max_retries(mut self, retries: u32) -> Self {
        self.config.locking.max_retries = retries;
        self
    }

    pub fn locking_retry_interval_ms(mut self, ms: u64) -> Self {
        self.config.locking.retry_interval_ms = ms;
        self
    }

    pub fn locking_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.config.locking.backoff = backoff;
        self
    }

    pub fn locking_max_interval_ms(mut self, ms: u64) -> Self {
        self.config.locking.max_interval_ms = ms;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
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
