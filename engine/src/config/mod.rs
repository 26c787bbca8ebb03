//! Configuration management
//!
//! This module handles loading, validation, and management of the Arbiter configuration.
//! Configuration is stored in TOML format at ~/.arbiter/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **database**: Store URL, history bounds and retention
//! - **retry**: Backoff policy for the judgment endpoint
//! - **judge**: HTTP judgment endpoint and decider toggle
//!
//! # Environment Overrides
//!
//! After the file is parsed, these variables take precedence:
//!
//! - `ARBITER_DB_URL` replaces `database.url`
//! - `ARBITER_MAX_CONTEXT_RECORDS` replaces `database.max_context_records`
//! - `ARBITER_LOG_LEVEL` replaces `core.log_level`
//!
//! # Examples
//!
//! ```no_run
//! use arbiter_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Store: {}", config.database.url);
//! println!("Max retries: {}", config.retry.max_retries);
//! # Ok(())
//! # }
//! ```

use sdk::errors::WorkflowError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::factory::StoreKind;

pub const ENV_DB_URL: &str = "ARBITER_DB_URL";
pub const ENV_MAX_CONTEXT_RECORDS: &str = "ARBITER_MAX_CONTEXT_RECORDS";
pub const ENV_LOG_LEVEL: &str = "ARBITER_LOG_LEVEL";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Core settings
    pub core: CoreConfig,

    /// Context store and history bounds
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Judgment retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Judgment endpoint
    #[serde(default)]
    pub judge: JudgeConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Context store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Connection string; empty means `arbiter.db` in the data directory
    #[serde(default)]
    pub url: String,

    /// Records kept per session before the oldest are evicted
    #[serde(default = "default_max_context_records")]
    pub max_context_records: usize,

    /// Estimated tokens kept per session before the oldest are evicted
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u64,

    /// Records handed to each judgment call as context
    #[serde(default = "default_context_enrichment_count")]
    pub context_enrichment_count: usize,

    /// Maximum record age in seconds
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Interval of the background retention sweep in seconds
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_context_records: default_max_context_records(),
            max_context_tokens: default_max_context_tokens(),
            context_enrichment_count: default_context_enrichment_count(),
            retention_secs: default_retention_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl DatabaseConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Retry configuration for rate-limited judgment calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Overall deadline for one invocation including backoff
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            deadline_secs: None,
        }
    }
}

/// Judgment endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeConfig {
    /// HTTP endpoint receiving judgment requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Name of the environment variable holding the bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_judge_timeout_secs")]
    pub timeout_secs: u64,

    /// Ask the endpoint to pick the next action
    #[serde(default)]
    pub use_decider: bool,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: None,
            timeout_secs: default_judge_timeout_secs(),
            use_decider: false,
        }
    }
}

impl JudgeConfig {
    /// Bearer token read from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty())
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.arbiter")
}

fn default_max_context_records() -> usize {
    20
}

fn default_max_context_tokens() -> u64 {
    25_000
}

fn default_context_enrichment_count() -> usize {
    10
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_cleanup_interval_secs() -> u64 {
    60 * 60
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    120_000
}

fn default_judge_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
                data_dir: default_data_dir(),
            },
            database: DatabaseConfig::default(),
            retry: RetryConfig::default(),
            judge: JudgeConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.arbiter/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, WorkflowError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Same as [`Config::load_or_create`] for an explicit path
    pub fn load_or_create_at(path: &Path) -> Result<Self, WorkflowError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, WorkflowError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| WorkflowError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_toml(&contents)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate_and_process()?;

        Ok(config)
    }

    /// Parse TOML without validation or environment overrides
    pub fn from_toml(contents: &str) -> Result<Self, WorkflowError> {
        toml::from_str(contents)
            .map_err(|e| WorkflowError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Create default configuration, save it to path and validate it
    pub fn create_default(path: &Path) -> Result<Self, WorkflowError> {
        let mut config = Self::write_default(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate_and_process()?;

        Ok(config)
    }

    /// Write the default configuration to path as-is
    pub fn write_default(path: &Path) -> Result<Self, WorkflowError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                WorkflowError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| WorkflowError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| WorkflowError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Connection string the CLI opens
    ///
    /// An empty `database.url` resolves to `arbiter.db` inside the data
    /// directory so state outlives a single invocation. `memory://` still
    /// selects the in-memory store.
    pub fn store_url(&self) -> String {
        if self.database.url.trim().is_empty() {
            format!(
                "sqlite://{}",
                self.core.data_dir.join("arbiter.db").display()
            )
        } else {
            self.database.url.clone()
        }
    }

    /// Get the default configuration file path (~/.arbiter/config.toml)
    pub fn default_config_path() -> Result<PathBuf, WorkflowError> {
        let home = dirs::home_dir().ok_or_else(|| {
            WorkflowError::Config("Could not determine home directory".to_string())
        })?;

        Ok(home.join(".arbiter").join("config.toml"))
    }

    /// Apply environment overrides through a lookup function
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), WorkflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DB_URL) {
            self.database.url = url;
        }

        if let Some(raw) = lookup(ENV_MAX_CONTEXT_RECORDS) {
            self.database.max_context_records = raw.trim().parse().map_err(|_| {
                WorkflowError::Config(format!(
                    "{} must be a positive integer, got '{}'",
                    ENV_MAX_CONTEXT_RECORDS, raw
                ))
            })?;
        }

        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.core.log_level = level.trim().to_lowercase();
        }

        Ok(())
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates log level, history bounds and retry delays
    /// - Checks the database URL scheme
    /// - Expands ~ in the data directory and creates it
    pub fn validate_and_process(&mut self) -> Result<(), WorkflowError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(WorkflowError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.database.max_context_records == 0 {
            return Err(WorkflowError::Config(
                "max_context_records must be at least 1".to_string(),
            ));
        }
        if self.database.max_context_tokens == 0 {
            return Err(WorkflowError::Config(
                "max_context_tokens must be at least 1".to_string(),
            ));
        }
        if self.database.context_enrichment_count == 0 {
            return Err(WorkflowError::Config(
                "context_enrichment_count must be at least 1".to_string(),
            ));
        }

        if self.retry.base_delay_ms == 0 {
            return Err(WorkflowError::Config(
                "base_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(WorkflowError::Config(format!(
                "max_delay_ms ({}) must not be below base_delay_ms ({})",
                self.retry.max_delay_ms, self.retry.base_delay_ms
            )));
        }

        StoreKind::parse(&self.database.url)?;

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                WorkflowError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
pub fn expand_path(path: &Path) -> Result<PathBuf, WorkflowError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| WorkflowError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| {
            WorkflowError::Config("Could not determine home directory".to_string())
        })?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| WorkflowError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
