//! Configuration management for campus-sync
//!
//! This module handles loading, parsing, and validating the sync agent's
//! configuration from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Durable store configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Campus API configuration
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Flush loop configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Reachability monitoring configuration
    #[serde(default)]
    pub reachability: ReachabilitySettings,

    /// Read-side snapshot refresh configuration
    #[serde(default)]
    pub snapshots: SnapshotConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // First, expand environment variables in the YAML string
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix CAMPUS_SYNC_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(path) = std::env::var("CAMPUS_SYNC_DATABASE_PATH") {
            config.database.path = path;
        }

        if let Ok(base_url) = std::env::var("CAMPUS_SYNC_REMOTE_BASE_URL") {
            config.remote.base_url = base_url;
        }
        if let Ok(timeout) = std::env::var("CAMPUS_SYNC_REMOTE_REQUEST_TIMEOUT_SECS") {
            config.remote.request_timeout_secs = timeout
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid request timeout".to_string()))?;
        }

        if let Ok(interval) = std::env::var("CAMPUS_SYNC_FLUSH_INTERVAL_SECS") {
            config.sync.flush_interval_secs = interval
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid flush interval".to_string()))?;
        }
        if let Ok(max_retries) = std::env::var("CAMPUS_SYNC_MAX_RETRIES") {
            config.sync.max_retries = max_retries
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid retry cap".to_string()))?;
        }

        if let Ok(level) = std::env::var("CAMPUS_SYNC_LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }
}

/// Durable store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "campus-sync.db".to_string()
}

/// Campus API configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    /// Base URL of the campus API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// Flush loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Periodic flush interval in seconds
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Jitter added to periodic flushes in seconds
    #[serde(default = "default_jitter")]
    pub jitter_secs: u64,

    /// Per-action remote call timeout in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Transient-failure cap before an action is marked failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval(),
            jitter_secs: default_jitter(),
            call_timeout_secs: default_call_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_flush_interval() -> u64 {
    120
}

fn default_jitter() -> u64 {
    10
}

fn default_call_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

/// Reachability monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReachabilitySettings {
    /// How long a new state must hold before it is reported (milliseconds)
    #[serde(default = "default_settle_window")]
    pub settle_window_ms: u64,

    /// URL probed to detect connectivity; defaults to the API base URL
    pub probe_url: Option<String>,

    /// Probe interval in seconds
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
}

impl Default for ReachabilitySettings {
    fn default() -> Self {
        Self {
            settle_window_ms: default_settle_window(),
            probe_url: None,
            probe_interval_secs: default_probe_interval(),
        }
    }
}

fn default_settle_window() -> u64 {
    2000
}

fn default_probe_interval() -> u64 {
    15
}

/// Read-side snapshot refresh configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotConfig {
    /// Refresh interval in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    900
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
