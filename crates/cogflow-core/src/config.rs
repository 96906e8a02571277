//! Engine configuration.
//!
//! Settings are read from TOML files and the environment, with later
//! sources overriding earlier ones:
//! 1. Global config (`~/.cogflow/config.toml`)
//! 2. Local config (`./.cogflowrc`)
//! 3. `COGFLOW_*` environment variables
//!
//! Callers holding an explicit file merge it last.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable overriding `max_concurrent_async`.
pub const ENV_MAX_CONCURRENT_ASYNC: &str = "COGFLOW_MAX_CONCURRENT_ASYNC";
/// Environment variable overriding `default_max_iterations`.
pub const ENV_DEFAULT_MAX_ITERATIONS: &str = "COGFLOW_DEFAULT_MAX_ITERATIONS";
/// Environment variable overriding `log_level`.
pub const ENV_LOG_LEVEL: &str = "COGFLOW_LOG_LEVEL";

/// Engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cap on background steps executing at once. Unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_async: Option<usize>,

    /// Iteration limit for repeats that do not set their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_max_iterations: Option<usize>,

    /// Log level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::ReadError(format!("Failed to create directory: {}", e)))?;
        }

        std::fs::write(path, content)
            .map_err(|e| ConfigError::ReadError(format!("Failed to write file: {}", e)))
    }

    /// Get default global configuration file path.
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".cogflow")
            .join("config.toml")
    }

    /// Get default local configuration file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".cogflowrc")
    }

    /// Discover and load configuration files, then apply the environment.
    ///
    /// Unreadable or missing files are ignored. Malformed environment
    /// values are reported.
    pub fn discover_and_load() -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Ok(global) = Self::load_from_file(&Self::default_global_path()) {
            config.merge(&global);
        }

        // Local config overrides global
        if let Ok(local) = Self::load_from_file(&Self::default_local_path()) {
            config.merge(&local);
        }

        config.apply_env()?;
        Ok(config)
    }

    /// Merge another configuration into this one.
    ///
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &Self) {
        if let Some(limit) = other.max_concurrent_async {
            self.max_concurrent_async = Some(limit);
        }
        if let Some(max) = other.default_max_iterations {
            self.default_max_iterations = Some(max);
        }
        if let Some(ref level) = other.log_level {
            self.log_level = Some(level.clone());
        }
    }

    /// Override values from `COGFLOW_*` environment variables.
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Override values using `lookup` in place of the process environment.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_CONCURRENT_ASYNC) {
            self.max_concurrent_async = Some(parse_count(ENV_MAX_CONCURRENT_ASYNC, &raw)?);
        }
        if let Some(raw) = lookup(ENV_DEFAULT_MAX_ITERATIONS) {
            self.default_max_iterations = Some(parse_count(ENV_DEFAULT_MAX_ITERATIONS, &raw)?);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = Some(level);
        }
        self.validate()
    }

    /// Check value ranges.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent_async == Some(0) {
            return Err(ConfigError::InvalidValue(
                "max_concurrent_async must be at least 1".to_string(),
            ));
        }
        if self.default_max_iterations == Some(0) {
            return Err(ConfigError::InvalidValue(
                "default_max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_count(key: &str, raw: &str) -> ConfigResult<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidValue(format!("{}={:?}: {}", key, raw, e)))
}
