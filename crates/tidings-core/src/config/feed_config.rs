use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::defaults;
use crate::error::{AppError, Result};

/// Feed configuration
///
/// Provides centralized configuration management with:
/// - Serde support for loading from JSON files
/// - Builder pattern for customization
/// - Sensible defaults for every missing field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FeedConfig {
    /// Live stream and reconnect settings
    pub stream: StreamConfig,

    /// REST history settings
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Connect the live stream at all
    pub enabled: bool,

    /// First reconnect delay (milliseconds)
    pub backoff_floor_ms: u64,

    /// Reconnect delay ceiling (milliseconds)
    pub backoff_ceiling_ms: u64,

    /// Capacity of the per-connection event channel
    pub event_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::DEFAULT_STREAM_ENABLED,
            backoff_floor_ms: defaults::DEFAULT_BACKOFF_FLOOR_MS,
            backoff_ceiling_ms: defaults::DEFAULT_BACKOFF_CEILING_MS,
            event_buffer: defaults::DEFAULT_EVENT_BUFFER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Messages per page
    pub page_limit: u32,

    /// Fetch what was missed while disconnected
    pub catch_up_on_reconnect: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            page_limit: defaults::DEFAULT_PAGE_LIMIT,
            catch_up_on_reconnect: defaults::DEFAULT_CATCH_UP_ON_RECONNECT,
        }
    }
}

impl FeedConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method for stream configuration
    pub fn with_stream_config(mut self, config: StreamConfig) -> Self {
        self.stream = config;
        self
    }

    /// Builder method for history configuration
    pub fn with_history_config(mut self, config: HistoryConfig) -> Self {
        self.history = config;
        self
    }

    /// Default config file location (`<config dir>/tidings/config.json`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| {
            dir.join(defaults::CONFIG_DIR_NAME)
                .join(defaults::CONFIG_FILE_NAME)
        })
    }

    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: FeedConfig = serde_json::from_str(&raw).map_err(|e| {
            AppError::ConfigError(format!("Failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default file if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Reject values the supervisor or the server cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.stream.backoff_floor_ms == 0 {
            return Err(AppError::ConfigError(
                "stream.backoff_floor_ms must be greater than zero".to_string(),
            ));
        }
        if self.stream.backoff_ceiling_ms < self.stream.backoff_floor_ms {
            return Err(AppError::ConfigError(format!(
                "stream.backoff_ceiling_ms ({}) is below backoff_floor_ms ({})",
                self.stream.backoff_ceiling_ms, self.stream.backoff_floor_ms
            )));
        }
        if self.stream.event_buffer == 0 {
            return Err(AppError::ConfigError(
                "stream.event_buffer must be greater than zero".to_string(),
            ));
        }
        if !(1..=defaults::MAX_PAGE_LIMIT).contains(&self.history.page_limit) {
            return Err(AppError::ConfigError(format!(
                "history.page_limit must be between 1 and {}",
                defaults::MAX_PAGE_LIMIT
            )));
        }
        Ok(())
    }
}
