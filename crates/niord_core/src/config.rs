//! Runtime configuration loaded from TOML.
//!
//! # Responsibility
//! - Describe database, index, logging and scheduler settings.
//! - Supply defaults for every field so an empty file is a valid config.
//!
//! # Invariants
//! - A config returned by [`NiordConfig::from_toml`] or
//!   [`NiordConfig::from_file`] has passed [`NiordConfig::validate`].

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration loading and validation failures.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "cannot read config: {err}"),
            Self::Parse(err) => write!(f, "invalid config TOML: {err}"),
            Self::Serialize(err) => write!(f, "cannot serialize config: {err}"),
            Self::Validation(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Serialize(err) => Some(err),
            Self::Validation(_) => None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NiordConfig {
    /// Message store database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Search index database file. The index is kept in memory when unset.
    #[serde(default)]
    pub index_path: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub index: IndexSettings,

    #[serde(default)]
    pub schedule: ScheduleSettings,
}

impl Default for NiordConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            index_path: None,
            logging: LoggingSettings::default(),
            index: IndexSettings::default(),
            schedule: ScheduleSettings::default(),
        }
    }
}

impl NiordConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "database_path cannot be empty".to_string(),
            ));
        }
        self.index.validate()?;
        self.schedule.validate()
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Absolute directory for rolling log files; stderr when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

/// Message index settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexSettings {
    /// Seconds between incremental index updates.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum messages indexed per update.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Updates between two index merges.
    #[serde(default = "default_optimize_after_updates")]
    pub optimize_after_updates: u32,

    /// Languages a document is indexed for.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    /// Hit limit applied when a query does not specify one.
    #[serde(default = "default_max_hits")]
    pub max_hits: u32,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            optimize_after_updates: default_optimize_after_updates(),
            languages: default_languages(),
            max_hits: default_max_hits(),
        }
    }
}

impl IndexSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "index.poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "index.batch_size must be positive".to_string(),
            ));
        }
        if self.optimize_after_updates == 0 {
            return Err(ConfigError::Validation(
                "index.optimize_after_updates must be positive".to_string(),
            ));
        }
        if self.max_hits == 0 {
            return Err(ConfigError::Validation(
                "index.max_hits must be positive".to_string(),
            ));
        }
        if self.languages.is_empty() {
            return Err(ConfigError::Validation(
                "index.languages cannot be empty".to_string(),
            ));
        }
        if let Some(blank) = self.languages.iter().find(|lang| lang.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "index.languages contains a blank entry `{blank}`"
            )));
        }
        Ok(())
    }
}

/// Scheduled status transition settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleSettings {
    /// Seconds between two expiry/publication checks.
    #[serde(default = "default_schedule_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_schedule_interval_secs(),
        }
    }
}

impl ScheduleSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "schedule.interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("niord.db")
}

fn default_log_level() -> String {
    crate::logging::default_log_level().to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_batch_size() -> u32 {
    100
}

fn default_optimize_after_updates() -> u32 {
    100
}

fn default_languages() -> Vec<String> {
    vec!["en".to_string()]
}

fn default_max_hits() -> u32 {
    100
}

fn default_schedule_interval_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = NiordConfig::from_toml("").unwrap();
        assert_eq!(config.index.batch_size, 100);
        assert_eq!(config.index.languages, vec!["en".to_string()]);
        assert_eq!(config.schedule.interval(), Duration::from_secs(60));
        assert!(config.index_path.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = NiordConfig::from_toml("[index]\nbatch = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
