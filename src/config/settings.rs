//! Application settings management
//!
//! This module defines the configuration structure and provides methods
//! for loading settings from TOML files and environment variables.

use serde::{Deserialize, Serialize};

/// Main application configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
}

/// Which persistence strategy backs the session store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One JSON document per session in a directory
    File,
    /// Single SQLite database file
    Sqlite,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::File => write!(f, "file"),
            StoreBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Session store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub backend: StoreBackend,
    /// Directory for the file backend; database file (or directory holding
    /// `sessions.db`) for the SQLite backend
    pub path: String,
    pub max_connections: u32,
}

/// Session cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    pub capacity: usize,
}

/// Retention cleanup configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub max_age_hours: u64,
    pub interval_seconds: u64,
}

impl RetentionConfig {
    /// Maximum session age, or `None` when the hour count does not fit a duration
    pub fn max_age(&self) -> Option<chrono::Duration> {
        i64::try_from(self.max_age_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: String,
    pub file_prefix: String,
    pub json: bool,
}

impl Settings {
    /// Load settings from configuration file and environment variables
    pub fn new() -> Result<Self, config::ConfigError> {
        let defaults = config::Config::try_from(&Settings::default())?;

        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("PROVISIONFLOW")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), crate::utils::errors::FlowError> {
        super::validation::validate_settings(self)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                backend: StoreBackend::File,
                path: "./data/sessions".to_string(),
                max_connections: 5,
            },
            cache: CacheConfig { capacity: 100 },
            retention: RetentionConfig {
                enabled: true,
                max_age_hours: 24,
                interval_seconds: 3600,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                directory: "./logs".to_string(),
                file_prefix: "provisionflow.log".to_string(),
                json: false,
            },
        }
    }
}
