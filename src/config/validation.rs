//! Configuration validation module
//!
//! This module provides validation functions for engine configuration
//! to ensure all required settings are properly configured.

use crate::utils::errors::{FlowError, Result};
use super::Settings;

/// Validate all configuration settings
pub fn validate_settings(settings: &Settings) -> Result<()> {
    validate_storage_config(&settings.storage)?;
    validate_cache_config(&settings.cache)?;
    validate_retention_config(&settings.retention)?;
    validate_logging_config(&settings.logging)?;

    Ok(())
}

/// Validate session store configuration
fn validate_storage_config(config: &super::StorageConfig) -> Result<()> {
    if config.path.trim().is_empty() {
        return Err(FlowError::Config(
            "Storage path is required".to_string()
        ));
    }

    if config.max_connections == 0 {
        return Err(FlowError::Config(
            "Max connections must be greater than 0".to_string()
        ));
    }

    Ok(())
}

/// Validate cache configuration
fn validate_cache_config(config: &super::CacheConfig) -> Result<()> {
    if config.capacity == 0 {
        return Err(FlowError::Config(
            "Cache capacity must be greater than 0".to_string()
        ));
    }

    Ok(())
}

/// Validate retention configuration
fn validate_retention_config(config: &super::RetentionConfig) -> Result<()> {
    if config.enabled && config.interval_seconds == 0 {
        return Err(FlowError::Config(
            "Retention interval must be greater than 0".to_string()
        ));
    }

    if config.enabled && config.max_age().is_none() {
        return Err(FlowError::Config(
            format!("Retention max age of {} hours is out of range", config.max_age_hours)
        ));
    }

    Ok(())
}

/// Validate logging configuration
fn validate_logging_config(config: &super::LoggingConfig) -> Result<()> {
    if config.level.is_empty() {
        return Err(FlowError::Config(
            "Log level is required".to_string()
        ));
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.level.as_str()) {
        return Err(FlowError::Config(
            format!("Invalid log level: {}. Valid levels: {:?}", config.level, valid_levels)
        ));
    }

    if config.directory.is_empty() {
        return Err(FlowError::Config(
            "Log directory is required".to_string()
        ));
    }

    Ok(())
}
