//! Logging configuration and setup
//!
//! This module provides logging initialization and structured logging utilities
//! for the workflow engine.

use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::models::{SessionStatus, Stage};
use crate::utils::errors::{FlowError, Result};
use crate::utils::helpers::truncate_text;

/// Initialize logging based on configuration.
///
/// The returned guard flushes the file writer when dropped; keep it alive
/// for the lifetime of the process.
pub fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.directory)
        .map_err(|e| FlowError::Config(format!("Cannot create log directory {}: {}", config.directory, e)))?;

    let file_appender = tracing_appender::rolling::daily(&config.directory, &config.file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(file_layer)
        .try_init()
        .map_err(|e| FlowError::Config(format!("Logging already initialized: {}", e)))?;

    info!("Logging initialized with level: {}", config.level);
    Ok(guard)
}

/// Log an applied stage transition
pub fn log_transition(session_id: &str, from: Stage, to: Stage, status: SessionStatus) {
    info!(
        session_id = session_id,
        from = %from,
        to = %to,
        status = %status,
        "Stage transition applied"
    );
}

/// Log a handler retry request
pub fn log_handler_retry(session_id: &str, stage: Stage, reason: &str) {
    warn!(
        session_id = session_id,
        stage = %stage,
        reason = %truncate_text(reason, 200),
        "Stage handler requested retry"
    );
}

/// Log store operations
pub fn log_store_operation(backend: &str, operation: &str, session_id: Option<&str>, duration_ms: u64, success: bool) {
    if success {
        debug!(
            backend = backend,
            operation = operation,
            session_id = session_id,
            duration_ms = duration_ms,
            "Store operation completed"
        );
    } else {
        error!(
            backend = backend,
            operation = operation,
            session_id = session_id,
            duration_ms = duration_ms,
            "Store operation failed"
        );
    }
}

/// Log retention cleanup results
pub fn log_cleanup(removed: usize, cache_evicted: usize) {
    if removed > 0 || cache_evicted > 0 {
        info!(removed = removed, cache_evicted = cache_evicted, "Retention cleanup finished");
    } else {
        debug!("Retention cleanup found nothing to remove");
    }
}
