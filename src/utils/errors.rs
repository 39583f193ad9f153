//! Error handling for ProvisionFlow
//!
//! This module defines the main error types used throughout the engine
//! and provides a unified error handling strategy.

use thiserror::Error;

use crate::models::{SessionStatus, Stage};

/// Main error type for ProvisionFlow operations
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Session {session_id} is {status} at stage {stage}; no further transitions allowed")]
    TerminalSession {
        session_id: String,
        stage: Stage,
        status: SessionStatus,
    },

    #[error("Session {session_id} is paused at stage {stage}")]
    SessionPaused { session_id: String, stage: Stage },

    #[error("Invalid stage {stage}: {reason}")]
    InvalidStage { stage: Stage, reason: String },

    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("Stage handler failed for session {session_id} at {stage}: {source}")]
    Handler {
        session_id: String,
        stage: Stage,
        #[source]
        source: HandlerError,
    },

    #[error("No stage handler registered for capability {capability}")]
    HandlerUnavailable { capability: String },

    #[error("Persistence error{}: {source}", scope(.session_id, .stage))]
    Persistence {
        session_id: Option<String>,
        stage: Option<Stage>,
        #[source]
        source: PersistenceError,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failures signalled by an external stage handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Recoverable: the stage stays put and may be retried with corrected input
    #[error("retry requested: {reason}")]
    Retry { reason: String },

    /// Unrecoverable: the session moves to `failed`
    #[error("fatal failure: {reason}")]
    Fatal { reason: String },
}

impl HandlerError {
    pub fn retry(reason: impl Into<String>) -> Self {
        HandlerError::Retry { reason: reason.into() }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        HandlerError::Fatal { reason: reason.into() }
    }

    pub fn reason(&self) -> &str {
        match self {
            HandlerError::Retry { reason } | HandlerError::Fatal { reason } => reason,
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, HandlerError::Retry { .. })
    }
}

/// Store backend failures
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),
}

/// Result type alias for ProvisionFlow operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Result type alias for store backends
pub type StoreResult<T> = std::result::Result<T, PersistenceError>;

fn scope(session_id: &Option<String>, stage: &Option<Stage>) -> String {
    match (session_id, stage) {
        (Some(id), Some(stage)) => format!(" for session {} at {}", id, stage),
        (Some(id), None) => format!(" for session {}", id),
        (None, Some(stage)) => format!(" at {}", stage),
        (None, None) => String::new(),
    }
}

impl From<PersistenceError> for FlowError {
    fn from(source: PersistenceError) -> Self {
        FlowError::Persistence {
            session_id: None,
            stage: None,
            source,
        }
    }
}

impl From<sqlx::Error> for FlowError {
    fn from(e: sqlx::Error) -> Self {
        PersistenceError::Database(e).into()
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Serialization(e).into()
    }
}

impl From<config::ConfigError> for FlowError {
    fn from(e: config::ConfigError) -> Self {
        FlowError::Config(e.to_string())
    }
}

impl FlowError {
    /// Store failure while working on `session_id`
    pub fn persistence(session_id: &str, stage: Option<Stage>, source: PersistenceError) -> Self {
        FlowError::Persistence {
            session_id: Some(session_id.to_string()),
            stage,
            source,
        }
    }

    /// Session id the error refers to, when there is one
    pub fn session_id(&self) -> Option<&str> {
        match self {
            FlowError::SessionNotFound { session_id }
            | FlowError::TerminalSession { session_id, .. }
            | FlowError::SessionPaused { session_id, .. }
            | FlowError::Handler { session_id, .. } => Some(session_id),
            FlowError::Persistence { session_id, .. } => session_id.as_deref(),
            _ => None,
        }
    }

    /// Stage at the time of failure, when known
    pub fn stage(&self) -> Option<Stage> {
        match self {
            FlowError::TerminalSession { stage, .. }
            | FlowError::SessionPaused { stage, .. }
            | FlowError::InvalidStage { stage, .. }
            | FlowError::Handler { stage, .. } => Some(*stage),
            FlowError::InvalidTransition { from, .. } => Some(*from),
            FlowError::Persistence { stage, .. } => *stage,
            _ => None,
        }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            FlowError::SessionNotFound { .. } => false,
            FlowError::TerminalSession { .. } => false,
            FlowError::SessionPaused { .. } => true,
            FlowError::InvalidStage { .. } => false,
            FlowError::InvalidTransition { .. } => false,
            FlowError::Handler { source, .. } => source.is_retry(),
            FlowError::HandlerUnavailable { .. } => false,
            FlowError::Persistence { source: PersistenceError::Corrupt(_), .. } => false,
            FlowError::Persistence { .. } => true,
            FlowError::Config(_) => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            FlowError::Persistence { .. } => ErrorSeverity::Critical,
            FlowError::Config(_) => ErrorSeverity::Critical,
            FlowError::HandlerUnavailable { .. } => ErrorSeverity::Critical,
            FlowError::SessionPaused { .. } => ErrorSeverity::Info,
            FlowError::TerminalSession { .. } => ErrorSeverity::Warning,
            FlowError::SessionNotFound { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSeverity::Info => write!(f, "INFO"),
            ErrorSeverity::Warning => write!(f, "WARN"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}
