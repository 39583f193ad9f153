//! ProvisionFlow
//!
//! A stateful, resumable workflow engine for staged VM provisioning.
//! Sessions move through data collection, validation, configuration,
//! software provisioning and documentation; every transition is committed to
//! a durable store so work survives restarts.

#![allow(non_snake_case)]

pub mod config;
pub mod database;
pub mod handlers;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use utils::errors::{FlowError, HandlerError, PersistenceError, Result};

// Re-export main components for easy access
pub use handlers::{HandlerRegistry, StageHandler};
pub use models::{Session, SessionFilter, SessionStatus, SessionSummary, Stage};
pub use services::{AdvanceOutcome, SessionListing, SessionManager};
pub use state::{open_store, Capability, SessionStore, StageMachine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn info() -> String {
    format!("{} v{}", NAME, VERSION)
}
