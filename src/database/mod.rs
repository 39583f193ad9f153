//! Database module
//!
//! This module handles the SQLite connection pool and the session repository

pub mod connection;
pub mod repositories;

// Re-export commonly used database components
pub use connection::{create_pool, health_check, init_schema, DatabaseConfig, DatabasePool};
pub use repositories::SessionRepository;
