//! State management module
//!
//! This module holds the stage machine, the session cache and the store
//! backends that persist session snapshots.

pub mod cache;
pub mod file_store;
pub mod machine;
pub mod storage;

// Re-export commonly used state components
pub use cache::{CacheStats, SessionCache};
pub use file_store::FileSessionStore;
pub use machine::{Capability, StageMachine, StageSpec};
pub use storage::{copy_sessions, open_store, SessionStore};
