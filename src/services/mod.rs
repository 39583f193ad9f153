//! Services module
//!
//! This module contains the session manager and the background services
//! around it

pub mod gates;
pub mod manager;
pub mod retention;

// Re-export commonly used services
pub use gates::{GateHandle, SessionGate, SessionGates};
pub use manager::{AdvanceOutcome, SessionListing, SessionManager, SessionManagerBuilder};
pub use retention::RetentionWorker;
