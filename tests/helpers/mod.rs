//! Test helpers module
//!
//! This module provides utilities and helpers for testing ProvisionFlow:
//! temp-dir backed managers on either store backend and scripted stage
//! handlers whose outcomes the test controls.

pub mod failing_store;

pub use failing_store::*;
pub use scripted_handler::*;
pub use test_context::*;
pub use test_data::*;
