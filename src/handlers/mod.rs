//! Stage handlers module
//!
//! This module contains the stage handler contract, the capability registry
//! the session manager dispatches through, and the built-in handlers:
//! - Data collection, validation and configuration of the VM request
//! - Software provisioning plan and documentation output

pub mod builtin;
pub mod registry;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{Context, Stage, StageOutput};
use crate::state::Capability;
use crate::utils::errors::HandlerError;

// Re-export commonly used handler components
pub use builtin::{
    ConfigurationHandler, DataCollectionHandler, DocumentationHandler, SoftwareProvisioningHandler,
    ValidationHandler,
};
pub use registry::HandlerRegistry;

/// External worker that performs the body of one stage.
///
/// Handlers receive a read-only view of the accumulated context and the
/// caller's input, and return the keys they want merged into the context.
/// A `Retry` leaves the session where it is; a `Fatal` fails it.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Capability this handler provides
    fn capability(&self) -> Capability;

    async fn handle(
        &self,
        stage: Stage,
        context: &Context,
        input: &Value,
    ) -> std::result::Result<StageOutput, HandlerError>;
}
