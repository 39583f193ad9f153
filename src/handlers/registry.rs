//! Capability to handler mapping

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::builtin::{
    ConfigurationHandler, DataCollectionHandler, DocumentationHandler, SoftwareProvisioningHandler,
    ValidationHandler,
};
use super::StageHandler;
use crate::state::Capability;
use crate::utils::errors::{FlowError, Result};

/// Handlers keyed by the capability they provide
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Capability, Arc<dyn StageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated with every built-in handler
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(DataCollectionHandler::new()));
        registry.register(Arc::new(ValidationHandler::new()?));
        registry.register(Arc::new(ConfigurationHandler::new()));
        registry.register(Arc::new(SoftwareProvisioningHandler::new()));
        registry.register(Arc::new(DocumentationHandler::new()));
        Ok(registry)
    }

    /// Register a handler under its own capability, replacing any previous one
    pub fn register(&mut self, handler: Arc<dyn StageHandler>) -> &mut Self {
        let capability = handler.capability();
        if self.handlers.insert(capability, handler).is_some() {
            debug!(capability = %capability, "Replaced stage handler");
        }
        self
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, handler: Arc<dyn StageHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, capability: Capability) -> Result<Arc<dyn StageHandler>> {
        self.handlers
            .get(&capability)
            .cloned()
            .ok_or_else(|| FlowError::HandlerUnavailable {
                capability: capability.to_string(),
            })
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.handlers.contains_key(&capability)
    }

    /// Capabilities with no registered handler, in workflow order
    pub fn missing(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|capability| !self.handlers.contains_key(capability))
            .collect()
    }

    /// Error for the first missing capability, if any
    pub fn ensure_complete(&self) -> Result<()> {
        match self.missing().first() {
            Some(capability) => Err(FlowError::HandlerUnavailable {
                capability: capability.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut capabilities: Vec<_> = self.handlers.keys().map(|c| c.as_str()).collect();
        capabilities.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("capabilities", &capabilities)
            .finish()
    }
}
