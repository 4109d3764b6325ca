//! The set of components the operator manages

use std::sync::Arc;

use tracing::{error, info};

use odh_common::crd::Platform;

use crate::error::ComponentError;
use crate::handler::ComponentHandler;

/// Component handlers in registration order
#[derive(Default)]
pub struct ComponentRegistry {
    handlers: Vec<Arc<dyn ComponentHandler>>,
}

impl ComponentRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler; names must be unique
    pub fn register(&mut self, handler: impl ComponentHandler + 'static) -> Result<(), ComponentError> {
        if self.get(handler.name()).is_some() {
            return Err(ComponentError::Duplicate {
                name: handler.name().to_string(),
            });
        }
        self.handlers.push(Arc::new(handler));
        Ok(())
    }

    /// Look up a handler by component name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ComponentHandler>> {
        self.handlers.iter().find(|h| h.name() == name)
    }

    /// Every handler in registration order
    pub fn handlers(&self) -> impl Iterator<Item = &Arc<dyn ComponentHandler>> {
        self.handlers.iter()
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Initialize every component for `platform`
    ///
    /// Every handler runs even when an earlier one fails; the first failure
    /// is returned.
    pub fn init_all(&self, platform: Platform) -> Result<(), ComponentError> {
        let mut first_error = None;
        for handler in &self.handlers {
            match handler.init(platform) {
                Ok(()) => info!(component = %handler.name(), platform = %platform, "component initialized"),
                Err(e) => {
                    error!(component = %handler.name(), error = %e, "component initialization failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
