//! Errors raised while registering and initializing components

use odh_manifests::ManifestError;
use thiserror::Error;

/// Component registry and handler errors
#[derive(Debug, Error)]
pub enum ComponentError {
    /// Two handlers registered under one name
    #[error("component {name} is already registered")]
    Duplicate {
        /// Component name
        name: String,
    },

    /// Preparing the component's manifests failed
    #[error("initializing component {name}: {source}")]
    Init {
        /// Component name
        name: String,
        /// Underlying manifest error
        #[source]
        source: ManifestError,
    },

    /// Building a component object failed
    #[error(transparent)]
    Common(#[from] odh_common::Error),
}

impl ComponentError {
    /// Create an init error for `name`
    pub fn init(name: impl Into<String>, source: ManifestError) -> Self {
        Self::Init {
            name: name.into(),
            source,
        }
    }
}
