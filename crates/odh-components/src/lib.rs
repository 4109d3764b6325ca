//! Platform components and the DataScienceCluster that enables them
//!
//! Each component is a [`ComponentHandler`] registered once in a
//! [`ComponentRegistry`]. The operator builds one component controller per
//! handler plus the DataScienceCluster controller, which creates the
//! component CRs and aggregates their readiness.

#![deny(missing_docs)]

/// DataScienceCluster fan-out controller
pub mod dsc;
/// Component errors
pub mod error;
/// The component contract
pub mod handler;
/// Kustomize-backed component handler
pub mod manifest;
/// Registered components
pub mod registry;

pub use dsc::{new_dsc_reconciler, ProvisionComponentsAction, UpdateComponentsStatusAction, DSC_CONTROLLER};
pub use error::ComponentError;
pub use handler::{ComponentHandler, ControllerConfig};
pub use manifest::{ManifestComponent, ManifestRoot};
pub use registry::ComponentRegistry;
