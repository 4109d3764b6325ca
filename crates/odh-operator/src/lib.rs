//! Open Data Hub platform operator
//!
//! Wires the shipped components into controllers: one per component plus
//! the DataScienceCluster controller that enables them.

#![deny(missing_docs)]

/// The shipped component catalog
pub mod components;
/// Controller construction
pub mod controller_runner;
/// CRD installation and export
pub mod crds;
/// Startup steps run before the controllers
pub mod startup;
