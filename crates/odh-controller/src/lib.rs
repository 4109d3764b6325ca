//! Reconciliation pipeline for ODH platform components
//!
//! A controller is a [`BaseReconciler`] holding an ordered chain of
//! [`Action`]s. Each reconcile threads one [`ReconciliationRequest`]
//! through the chain: render manifests, customize them, deploy with
//! server-side apply, report status and garbage-collect what is no longer
//! rendered.

#![deny(missing_docs)]

/// The action trait and closure adapter
pub mod action;
/// Built-in pipeline actions
pub mod actions;
/// Render caching
pub mod cacher;
/// Cluster access
pub mod client;
/// Status condition bookkeeping
pub mod conditions;
/// Reconcile error taxonomy
pub mod error;
/// Typed platform objects
pub mod object;
/// The generic reconcile loop
pub mod reconciler;
/// Per-cycle request state
pub mod request;
/// Shared-resource removal for disabled components
pub mod shared;
/// Conflict-tolerant status writes
pub mod status;
/// In-memory cluster client for tests
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use action::{action_fn, Action, Actions, FnAction};
pub use cacher::{default_cache_key, CacheKeyFn, Renderer, ResourceCacher};
pub use client::{ClusterClient, KubeClusterClient, ResourceRef};
pub use conditions::ConditionsManager;
pub use error::ReconcileError;
pub use object::{gvk_for, PlatformObject};
pub use reconciler::{BaseReconciler, ReconcilerBuilder};
pub use request::{HelmChartInfo, ManifestInfo, ReconciliationRequest, TemplateInfo};
pub use shared::{disable_component, DisableReport};
pub use status::report_condition;
