//! The contract every component implements

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use odh_common::crd::{Component, ConditionStatus, DataScienceCluster, ManagementState, Platform, Release};
use odh_controller::actions::DEFAULT_DEPLOY_CACHE_TTL;
use odh_controller::{BaseReconciler, ClusterClient, ReconcileError, ReconciliationRequest};
use odh_manifests::helm::DEFAULT_HELM_BINARY;

use crate::error::ComponentError;

/// Settings shared by every component controller
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Running platform release
    pub release: Release,
    /// Lifetime of deploy cache entries, `None` disables the deploy cache
    pub deploy_cache_ttl: Option<Duration>,
    /// Helm executable used by chart-based components
    pub helm_binary: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            release: Release::default(),
            deploy_cache_ttl: Some(DEFAULT_DEPLOY_CACHE_TTL),
            helm_binary: DEFAULT_HELM_BINARY.to_string(),
        }
    }
}

/// A platform component
///
/// Handlers are registered once at startup. The DataScienceCluster
/// controller uses them to create or remove each component's CR and to
/// fold the component's readiness back into its own status.
#[async_trait]
pub trait ComponentHandler: Send + Sync {
    /// Component name, as used in the DataScienceCluster spec
    fn name(&self) -> &str;

    /// One-time preparation of the shipped manifests for `platform`
    fn init(&self, platform: Platform) -> Result<(), ComponentError>;

    /// Management state requested by the DataScienceCluster
    fn management_state(&self, dsc: &DataScienceCluster) -> ManagementState {
        dsc.management_state(self.name())
    }

    /// The component CR the DataScienceCluster should own
    fn new_cr_object(&self, dsc: &DataScienceCluster) -> Result<Component, ComponentError>;

    /// Controller reconciling the component CR
    fn new_component_reconciler(
        &self,
        client: Arc<dyn ClusterClient>,
        config: &ControllerConfig,
    ) -> Result<BaseReconciler<Component>, ComponentError>;

    /// Fold the component's readiness into the DataScienceCluster request
    ///
    /// Returns the status of the component's Ready condition, `Unknown`
    /// when the component is not managed.
    async fn update_dsc_status(
        &self,
        rr: &mut ReconciliationRequest,
    ) -> Result<ConditionStatus, ReconcileError>;
}
