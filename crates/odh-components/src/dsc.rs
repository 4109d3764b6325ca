//! DataScienceCluster fan-out
//!
//! The DataScienceCluster controller owns one component CR per managed
//! component. It creates or removes those CRs according to each
//! component's management state and folds their readiness back into a
//! `<Kind>Ready` condition on itself.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use odh_common::crd::{Component, DataScienceCluster, ManagementState};
use odh_common::resources::to_dynamic;
use odh_controller::{
    disable_component, gvk_for, Action, BaseReconciler, ClusterClient, ReconcileError,
    ReconciliationRequest, ResourceRef,
};

use crate::error::ComponentError;
use crate::handler::ControllerConfig;
use crate::registry::ComponentRegistry;

/// Name of the DataScienceCluster controller and its field manager
pub const DSC_CONTROLLER: &str = "datasciencecluster";

fn loaded_dsc(rr: &ReconciliationRequest) -> Result<DataScienceCluster, ReconcileError> {
    rr.dsc
        .clone()
        .ok_or_else(|| ReconcileError::fatal("DataScienceCluster not loaded"))
}

/// Creates, updates or removes the component CRs
///
/// Every component is visited even when one fails; the first failure is
/// returned once all have been processed.
pub struct ProvisionComponentsAction {
    registry: Arc<ComponentRegistry>,
}

impl ProvisionComponentsAction {
    /// Provision the components of `registry`
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Action for ProvisionComponentsAction {
    fn name(&self) -> &str {
        "provision-components"
    }

    async fn execute(&self, rr: &mut ReconciliationRequest) -> Result<(), ReconcileError> {
        let dsc = loaded_dsc(rr)?;
        let enabled = dsc.enabled_components();
        let mut first_error = None;

        for handler in self.registry.handlers() {
            let state = handler.management_state(&dsc);
            let result = match state {
                ManagementState::Managed => provision(rr, handler.new_cr_object(&dsc)).await,
                ManagementState::Removed => {
                    remove(rr, handler.new_cr_object(&dsc), handler.name(), &enabled).await
                }
                ManagementState::Unmanaged => Ok(()),
            };
            if let Err(e) = result {
                warn!(component = %handler.name(), state = %state, error = %e, "component provisioning failed");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

async fn provision(
    rr: &ReconciliationRequest,
    cr: Result<Component, ComponentError>,
) -> Result<(), ReconcileError> {
    let cr = cr.map_err(|e| ReconcileError::fatal(e.to_string()))?;
    let mut obj = to_dynamic(&cr)?;
    obj.metadata.owner_references = Some(vec![rr.owner_reference()?]);
    rr.client.apply(&obj, DSC_CONTROLLER, true).await?;
    Ok(())
}

async fn remove(
    rr: &ReconciliationRequest,
    cr: Result<Component, ComponentError>,
    component: &str,
    enabled: &[String],
) -> Result<(), ReconcileError> {
    let cr = cr.map_err(|e| ReconcileError::fatal(e.to_string()))?;

    // Labelled resources go first and on every cycle, so a cleanup that
    // failed halfway resumes even after the CR itself is gone.
    let report = disable_component(rr.client.as_ref(), component, enabled).await?;

    let name = cr.metadata.name.clone().unwrap_or_default();
    let resource = ResourceRef::cluster(gvk_for::<Component>(), name);
    let removed_cr = rr.client.get(&resource).await?.is_some();
    if removed_cr {
        rr.client.delete(&resource).await?;
    }

    if removed_cr || report.deleted > 0 || report.unshared > 0 {
        info!(
            component,
            removed_cr,
            deleted = report.deleted,
            unshared = report.unshared,
            skipped = report.skipped,
            "component removed"
        );
    }
    Ok(())
}

/// Folds every component's readiness into the DataScienceCluster status
pub struct UpdateComponentsStatusAction {
    registry: Arc<ComponentRegistry>,
}

impl UpdateComponentsStatusAction {
    /// Report the components of `registry`
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Action for UpdateComponentsStatusAction {
    fn name(&self) -> &str {
        "update-status-components"
    }

    async fn execute(&self, rr: &mut ReconciliationRequest) -> Result<(), ReconcileError> {
        for handler in self.registry.handlers() {
            handler.update_dsc_status(rr).await?;
        }
        Ok(())
    }
}

/// Controller reconciling the DataScienceCluster
pub fn new_dsc_reconciler(
    registry: Arc<ComponentRegistry>,
    client: Arc<dyn ClusterClient>,
    config: &ControllerConfig,
) -> BaseReconciler<DataScienceCluster> {
    BaseReconciler::<DataScienceCluster>::builder(client, DSC_CONTROLLER)
        .with_release(config.release.clone())
        .with_action(ProvisionComponentsAction::new(registry.clone()))
        .with_action(UpdateComponentsStatusAction::new(registry))
        .build()
}
