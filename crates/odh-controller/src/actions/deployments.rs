//! Deployment readiness reporting

use async_trait::async_trait;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::Value;

use odh_common::LABEL_PART_OF;

use crate::action::Action;
use crate::conditions::{CONDITION_DEPLOYMENTS_AVAILABLE, REASON_DEPLOYMENTS_NOT_READY};
use crate::error::ReconcileError;
use crate::request::ReconciliationRequest;

fn replicas(deployment: &DynamicObject, field: &str) -> i64 {
    deployment
        .data
        .get("status")
        .and_then(|s| s.get(field))
        .and_then(Value::as_i64)
        .unwrap_or_default()
}

/// Sets `DeploymentsAvailable` from the controller's Deployments
///
/// A deployment counts as ready when all of its replicas are. No
/// deployments at all is reported as not ready.
#[derive(Clone, Copy, Debug, Default)]
pub struct UpdateDeploymentsStatusAction;

#[async_trait]
impl Action for UpdateDeploymentsStatusAction {
    fn name(&self) -> &str {
        "update-status-deployments"
    }

    async fn execute(&self, rr: &mut ReconciliationRequest) -> Result<(), ReconcileError> {
        let gvk = GroupVersionKind::gvk("apps", "v1", "Deployment");
        let selector = format!("{LABEL_PART_OF}={}", rr.controller);
        let deployments = rr
            .client
            .list(&gvk, Some(rr.applications_namespace().to_string()), &selector)
            .await?;

        let total = deployments.len();
        let ready = deployments
            .iter()
            .filter(|d| replicas(d, "readyReplicas") == replicas(d, "replicas"))
            .count();
        let message = format!("{ready}/{total} deployments ready");

        if total > 0 && ready == total {
            rr.conditions.mark_true(CONDITION_DEPLOYMENTS_AVAILABLE, message);
        } else {
            rr.conditions
                .mark_false(CONDITION_DEPLOYMENTS_AVAILABLE, REASON_DEPLOYMENTS_NOT_READY, message);
        }
        Ok(())
    }
}
