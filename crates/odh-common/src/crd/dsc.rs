//! DataScienceCluster CRD
//!
//! The cluster-wide singleton declaring which components are enabled.
//! Exactly one instance must exist for component reconciles to proceed.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, DevFlags, ManagementState, Release};

/// Desired state of the platform components
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "datasciencecluster.opendatahub.io",
    version = "v1",
    kind = "DataScienceCluster",
    plural = "datascienceclusters",
    shortname = "dsc",
    status = "DataScienceClusterStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DataScienceClusterSpec {
    /// Per-component settings keyed by component name
    #[serde(default)]
    pub components: BTreeMap<String, ComponentManagementSpec>,
}

/// Per-component settings on the DataScienceCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentManagementSpec {
    /// Whether the component is deployed
    #[serde(default)]
    pub management_state: ManagementState,

    /// Development overrides copied onto the component CR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_flags: Option<DevFlags>,
}

/// Observed state of the DataScienceCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataScienceClusterStatus {
    /// Ready or NotReady
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,

    /// Generation of the spec that was last fully reconciled
    #[serde(default)]
    pub observed_generation: i64,

    /// Aggregated conditions, including one `<Name>Ready` per component
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Per-component status keyed by component name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, ComponentStatusSummary>,

    /// Release that last reconciled the object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<Release>,
}

/// Summary of one component reported on the DataScienceCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatusSummary {
    /// Management state the component was reconciled with
    pub management_state: ManagementState,
}

impl DataScienceCluster {
    /// Management state of a component, `Removed` when not listed
    pub fn management_state(&self, component: &str) -> ManagementState {
        self.spec
            .components
            .get(component)
            .map(|c| c.management_state)
            .unwrap_or_default()
    }

    /// Names of every component marked `Managed`
    pub fn enabled_components(&self) -> Vec<String> {
        self.spec
            .components
            .iter()
            .filter(|(_, c)| c.management_state == ManagementState::Managed)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn sample(components: &[(&str, ManagementState)]) -> DataScienceCluster {
        let mut spec = DataScienceClusterSpec::default();
        for (name, state) in components {
            spec.components.insert(
                name.to_string(),
                ComponentManagementSpec {
                    management_state: *state,
                    dev_flags: None,
                },
            );
        }
        DataScienceCluster::new("default-dsc", spec)
    }

    #[test]
    fn unlisted_component_is_removed() {
        let dsc = sample(&[("dashboard", ManagementState::Managed)]);
        assert_eq!(dsc.management_state("dashboard"), ManagementState::Managed);
        assert_eq!(dsc.management_state("ray"), ManagementState::Removed);
    }

    #[test]
    fn enabled_components_lists_only_managed() {
        let dsc = sample(&[
            ("dashboard", ManagementState::Managed),
            ("ray", ManagementState::Removed),
            ("kueue", ManagementState::Unmanaged),
            ("workbenches", ManagementState::Managed),
        ]);
        assert_eq!(dsc.enabled_components(), vec!["dashboard", "workbenches"]);
    }

    #[test]
    fn crd_is_cluster_scoped() {
        let crd = DataScienceCluster::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.names.kind, "DataScienceCluster");
    }
}
