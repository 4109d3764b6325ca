//! DSCInitialization CRD
//!
//! Cluster-wide platform settings shared by every component, most
//! importantly the namespace component workloads are deployed into.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ManagementState, Release};
use crate::DEFAULT_APPLICATIONS_NAMESPACE;

/// Platform initialization settings
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "dscinitialization.opendatahub.io",
    version = "v1",
    kind = "DSCInitialization",
    plural = "dscinitializations",
    shortname = "dsci",
    status = "DSCInitializationStatus",
    printcolumn = r#"{"name":"Namespace","type":"string","jsonPath":".spec.applicationsNamespace"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DSCInitializationSpec {
    /// Namespace component workloads are deployed into
    #[serde(default = "default_applications_namespace")]
    pub applications_namespace: String,

    /// Monitoring stack settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringSpec>,
}

impl Default for DSCInitializationSpec {
    fn default() -> Self {
        Self {
            applications_namespace: default_applications_namespace(),
            monitoring: None,
        }
    }
}

fn default_applications_namespace() -> String {
    DEFAULT_APPLICATIONS_NAMESPACE.to_string()
}

/// Monitoring stack settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSpec {
    /// Whether monitoring is deployed
    #[serde(default)]
    pub management_state: ManagementState,

    /// Namespace for monitoring resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Observed state of the DSCInitialization
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DSCInitializationStatus {
    /// Ready or NotReady
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,

    /// Conditions describing the current state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Release that last reconciled the object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<Release>,
}
