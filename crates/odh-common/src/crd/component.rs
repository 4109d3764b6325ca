//! Component CRD
//!
//! One `Component` object exists per enabled component. It is created by the
//! DataScienceCluster fan-out and carries the component name in the
//! `components.platform.opendatahub.io/name` label, which is how each
//! component controller selects its own objects.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{DevFlags, PlatformStatus};

/// Desired state of a single platform component
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "components.platform.opendatahub.io",
    version = "v1alpha1",
    kind = "Component",
    plural = "components",
    status = "PlatformStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Development overrides (disables render caching)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_flags: Option<DevFlags>,
}
