//! Shared types used by every platform CRD

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Management state
// =============================================================================

/// Whether the operator should deploy a component
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ManagementState {
    /// The operator deploys and reconciles the component
    Managed,
    /// The operator removes the component
    #[default]
    Removed,
    /// The operator leaves existing resources alone
    Unmanaged,
}

impl fmt::Display for ManagementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Managed => write!(f, "Managed"),
            Self::Removed => write!(f, "Removed"),
            Self::Unmanaged => write!(f, "Unmanaged"),
        }
    }
}

// =============================================================================
// Dev flags
// =============================================================================

/// Development overrides for a component
///
/// When any manifest override is present the render caches are bypassed so
/// every reconcile renders from the overridden source.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DevFlags {
    /// Manifest sources replacing the shipped ones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<ManifestsConfig>,
}

impl DevFlags {
    /// True when at least one manifest override is configured
    pub fn is_active(&self) -> bool {
        !self.manifests.is_empty()
    }
}

/// One manifest source override
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestsConfig {
    /// Location of the manifests (a path under the manifests root)
    #[serde(default)]
    pub uri: String,

    /// Directory inside the source containing the manifests (e.g. "manifests")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context_dir: String,

    /// Overlay below the context directory (e.g. "overlays/odh")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_path: String,
}

// =============================================================================
// Platform and release
// =============================================================================

/// Product variant the operator is running as
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Upstream Open Data Hub
    #[default]
    #[serde(rename = "Open Data Hub")]
    OpenDataHub,
    /// Self-managed OpenShift AI
    #[serde(rename = "OpenShift AI Self-Managed")]
    SelfManagedRhoai,
    /// Managed OpenShift AI
    #[serde(rename = "OpenShift AI Cloud Service")]
    ManagedRhoai,
}

impl Platform {
    /// Display name used in annotations and status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenDataHub => "Open Data Hub",
            Self::SelfManagedRhoai => "OpenShift AI Self-Managed",
            Self::ManagedRhoai => "OpenShift AI Cloud Service",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_', ' '], "").as_str() {
            "opendatahub" | "odh" => Ok(Self::OpenDataHub),
            "openshiftaiselfmanaged" | "selfmanagedrhoai" | "rhoai" => Ok(Self::SelfManagedRhoai),
            "openshiftaicloudservice" | "managedrhoai" => Ok(Self::ManagedRhoai),
            _ => Err(format!("unknown platform: {s}")),
        }
    }
}

/// Platform name and version of the running operator
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Release {
    /// Platform variant
    pub name: Platform,
    /// Operator version
    pub version: String,
}

// =============================================================================
// Conditions
// =============================================================================

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// How much a false condition matters for overall readiness
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionSeverity {
    /// A false condition makes the object not ready
    #[default]
    Error,
    /// A false condition is informational only
    Info,
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., Ready, ProvisioningSucceeded)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Severity of the condition when false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,

    /// Generation the condition was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            severity: None,
            observed_generation: None,
            last_transition_time: Utc::now(),
        }
    }

    /// True when the condition status is True
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Insert or replace a condition by type
///
/// The transition time is kept when the status did not change so that
/// repeated reconciles do not churn the timestamp.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

// =============================================================================
// Status
// =============================================================================

/// Phase reported when every happy condition holds
pub const PHASE_READY: &str = "Ready";

/// Phase reported otherwise
pub const PHASE_NOT_READY: &str = "NotReady";

/// Status shared by every platform object
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    /// Ready or NotReady
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,

    /// Generation of the spec that was last fully reconciled
    #[serde(default)]
    pub observed_generation: i64,

    /// Conditions describing the current state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Release that last reconciled the object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<Release>,
}
