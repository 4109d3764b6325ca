//! Custom Resource Definitions for the ODH operator

mod component;
mod dsc;
mod dsci;
mod types;

pub use component::{Component, ComponentSpec};
pub use dsc::{
    ComponentManagementSpec, ComponentStatusSummary, DataScienceCluster, DataScienceClusterSpec,
    DataScienceClusterStatus,
};
pub use dsci::{DSCInitialization, DSCInitializationSpec, DSCInitializationStatus, MonitoringSpec};
pub use types::{
    find_condition, set_condition, Condition, ConditionSeverity, ConditionStatus, DevFlags,
    ManagementState, ManifestsConfig, Platform, PlatformStatus, Release, PHASE_NOT_READY,
    PHASE_READY,
};
