//! Common types for the ODH operator: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod metrics;
pub mod resources;
pub mod retry;
pub mod telemetry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Finalizer placed on every platform object that has a finalizer chain
pub const PLATFORM_FINALIZER: &str = "platform.opendatahub.io/finalizer";

/// Default namespace for component workloads
pub const DEFAULT_APPLICATIONS_NAMESPACE: &str = "opendatahub";

/// Default root of the manifests tree shipped with the operator image
pub const DEFAULT_MANIFESTS_PATH: &str = "/opt/manifests";

// =============================================================================
// Labels
// =============================================================================

/// Label identifying the controller that deployed a resource
pub const LABEL_PART_OF: &str = "platform.opendatahub.io/part-of";

/// Prefix of the counted per-component label (`app.opendatahub.io/<component>`)
///
/// A resource shared between components carries one such label per user.
pub const LABEL_COMPONENT_PREFIX: &str = "app.opendatahub.io/";

/// Label the component CRs use to select their handler
pub const LABEL_COMPONENT_NAME: &str = "components.platform.opendatahub.io/name";

// =============================================================================
// Annotations
// =============================================================================

/// Annotation that marks a resource as not managed by the operator when set to "false"
pub const ANNOTATION_MANAGED: &str = "opendatahub.io/managed";

/// Generation of the instance that last deployed a resource
pub const ANNOTATION_INSTANCE_GENERATION: &str = "platform.opendatahub.io/instance.generation";

/// Name of the instance that last deployed a resource
pub const ANNOTATION_INSTANCE_NAME: &str = "platform.opendatahub.io/instance.name";

/// UID of the instance that last deployed a resource
pub const ANNOTATION_INSTANCE_UID: &str = "platform.opendatahub.io/instance.uid";

/// Platform type that deployed a resource
pub const ANNOTATION_PLATFORM_TYPE: &str = "platform.opendatahub.io/type";

/// Platform version that deployed a resource
pub const ANNOTATION_PLATFORM_VERSION: &str = "platform.opendatahub.io/version";

/// Build the counted component label key for a component name
pub fn component_label(component: &str) -> String {
    format!("{LABEL_COMPONENT_PREFIX}{component}")
}
