//! Startup steps run before the controllers

use odh_common::crd::{DSCInitialization, DSCInitializationSpec};
use odh_common::resources::to_dynamic;
use odh_controller::{gvk_for, ClusterClient};

/// Name of the DSCInitialization created when none exists
pub const DEFAULT_DSCI_NAME: &str = "default-dsci";

/// Create the DSCInitialization singleton when the cluster has none
///
/// Returns whether an object was created. An existing instance is never
/// modified, whatever its namespace.
pub async fn ensure_default_dsci(
    client: &dyn ClusterClient,
    applications_namespace: &str,
) -> anyhow::Result<bool> {
    let existing = client.list(&gvk_for::<DSCInitialization>(), None, "").await?;
    if !existing.is_empty() {
        tracing::debug!(count = existing.len(), "DSCInitialization already present");
        return Ok(false);
    }

    let dsci = DSCInitialization::new(
        DEFAULT_DSCI_NAME,
        DSCInitializationSpec {
            applications_namespace: applications_namespace.to_string(),
            ..Default::default()
        },
    );
    client.create(&to_dynamic(&dsci)?).await?;
    tracing::info!(namespace = %applications_namespace, "created default DSCInitialization");
    Ok(true)
}
