//! Removal of a disabled component's resources
//!
//! A resource shared between components carries one
//! `app.opendatahub.io/<component>` label per component using it. Disabling
//! a component only deletes resources that no enabled component still
//! claims; the others just lose the disabled component's label.

use tracing::{debug, info};

use odh_common::resources::{is_crd, is_unmanaged};
use odh_common::{component_label, Error, LABEL_COMPONENT_PREFIX};

use crate::client::{ClusterClient, ResourceRef};

/// What happened to the resources labelled for a disabled component
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisableReport {
    /// Resources deleted
    pub deleted: usize,
    /// Resources kept because another enabled component still uses them
    pub unshared: usize,
    /// CRDs and unmanaged resources left untouched
    pub skipped: usize,
}

/// Names of the other components labelling a resource
fn other_users<'a>(
    labels: &'a std::collections::BTreeMap<String, String>,
    component: &'a str,
) -> impl Iterator<Item = &'a str> {
    labels
        .keys()
        .filter_map(|k| k.strip_prefix(LABEL_COMPONENT_PREFIX))
        .filter(move |name| *name != component)
}

/// Remove `component` from every resource labelled for it
///
/// `enabled` lists the components that stay enabled. CRDs and resources
/// annotated as unmanaged are always kept.
pub async fn disable_component(
    client: &dyn ClusterClient,
    component: &str,
    enabled: &[String],
) -> Result<DisableReport, Error> {
    let label = component_label(component);
    let mut report = DisableReport::default();

    for gvk in client.deletable_types().await? {
        for obj in client.list(&gvk, None, &label).await? {
            let resource = ResourceRef::of(&obj)?;
            if is_crd(&obj) || is_unmanaged(&obj) {
                debug!(resource = %resource, "keeping protected resource");
                report.skipped += 1;
                continue;
            }

            let still_used = obj.metadata.labels.as_ref().is_some_and(|labels| {
                other_users(labels, component).any(|other| enabled.iter().any(|e| e == other))
            });
            if still_used {
                client.remove_label(&resource, &label).await?;
                report.unshared += 1;
            } else {
                client.delete(&resource).await?;
                report.deleted += 1;
            }
        }
    }

    info!(
        component = %component,
        deleted = report.deleted,
        unshared = report.unshared,
        "disabled component"
    );
    Ok(report)
}
