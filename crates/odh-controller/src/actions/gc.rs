//! Garbage collection of resources a controller no longer renders
//!
//! Runs last in the chain. Anything labelled as part of the controller that
//! the current render did not produce is deleted, unless it is being deleted
//! already, belongs to another instance, is a CRD, or opted out of management.

use std::collections::HashSet;

use async_trait::async_trait;
use kube::api::GroupVersionKind;
use tracing::{debug, info};

use odh_common::resources::{
    annotation, gvk_of, is_terminating, is_unmanaged, ResourceKey, CRD_GROUP, CRD_KIND,
};
use odh_common::{metrics, ANNOTATION_INSTANCE_UID, LABEL_PART_OF};

use crate::action::Action;
use crate::client::ResourceRef;
use crate::error::ReconcileError;
use crate::request::ReconciliationRequest;

/// Deletes stale resources labelled `part-of=<controller>`
#[derive(Clone, Debug, Default)]
pub struct GcAction {
    allow_crds: bool,
    skip_types: Vec<GroupVersionKind>,
}

impl GcAction {
    /// Collect everything except CRDs
    pub fn new() -> Self {
        Self::default()
    }

    /// Also delete CustomResourceDefinitions the controller stopped rendering
    pub fn allow_crds(mut self) -> Self {
        self.allow_crds = true;
        self
    }

    /// Never look at these types
    pub fn skip_types(mut self, types: impl IntoIterator<Item = GroupVersionKind>) -> Self {
        self.skip_types.extend(types);
        self
    }

    fn collects(&self, gvk: &GroupVersionKind) -> bool {
        if gvk.group == CRD_GROUP && gvk.kind == CRD_KIND && !self.allow_crds {
            return false;
        }
        !self
            .skip_types
            .iter()
            .any(|t| t.group == gvk.group && t.kind == gvk.kind)
    }
}

/// Identity of a resource, with the namespace dropped for cluster-scoped kinds
fn identity(key: &ResourceKey, namespaced: bool) -> ResourceKey {
    ResourceKey {
        namespace: if namespaced { key.namespace.clone() } else { None },
        ..key.clone()
    }
}

#[async_trait]
impl Action for GcAction {
    fn name(&self) -> &str {
        "gc"
    }

    async fn execute(&self, rr: &mut ReconciliationRequest) -> Result<(), ReconcileError> {
        if !rr.generated {
            debug!(controller = %rr.controller, "nothing rendered, skipping garbage collection");
            return Ok(());
        }

        let selector = format!("{LABEL_PART_OF}={}", rr.controller);
        let types = rr.client.deletable_types().await?;

        let mut keep = HashSet::new();
        for obj in &rr.resources {
            let key = ResourceKey::of(obj)?;
            let namespaced = rr.client.is_namespaced(&gvk_of(obj)?).await?;
            keep.insert(identity(&key, namespaced));
        }

        let mut deleted = 0usize;
        for gvk in types.iter().filter(|t| self.collects(t)) {
            let namespaced = rr.client.is_namespaced(gvk).await?;
            for obj in rr.client.list(gvk, None, &selector).await? {
                let key = ResourceKey::of(&obj)?;
                if keep.contains(&identity(&key, namespaced)) || is_terminating(&obj) || is_unmanaged(&obj) {
                    continue;
                }
                if annotation(&obj, ANNOTATION_INSTANCE_UID).is_some_and(|uid| uid != rr.uid()) {
                    continue;
                }

                let resource = ResourceRef::of(&obj)?;
                debug!(resource = %resource, "deleting stale resource");
                rr.client.delete(&resource).await?;
                metrics::record_gc_deleted(&rr.controller);
                deleted += 1;
            }
        }

        if deleted > 0 {
            info!(controller = %rr.controller, instance = %rr.name(), deleted, "garbage collected resources");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use kube::api::DynamicObject;
    use odh_common::crd::Release;
    use odh_common::resources::{from_value, set_annotation};
    use odh_common::ANNOTATION_MANAGED;
    use serde_json::json;

    use crate::client::ClusterClient;
    use crate::testing::FakeClusterClient;

    const INSTANCE_UID: &str = "uid-dashboard";

    fn owned(kind: &str, api_version: &str, name: &str, namespace: Option<&str>) -> DynamicObject {
        let mut obj = from_value(json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": {
                "name": name,
                "labels": {LABEL_PART_OF: "dashboard"},
                "annotations": {ANNOTATION_INSTANCE_UID: INSTANCE_UID}
            }
        }))
        .unwrap();
        obj.metadata.namespace = namespace.map(str::to_string);
        obj
    }

    fn configmap(name: &str) -> DynamicObject {
        owned("ConfigMap", "v1", name, Some("opendatahub"))
    }

    fn request(fake: &Arc<FakeClusterClient>, rendered: Vec<DynamicObject>, generated: bool) -> ReconciliationRequest {
        let instance = from_value(json!({
            "apiVersion": "components.platform.opendatahub.io/v1alpha1",
            "kind": "Component",
            "metadata": {"name": "default-dashboard", "uid": INSTANCE_UID}
        }))
        .unwrap();
        let mut rr = ReconciliationRequest::new(fake.clone(), "dashboard", instance, Release::default());
        rr.add_resources(rendered);
        rr.generated = generated;
        rr
    }

    #[tokio::test]
    async fn deletes_resources_no_longer_rendered() {
        let fake = Arc::new(
            FakeClusterClient::new()
                .with_object(configmap("kept"))
                .with_object(configmap("stale")),
        );
        let mut rr = request(&fake, vec![configmap("kept")], true);
        GcAction::new().execute(&mut rr).await.unwrap();
        assert_eq!(fake.names_of_kind("ConfigMap"), vec!["kept"]);
    }

    #[tokio::test]
    async fn cached_render_skips_collection() {
        let fake = Arc::new(FakeClusterClient::new().with_object(configmap("stale")));
        let mut rr = request(&fake, vec![], false);
        GcAction::new().execute(&mut rr).await.unwrap();
        assert_eq!(fake.writes().total(), 0);
        assert_eq!(fake.names_of_kind("ConfigMap"), vec!["stale"]);
    }

    #[tokio::test]
    async fn protected_resources_survive() {
        let mut unmanaged = configmap("unmanaged");
        set_annotation(&mut unmanaged, ANNOTATION_MANAGED, "false");
        let mut foreign = configmap("foreign");
        set_annotation(&mut foreign, ANNOTATION_INSTANCE_UID, "uid-other");
        let crd = owned(
            "CustomResourceDefinition",
            "apiextensions.k8s.io/v1",
            "widgets.example.com",
            None,
        );
        let unlabelled = from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "unlabelled", "namespace": "opendatahub"}
        }))
        .unwrap();
        let fake = Arc::new(
            FakeClusterClient::new()
                .with_object(unmanaged)
                .with_object(foreign)
                .with_object(crd)
                .with_object(unlabelled),
        );

        let mut rr = request(&fake, vec![], true);
        GcAction::new().execute(&mut rr).await.unwrap();
        assert_eq!(fake.writes().deletes, 0);
        assert_eq!(fake.names_of_kind("ConfigMap").len(), 3);
        assert_eq!(fake.names_of_kind("CustomResourceDefinition").len(), 1);

        GcAction::new().allow_crds().execute(&mut rr).await.unwrap();
        assert!(fake.names_of_kind("CustomResourceDefinition").is_empty());
    }

    #[tokio::test]
    async fn terminating_resources_are_not_deleted_again() {
        let fake = Arc::new(FakeClusterClient::new().with_object(configmap("stale")));
        let r = ResourceRef::of(&configmap("stale")).unwrap();
        fake.add_finalizer(&r, "test/hold").await.unwrap();
        fake.mark_deleting(&r);
        fake.reset_writes();

        GcAction::new().execute(&mut request(&fake, vec![], true)).await.unwrap();
        assert_eq!(fake.writes().deletes, 0);
    }

    #[tokio::test]
    async fn cluster_scoped_identity_ignores_rendered_namespace() {
        let role = owned("ClusterRole", "rbac.authorization.k8s.io/v1", "dashboard-reader", None);
        let fake = Arc::new(FakeClusterClient::new().with_object(role));
        let rendered = owned(
            "ClusterRole",
            "rbac.authorization.k8s.io/v1",
            "dashboard-reader",
            Some("opendatahub"),
        );
        GcAction::new()
            .execute(&mut request(&fake, vec![rendered], true))
            .await
            .unwrap();
        assert_eq!(fake.names_of_kind("ClusterRole"), vec!["dashboard-reader"]);
    }
}
