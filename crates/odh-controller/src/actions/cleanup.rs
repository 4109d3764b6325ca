//! Finalizer-chain deletion and prerequisite checks

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::GroupVersionKind;
use tracing::info;

use odh_common::resources::{CRD_GROUP, CRD_KIND};

use crate::action::Action;
use crate::client::ResourceRef;
use crate::error::ReconcileError;
use crate::request::ReconciliationRequest;

/// Deletes every object of the given types matching a label set
///
/// Namespaced types are deleted in the applications namespace unless a
/// namespace is set explicitly.
#[derive(Clone, Debug, Default)]
pub struct DeleteResourcesAction {
    types: Vec<GroupVersionKind>,
    namespace: Option<String>,
    labels: BTreeMap<String, String>,
}

impl DeleteResourcesAction {
    /// Delete objects of `types`
    pub fn new(types: impl IntoIterator<Item = GroupVersionKind>) -> Self {
        Self {
            types: types.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Only delete objects carrying this label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Delete in this namespace instead of the applications namespace
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    fn selector(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[async_trait]
impl Action for DeleteResourcesAction {
    fn name(&self) -> &str {
        "delete-resources"
    }

    async fn execute(&self, rr: &mut ReconciliationRequest) -> Result<(), ReconcileError> {
        let selector = self.selector();
        let namespace = self
            .namespace
            .clone()
            .unwrap_or_else(|| rr.applications_namespace().to_string());
        for gvk in &self.types {
            let ns = if rr.client.is_namespaced(gvk).await? {
                Some(namespace.clone())
            } else {
                None
            };
            rr.client.delete_all_of(gvk, ns, &selector).await?;
            info!(controller = %rr.controller, kind = %gvk.kind, selector = %selector, "deleted resources");
        }
        Ok(())
    }
}

/// Stops the chain when a CustomResourceDefinition is not installed
#[derive(Clone, Debug)]
pub struct CheckCrdAction {
    crd: String,
    reason: String,
    message: String,
}

impl CheckCrdAction {
    /// Require the CRD named `crd` (`<plural>.<group>`)
    pub fn new(crd: impl Into<String>, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            crd: crd.into(),
            reason: reason.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Action for CheckCrdAction {
    fn name(&self) -> &str {
        "check-crd"
    }

    async fn execute(&self, rr: &mut ReconciliationRequest) -> Result<(), ReconcileError> {
        let crd = ResourceRef::cluster(GroupVersionKind::gvk(CRD_GROUP, "v1", CRD_KIND), &self.crd);
        match rr.client.get(&crd).await? {
            Some(_) => Ok(()),
            None => Err(ReconcileError::stop(&self.reason, &self.message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use kube::api::DynamicObject;
    use odh_common::crd::Release;
    use odh_common::resources::from_value;
    use serde_json::json;

    use crate::testing::FakeClusterClient;

    fn configmap(name: &str, namespace: &str, labels: serde_json::Value) -> DynamicObject {
        from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": namespace, "labels": labels}
        }))
        .unwrap()
    }

    fn request(fake: &Arc<FakeClusterClient>) -> ReconciliationRequest {
        let instance = from_value(json!({
            "apiVersion": "components.platform.opendatahub.io/v1alpha1",
            "kind": "Component",
            "metadata": {"name": "default-foo"}
        }))
        .unwrap();
        ReconciliationRequest::new(fake.clone(), "foo", instance, Release::default())
    }

    #[tokio::test]
    async fn deletes_only_labelled_objects_in_namespace() {
        let fake = Arc::new(
            FakeClusterClient::new()
                .with_object(configmap("foo", "ns", json!({"part-of": "foo"})))
                .with_object(configmap("bar", "ns", json!({"part-of": "foo"})))
                .with_object(configmap("baz", "ns", json!({"part-of": "baz"})))
                .with_object(configmap("other", "elsewhere", json!({"part-of": "foo"}))),
        );
        let action = DeleteResourcesAction::new([GroupVersionKind::gvk("", "v1", "ConfigMap")])
            .in_namespace("ns")
            .with_label("part-of", "foo");

        action.execute(&mut request(&fake)).await.unwrap();

        let remaining: Vec<_> = fake
            .objects_of_kind("ConfigMap")
            .into_iter()
            .filter(|o| o.metadata.namespace.as_deref() == Some("ns"))
            .filter_map(|o| o.metadata.name)
            .collect();
        assert_eq!(remaining, vec!["baz"]);
        assert_eq!(fake.names_of_kind("ConfigMap").len(), 2);
    }

    #[tokio::test]
    async fn missing_crd_stops_the_chain() {
        let fake = Arc::new(FakeClusterClient::new());
        let action = CheckCrdAction::new(
            "servicemeshcontrolplanes.maistra.io",
            "ServiceMeshNotConfigured",
            "ServiceMesh operator must be installed",
        );
        let err = action.execute(&mut request(&fake)).await.unwrap_err();
        assert!(err.is_stop());
        assert_eq!(err.reason(), "ServiceMeshNotConfigured");
    }

    #[tokio::test]
    async fn present_crd_passes() {
        let crd = from_value(json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": {"name": "servicemeshcontrolplanes.maistra.io"}
        }))
        .unwrap();
        let fake = Arc::new(FakeClusterClient::new().with_object(crd));
        CheckCrdAction::new("servicemeshcontrolplanes.maistra.io", "Missing", "")
            .execute(&mut request(&fake))
            .await
            .unwrap();
    }
}
