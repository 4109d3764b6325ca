//! Cluster access for the reconciliation pipeline
//!
//! Actions only see the [`ClusterClient`] trait so they can be exercised
//! against mocks or the in-memory client in tests. [`KubeClusterClient`]
//! implements it on `kube::Client`, resolving every group/version/kind through
//! API discovery.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use kube::api::{
    Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams, PostParams,
};
use kube::discovery::{verbs, ApiCapabilities, ApiResource, Discovery, Scope};
use kube::Client;
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use odh_common::resources::{gvk_of, type_meta};
use odh_common::Error;

/// Fully qualified reference to a single object
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Group, version and kind
    pub gvk: GroupVersionKind,
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Name
    pub name: String,
}

impl ResourceRef {
    /// Reference a cluster-scoped object
    pub fn cluster(gvk: GroupVersionKind, name: impl Into<String>) -> Self {
        Self {
            gvk,
            namespace: None,
            name: name.into(),
        }
    }

    /// Reference a namespaced object
    pub fn namespaced(
        gvk: GroupVersionKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            gvk,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Reference of an unstructured object
    pub fn of(obj: &DynamicObject) -> Result<Self, Error> {
        let gvk = gvk_of(obj)?;
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::validation_for(gvk.kind.clone(), "object has no name"))?;
        Ok(Self {
            gvk,
            namespace: obj.metadata.namespace.clone(),
            name,
        })
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.gvk.kind, ns, self.name),
            None => write!(f, "{} {}", self.gvk.kind, self.name),
        }
    }
}

/// Cluster operations used by actions and the reconciler
///
/// Every method works on unstructured objects. Reads of missing objects
/// return `None` rather than an error and deletes ignore NotFound.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch one object
    async fn get(&self, resource: &ResourceRef) -> Result<Option<DynamicObject>, Error>;

    /// List objects of a type, across all namespaces when `namespace` is `None`
    ///
    /// An empty `label_selector` selects everything.
    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<String>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, Error>;

    /// Create an object, failing if it exists
    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, Error>;

    /// Server-side apply an object
    async fn apply(
        &self,
        obj: &DynamicObject,
        field_manager: &str,
        force: bool,
    ) -> Result<DynamicObject, Error>;

    /// Delete one object with foreground propagation, ignoring NotFound
    async fn delete(&self, resource: &ResourceRef) -> Result<(), Error>;

    /// Delete every object of a type matching a label selector
    async fn delete_all_of(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<String>,
        label_selector: &str,
    ) -> Result<(), Error>;

    /// Replace the status subresource with the status of `obj`
    async fn update_status(&self, obj: &DynamicObject) -> Result<DynamicObject, Error>;

    /// Add a finalizer through a metadata patch (no-op when present)
    async fn add_finalizer(&self, resource: &ResourceRef, finalizer: &str) -> Result<(), Error>;

    /// Remove a finalizer through a metadata patch (no-op when absent)
    async fn remove_finalizer(&self, resource: &ResourceRef, finalizer: &str)
        -> Result<(), Error>;

    /// Remove a label through a metadata patch (no-op when absent)
    async fn remove_label(&self, resource: &ResourceRef, key: &str) -> Result<(), Error>;

    /// Whether a type is namespaced
    async fn is_namespaced(&self, gvk: &GroupVersionKind) -> Result<bool, Error>;

    /// Every type the API server can list and delete
    async fn deletable_types(&self) -> Result<Vec<GroupVersionKind>, Error>;
}

// =============================================================================
// kube::Client implementation
// =============================================================================

/// [`ClusterClient`] backed by a real API server
pub struct KubeClusterClient {
    client: Client,
    resolved: RwLock<HashMap<String, (ApiResource, ApiCapabilities)>>,
}

impl KubeClusterClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resolved: RwLock::new(HashMap::new()),
        }
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, ApiCapabilities), Error> {
        let key = format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind);
        if let Some(hit) = self.resolved.read().get(&key) {
            return Ok(hit.clone());
        }
        let resolved = kube::discovery::pinned_kind(&self.client, gvk).await?;
        self.resolved.write().insert(key, resolved.clone());
        Ok(resolved)
    }

    async fn api(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>, Error> {
        let (ar, caps) = self.resolve(gvk).await?;
        Ok(match (caps.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        })
    }

    async fn set_finalizers(
        &self,
        resource: &ResourceRef,
        update: impl FnOnce(&mut Vec<String>) -> bool + Send,
    ) -> Result<(), Error> {
        let api = self.api(&resource.gvk, resource.namespace.as_deref()).await?;
        let Some(current) = api.get_opt(&resource.name).await? else {
            return Ok(());
        };
        let mut finalizers = current.metadata.finalizers.clone().unwrap_or_default();
        if !update(&mut finalizers) {
            return Ok(());
        }
        // resourceVersion makes the merge patch fail on concurrent edits
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": current.metadata.resource_version,
            }
        });
        api.patch_metadata(&resource.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

fn ignore_not_found<T>(result: Result<T, kube::Error>) -> Result<(), Error> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(&self, resource: &ResourceRef) -> Result<Option<DynamicObject>, Error> {
        let api = self.api(&resource.gvk, resource.namespace.as_deref()).await?;
        let mut obj = api.get_opt(&resource.name).await?;
        if let Some(obj) = obj.as_mut() {
            obj.types.get_or_insert_with(|| type_meta(&resource.gvk));
        }
        Ok(obj)
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<String>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, Error> {
        let api = self.api(gvk, namespace.as_deref()).await?;
        let mut lp = ListParams::default();
        if !label_selector.is_empty() {
            lp = lp.labels(label_selector);
        }
        let list = api.list(&lp).await?;
        Ok(list
            .items
            .into_iter()
            .map(|mut obj| {
                obj.types.get_or_insert_with(|| type_meta(gvk));
                obj
            })
            .collect())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, Error> {
        let gvk = gvk_of(obj)?;
        let api = self.api(&gvk, obj.metadata.namespace.as_deref()).await?;
        Ok(api.create(&PostParams::default(), obj).await?)
    }

    async fn apply(
        &self,
        obj: &DynamicObject,
        field_manager: &str,
        force: bool,
    ) -> Result<DynamicObject, Error> {
        let resource = ResourceRef::of(obj)?;
        let api = self.api(&resource.gvk, resource.namespace.as_deref()).await?;
        let mut params = PatchParams::apply(field_manager);
        if force {
            params = params.force();
        }
        Ok(api.patch(&resource.name, &params, &Patch::Apply(obj)).await?)
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<(), Error> {
        let api = self.api(&resource.gvk, resource.namespace.as_deref()).await?;
        debug!(resource = %resource, "deleting");
        ignore_not_found(api.delete(&resource.name, &DeleteParams::foreground()).await)
    }

    async fn delete_all_of(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<String>,
        label_selector: &str,
    ) -> Result<(), Error> {
        let api = self.api(gvk, namespace.as_deref()).await?;
        let lp = ListParams::default().labels(label_selector);
        ignore_not_found(api.delete_collection(&DeleteParams::foreground(), &lp).await)
    }

    async fn update_status(&self, obj: &DynamicObject) -> Result<DynamicObject, Error> {
        let resource = ResourceRef::of(obj)?;
        let api = self.api(&resource.gvk, resource.namespace.as_deref()).await?;
        let body = serde_json::to_vec(obj)?;
        Ok(api
            .replace_status(&resource.name, &PostParams::default(), body)
            .await?)
    }

    async fn add_finalizer(&self, resource: &ResourceRef, finalizer: &str) -> Result<(), Error> {
        self.set_finalizers(resource, |finalizers| {
            if finalizers.iter().any(|f| f == finalizer) {
                return false;
            }
            finalizers.push(finalizer.to_string());
            true
        })
        .await
    }

    async fn remove_finalizer(
        &self,
        resource: &ResourceRef,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.set_finalizers(resource, |finalizers| {
            let before = finalizers.len();
            finalizers.retain(|f| f != finalizer);
            finalizers.len() != before
        })
        .await
    }

    async fn remove_label(&self, resource: &ResourceRef, key: &str) -> Result<(), Error> {
        let api = self.api(&resource.gvk, resource.namespace.as_deref()).await?;
        let patch = json!({"metadata": {"labels": {key: null}}});
        ignore_not_found(
            api.patch_metadata(&resource.name, &PatchParams::default(), &Patch::Merge(&patch))
                .await,
        )
    }

    async fn is_namespaced(&self, gvk: &GroupVersionKind) -> Result<bool, Error> {
        let (_, caps) = self.resolve(gvk).await?;
        Ok(caps.scope == Scope::Namespaced)
    }

    async fn deletable_types(&self) -> Result<Vec<GroupVersionKind>, Error> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        let mut types = Vec::new();
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                if !caps.supports_operation(verbs::LIST) || !caps.supports_operation(verbs::DELETE) {
                    continue;
                }
                types.push(GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind));
            }
        }
        if types.is_empty() {
            warn!("discovery returned no deletable types");
        }
        Ok(types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odh_common::resources::from_value;

    #[test]
    fn resource_ref_of_object() {
        let obj = from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "odh-dashboard", "namespace": "opendatahub"}
        }))
        .unwrap();
        let r = ResourceRef::of(&obj).unwrap();
        assert_eq!(r.gvk, GroupVersionKind::gvk("apps", "v1", "Deployment"));
        assert_eq!(r.namespace.as_deref(), Some("opendatahub"));
        assert_eq!(r.to_string(), "Deployment opendatahub/odh-dashboard");
    }

    #[test]
    fn resource_ref_requires_name() {
        let obj = from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"generateName": "cm-"}
        }))
        .unwrap();
        assert!(ResourceRef::of(&obj).is_err());
    }

    #[tokio::test]
    async fn mock_client_reports_missing_objects_as_none() {
        let mut mock = MockClusterClient::new();
        mock.expect_get().returning(|_| Ok(None));
        let r = ResourceRef::cluster(GroupVersionKind::gvk("", "v1", "Namespace"), "opendatahub");
        assert!(mock.get(&r).await.unwrap().is_none());
    }
}
