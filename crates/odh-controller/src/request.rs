//! Per-cycle state threaded through the action chain

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use serde_json::Value;

use odh_common::crd::{DSCInitialization, DataScienceCluster, DevFlags, Release};
use odh_common::resources::sort_install_order;
use odh_common::DEFAULT_APPLICATIONS_NAMESPACE;

use crate::action::Action;
use crate::client::{ClusterClient, ResourceRef};
use crate::conditions::ConditionsManager;
use crate::error::ReconcileError;

// =============================================================================
// Manifest sources
// =============================================================================

/// Location of a kustomization inside the manifests tree
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestInfo {
    /// Root of the component's manifests
    pub path: PathBuf,
    /// Directory under `path` holding the kustomizations
    pub context_dir: String,
    /// Overlay or base under `context_dir`
    pub source_path: String,
}

impl ManifestInfo {
    /// Describe a kustomization at `path/context_dir/source_path`
    pub fn new(
        path: impl Into<PathBuf>,
        context_dir: impl Into<String>,
        source_path: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            context_dir: context_dir.into(),
            source_path: source_path.into(),
        }
    }

    /// Directory handed to the kustomize engine
    pub fn full_path(&self) -> PathBuf {
        let mut full = self.path.clone();
        for segment in [&self.context_dir, &self.source_path] {
            if !segment.is_empty() {
                full.push(segment);
            }
        }
        full
    }
}

impl fmt::Display for ManifestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.path.display().to_string();
        let segments: Vec<&str> = [path.as_str(), &self.context_dir, &self.source_path]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        f.write_str(&segments.join("/"))
    }
}

/// A template path (may contain wildcards) and the metadata stamped on its output
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplateInfo {
    /// File path or glob
    pub path: String,
    /// Labels added to every rendered object
    pub labels: BTreeMap<String, String>,
    /// Annotations added to every rendered object
    pub annotations: BTreeMap<String, String>,
}

impl TemplateInfo {
    /// Template without extra metadata
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// A helm chart release and the hooks around its deployment
#[derive(Clone, Default)]
pub struct HelmChartInfo {
    /// Chart directory or reference
    pub chart: String,
    /// Release name
    pub release_name: String,
    /// Release namespace, the applications namespace when empty
    pub namespace: String,
    /// Chart values
    pub values: Value,
    /// Run before the deploy loop
    pub pre_apply: Vec<Arc<dyn Action>>,
    /// Run after the deploy loop
    pub post_apply: Vec<Arc<dyn Action>>,
}

impl fmt::Debug for HelmChartInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelmChartInfo")
            .field("chart", &self.chart)
            .field("release_name", &self.release_name)
            .field("namespace", &self.namespace)
            .field("values", &self.values)
            .field("pre_apply", &self.pre_apply.iter().map(|a| a.name()).collect::<Vec<_>>())
            .field("post_apply", &self.post_apply.iter().map(|a| a.name()).collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// Request
// =============================================================================

/// Mutable state of one reconcile cycle
///
/// Owned by a single reconcile call. Render actions append to `resources`,
/// deploy reads it and garbage collection keeps whatever it lists.
pub struct ReconciliationRequest {
    /// Cluster access
    pub client: Arc<dyn ClusterClient>,
    /// Name of the controller running the cycle, used as field manager and part-of label
    pub controller: String,
    /// The object being reconciled
    pub instance: DynamicObject,
    /// Development overrides read from the instance
    pub dev_flags: Option<DevFlags>,
    /// The DataScienceCluster singleton
    pub dsc: Option<DataScienceCluster>,
    /// The DSCInitialization singleton
    pub dsci: Option<DSCInitialization>,
    /// Running platform release
    pub release: Release,
    /// Kustomizations to render
    pub manifests: Vec<ManifestInfo>,
    /// Templates to render
    pub templates: Vec<TemplateInfo>,
    /// Helm charts to render
    pub helm_charts: Vec<HelmChartInfo>,
    /// Rendered objects, CRDs first
    pub resources: Vec<DynamicObject>,
    /// Set when a render action rendered instead of reusing its cache
    pub generated: bool,
    /// Conditions for the status written at the end of the cycle
    pub conditions: ConditionsManager,
    /// Kind-specific status fields merged into the status at the end of the cycle
    pub extra_status: serde_json::Map<String, Value>,
}

impl ReconciliationRequest {
    /// Start a cycle for `instance`
    pub fn new(
        client: Arc<dyn ClusterClient>,
        controller: impl Into<String>,
        instance: DynamicObject,
        release: Release,
    ) -> Self {
        let generation = instance.metadata.generation.unwrap_or_default();
        Self {
            client,
            controller: controller.into(),
            instance,
            dev_flags: None,
            dsc: None,
            dsci: None,
            release,
            manifests: Vec::new(),
            templates: Vec::new(),
            helm_charts: Vec::new(),
            resources: Vec::new(),
            generated: false,
            conditions: ConditionsManager::default().with_generation(generation),
            extra_status: serde_json::Map::new(),
        }
    }

    /// `metadata.generation` of the instance, 0 when unset
    pub fn generation(&self) -> i64 {
        self.instance.metadata.generation.unwrap_or_default()
    }

    /// `metadata.uid` of the instance, empty when unset
    pub fn uid(&self) -> &str {
        self.instance.metadata.uid.as_deref().unwrap_or_default()
    }

    /// `metadata.name` of the instance, empty when unset
    pub fn name(&self) -> &str {
        self.instance.metadata.name.as_deref().unwrap_or_default()
    }

    /// True when the instance is being deleted
    pub fn is_terminating(&self) -> bool {
        self.instance.metadata.deletion_timestamp.is_some()
    }

    /// True when the instance carries devflags, even empty ones
    pub fn dev_flags_active(&self) -> bool {
        self.dev_flags.is_some()
    }

    /// Reference to the instance
    pub fn instance_ref(&self) -> Result<ResourceRef, ReconcileError> {
        Ok(ResourceRef::of(&self.instance)?)
    }

    /// Controller owner reference pointing at the instance
    pub fn owner_reference(&self) -> Result<OwnerReference, ReconcileError> {
        let types = self
            .instance
            .types
            .as_ref()
            .ok_or_else(|| ReconcileError::fatal("instance has no apiVersion/kind"))?;
        Ok(OwnerReference {
            api_version: types.api_version.clone(),
            kind: types.kind.clone(),
            name: self.name().to_string(),
            uid: self.uid().to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }

    /// Namespace component workloads are deployed into
    pub fn applications_namespace(&self) -> &str {
        self.dsci
            .as_ref()
            .map(|d| d.spec.applications_namespace.as_str())
            .filter(|ns| !ns.is_empty())
            .unwrap_or(DEFAULT_APPLICATIONS_NAMESPACE)
    }

    /// Append rendered objects, keeping CRDs ahead of everything else
    pub fn add_resources(&mut self, objects: impl IntoIterator<Item = DynamicObject>) {
        self.resources.extend(objects);
        sort_install_order(&mut self.resources);
    }

    /// Visit every resource until `f` returns `Ok(false)` or an error
    pub fn for_each_resource<F>(&mut self, mut f: F) -> Result<(), ReconcileError>
    where
        F: FnMut(&mut DynamicObject) -> Result<bool, ReconcileError>,
    {
        for obj in &mut self.resources {
            if !f(obj)? {
                break;
            }
        }
        Ok(())
    }

    /// Drop every resource matching `predicate`
    pub fn remove_resources<P>(&mut self, mut predicate: P)
    where
        P: FnMut(&DynamicObject) -> bool,
    {
        self.resources.retain(|obj| !predicate(obj));
    }

    /// Manifest root of the first kustomization, if any
    pub fn manifests_root(&self) -> Option<&Path> {
        self.manifests.first().map(|m| m.path.as_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeClusterClient;
    use odh_common::resources::{from_value, kind_of};
    use serde_json::json;

    fn object(kind: &str, name: &str) -> DynamicObject {
        let api_version = if kind == "CustomResourceDefinition" {
            "apiextensions.k8s.io/v1"
        } else {
            "v1"
        };
        from_value(json!({"apiVersion": api_version, "kind": kind, "metadata": {"name": name}}))
            .unwrap()
    }

    fn request() -> ReconciliationRequest {
        let mut instance = object("ConfigMap", "instance");
        instance.metadata.generation = Some(4);
        ReconciliationRequest::new(
            Arc::new(FakeClusterClient::new()),
            "dashboard",
            instance,
            Release::default(),
        )
    }

    #[test]
    fn manifest_info_display_skips_empty_segments() {
        let info = ManifestInfo::new("/opt/manifests/dashboard", "", "odh");
        assert_eq!(info.to_string(), "/opt/manifests/dashboard/odh");
        assert_eq!(info.full_path(), PathBuf::from("/opt/manifests/dashboard/odh"));

        let info = ManifestInfo::new("/opt/manifests", "dashboard", "overlays/odh");
        assert_eq!(info.to_string(), "/opt/manifests/dashboard/overlays/odh");
    }

    #[test]
    fn add_resources_keeps_crds_first() {
        let mut rr = request();
        rr.add_resources([object("ConfigMap", "a")]);
        rr.add_resources([object("CustomResourceDefinition", "crd"), object("Secret", "b")]);
        let kinds: Vec<_> = rr.resources.iter().map(kind_of).collect();
        assert_eq!(kinds, vec!["CustomResourceDefinition", "ConfigMap", "Secret"]);
    }

    #[test]
    fn for_each_resource_stops_early() {
        let mut rr = request();
        rr.add_resources([object("ConfigMap", "a"), object("ConfigMap", "b")]);
        let mut seen = 0;
        rr.for_each_resource(|_| {
            seen += 1;
            Ok(false)
        })
        .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn remove_resources_by_predicate() {
        let mut rr = request();
        rr.add_resources([object("ConfigMap", "a"), object("Secret", "b")]);
        rr.remove_resources(|o| kind_of(o) == "Secret");
        assert_eq!(rr.resources.len(), 1);
    }

    #[test]
    fn accessors_read_instance_and_singletons() {
        let rr = request();
        assert_eq!(rr.generation(), 4);
        assert_eq!(rr.name(), "instance");
        assert_eq!(rr.applications_namespace(), "opendatahub");
        assert!(!rr.dev_flags_active());
    }

    #[test]
    fn empty_devflags_still_count_as_set() {
        let mut rr = request();
        rr.dev_flags = Some(DevFlags::default());
        assert!(rr.dev_flags_active());
    }
}
