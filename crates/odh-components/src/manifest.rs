//! Data-driven handler for components shipped as kustomize manifests
//!
//! Most components differ only in where their manifests live, which image
//! parameters they take from the environment and which kinds they own. A
//! [`ManifestComponent`] captures exactly that and builds the standard
//! chain:
//!
//! `check-crd* -> initialize -> devflags -> render-kustomize -> render-helm? -> customize -> deploy -> update-status -> gc`
//!
//! The helm step is only present for components that declare charts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::GroupVersionKind;
use serde_json::{json, Map, Value};
use tracing::debug;

use odh_common::crd::{
    find_condition, Component, ComponentSpec, Condition, ConditionStatus, DataScienceCluster,
    ManagementState, Platform,
};
use odh_common::{component_label, LABEL_COMPONENT_NAME};
use odh_controller::actions::{
    CheckCrdAction, CustomizeAction, DeployAction, DeployCache, DevFlagsAction, GcAction,
    InitializeAction, RenderHelmAction, RenderKustomizeAction, UpdateDeploymentsStatusAction,
};
use odh_controller::conditions::CONDITION_READY;
use odh_controller::{
    gvk_for, BaseReconciler, ClusterClient, HelmChartInfo, ManifestInfo, ReconcileError,
    ReconciliationRequest, ResourceRef,
};
use odh_manifests::{FileSystem, HelmCli, ParamsApplier};

use crate::error::ComponentError;
use crate::handler::{ComponentHandler, ControllerConfig};

/// Suffix of the per-component condition on the DataScienceCluster
pub const READY_SUFFIX: &str = "Ready";

/// Annotation recording the management state a component CR was created with
pub const ANNOTATION_MANAGEMENT_STATE: &str = "component.opendatahub.io/management-state";

/// Where the shipped manifests live
#[derive(Clone)]
pub struct ManifestRoot {
    /// Root directory, one subdirectory per component
    pub path: PathBuf,
    /// Filesystem holding the tree
    pub fs: Arc<dyn FileSystem>,
}

impl ManifestRoot {
    /// Manifests under `path` on `fs`
    pub fn new(path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            path: path.into(),
            fs,
        }
    }

    fn component_dir(&self, component: &str) -> PathBuf {
        self.path.join(component)
    }
}

#[derive(Clone, Debug)]
struct RequiredCrd {
    name: String,
    reason: String,
    message: String,
}

/// A component rendered from `<root>/<name>/overlays/<overlay>`
pub struct ManifestComponent {
    name: String,
    kind: String,
    root: ManifestRoot,
    overlays: Vec<(Platform, String)>,
    default_overlay: String,
    image_params: BTreeMap<String, String>,
    extra_params: Vec<BTreeMap<String, String>>,
    owned: Vec<GroupVersionKind>,
    required_crds: Vec<RequiredCrd>,
    annotations: Vec<(String, String, String)>,
    charts: Vec<HelmChartInfo>,
}

impl ManifestComponent {
    /// Component `name`; `kind` names its `<kind>Ready` condition
    pub fn new(name: impl Into<String>, kind: impl Into<String>, root: ManifestRoot) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            root,
            overlays: Vec::new(),
            default_overlay: "odh".to_string(),
            image_params: BTreeMap::new(),
            extra_params: Vec::new(),
            owned: Vec::new(),
            required_crds: Vec::new(),
            annotations: Vec::new(),
            charts: Vec::new(),
        }
    }

    /// Overlay used on `platform`, `odh` when none is set
    pub fn with_overlay(mut self, platform: Platform, overlay: impl Into<String>) -> Self {
        self.overlays.push((platform, overlay.into()));
        self
    }

    /// Overlay used on platforms without an explicit one
    pub fn with_default_overlay(mut self, overlay: impl Into<String>) -> Self {
        self.default_overlay = overlay.into();
        self
    }

    /// Override the `param` key of `params.env` from environment variable `env_var`
    pub fn with_image_param(mut self, param: impl Into<String>, env_var: impl Into<String>) -> Self {
        self.image_params.insert(param.into(), env_var.into());
        self
    }

    /// Fixed `params.env` values, applied after the image overrides
    pub fn with_extra_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.extra_params.push(params);
        self
    }

    /// Kinds that get a controller owner reference to the component CR
    pub fn owns(mut self, gvk: GroupVersionKind) -> Self {
        self.owned.push(gvk);
        self
    }

    /// Stop reconciling until the CRD `name` is installed
    pub fn requires_crd(
        mut self,
        name: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.required_crds.push(RequiredCrd {
            name: name.into(),
            reason: reason.into(),
            message: message.into(),
        });
        self
    }

    /// Annotate every rendered object of `kind`
    pub fn annotate(mut self, kind: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.push((kind.into(), key.into(), value.into()));
        self
    }

    /// Also render `chart` through helm
    pub fn with_helm_chart(mut self, chart: HelmChartInfo) -> Self {
        self.charts.push(chart);
        self
    }

    /// Name of the component CR
    pub fn instance_name(&self) -> String {
        format!("default-{}", self.name)
    }

    /// Condition type reported on the DataScienceCluster
    pub fn ready_condition(&self) -> String {
        format!("{}{READY_SUFFIX}", self.kind)
    }

    fn overlay(&self, platform: Platform) -> &str {
        self.overlays
            .iter()
            .find(|(p, _)| *p == platform)
            .map(|(_, o)| o.as_str())
            .unwrap_or(&self.default_overlay)
    }

    /// Kustomization rendered on `platform`
    pub fn manifest_info(&self, platform: Platform) -> ManifestInfo {
        ManifestInfo::new(
            &self.root.path,
            &self.name,
            Path::new("overlays").join(self.overlay(platform)).to_string_lossy(),
        )
    }

    fn customizer(&self) -> CustomizeAction {
        self.annotations
            .iter()
            .fold(CustomizeAction::new(), |action, (kind, key, value)| {
                action.annotate_kind(kind, key, value)
            })
    }
}

fn ready_condition_of(obj: &kube::api::DynamicObject) -> Option<Condition> {
    let conditions: Vec<Condition> = obj
        .data
        .get("status")
        .and_then(|s| s.get("conditions"))
        .cloned()
        .and_then(|c| serde_json::from_value(c).ok())?;
    find_condition(&conditions, CONDITION_READY).cloned()
}

#[async_trait]
impl ComponentHandler for ManifestComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, platform: Platform) -> Result<(), ComponentError> {
        if self.image_params.is_empty() && self.extra_params.is_empty() {
            return Ok(());
        }
        let applier = ParamsApplier::new(self.root.fs.clone());
        let used = applier
            .apply_params_with_fallback(
                &self.root.component_dir(&self.name),
                self.overlay(platform),
                &self.image_params,
                &self.extra_params,
            )
            .map_err(|e| ComponentError::init(&self.name, e))?;
        debug!(component = %self.name, params = %used.display(), "applied params");
        Ok(())
    }

    fn new_cr_object(&self, dsc: &DataScienceCluster) -> Result<Component, ComponentError> {
        let settings = dsc.spec.components.get(&self.name);
        let mut component = Component::new(
            &self.instance_name(),
            ComponentSpec {
                dev_flags: settings.and_then(|s| s.dev_flags.clone()),
            },
        );
        component
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(LABEL_COMPONENT_NAME.to_string(), self.name.clone());
        component
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(
                ANNOTATION_MANAGEMENT_STATE.to_string(),
                self.management_state(dsc).to_string(),
            );
        Ok(component)
    }

    fn new_component_reconciler(
        &self,
        client: Arc<dyn ClusterClient>,
        config: &ControllerConfig,
    ) -> Result<BaseReconciler<Component>, ComponentError> {
        let platform = config.release.name;
        let mut builder =
            BaseReconciler::<Component>::builder(client, &self.name).with_release(config.release.clone());
        for crd in &self.required_crds {
            builder = builder.with_action(CheckCrdAction::new(&crd.name, &crd.reason, &crd.message));
        }
        let initialize = self
            .charts
            .iter()
            .cloned()
            .fold(InitializeAction::new().with_manifest(self.manifest_info(platform)), |init, chart| {
                init.with_helm_chart(chart)
            });
        builder = builder
            .with_action(initialize)
            .with_action(DevFlagsAction::new(&self.name))
            .with_action(
                RenderKustomizeAction::new(self.root.fs.clone())
                    .with_label(component_label(&self.name), "true"),
            );
        if !self.charts.is_empty() {
            builder = builder.with_action(
                RenderHelmAction::new(Arc::new(HelmCli::new(config.helm_binary.clone())))
                    .with_label(component_label(&self.name), "true"),
            );
        }
        Ok(builder
            .with_action(self.customizer())
            .with_action(
                DeployAction::new()
                    .with_owned(self.owned.clone())
                    .with_cache(config.deploy_cache_ttl.map(|ttl| DeployCache::new(Some(ttl)))),
            )
            .with_action(UpdateDeploymentsStatusAction)
            .with_action(GcAction::new())
            .build())
    }

    async fn update_dsc_status(
        &self,
        rr: &mut ReconciliationRequest,
    ) -> Result<ConditionStatus, ReconcileError> {
        let dsc = rr
            .dsc
            .clone()
            .ok_or_else(|| ReconcileError::fatal("DataScienceCluster not loaded"))?;
        let state = self.management_state(&dsc);
        let condition = self.ready_condition();

        let components = rr
            .extra_status
            .entry("components")
            .or_insert_with(|| Value::Object(Map::new()));
        components[self.name.as_str()] = json!({"managementState": state});

        rr.conditions.add_dependent(&condition);
        if state != ManagementState::Managed {
            rr.conditions.mark_info(
                &condition,
                &state.to_string(),
                format!("Component ManagementState is set to {state}"),
            );
            return Ok(ConditionStatus::Unknown);
        }

        let cr = ResourceRef::cluster(gvk_for::<Component>(), self.instance_name());
        let ready = rr.client.get(&cr).await?.as_ref().and_then(ready_condition_of);

        match ready {
            Some(c) => {
                match c.status {
                    ConditionStatus::True => rr.conditions.mark_true(&condition, c.message),
                    ConditionStatus::False => rr.conditions.mark_false(&condition, &c.reason, c.message),
                    ConditionStatus::Unknown => rr.conditions.mark_unknown(&condition, &c.reason, c.message),
                }
                Ok(c.status)
            }
            None => {
                rr.conditions
                    .mark_false(&condition, "NotReady", "component has not reported readiness yet");
                Ok(ConditionStatus::False)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use kube::api::DynamicObject;
    use odh_common::crd::Release;
    use odh_common::resources::from_value;
    use odh_controller::testing::FakeClusterClient;
    use odh_manifests::MemoryFileSystem;

    fn dsc(state: &str) -> DataScienceCluster {
        serde_json::from_value(json!({
            "apiVersion": "datasciencecluster.opendatahub.io/v1",
            "kind": "DataScienceCluster",
            "metadata": {"name": "default-dsc"},
            "spec": {"components": {"dashboard": {
                "managementState": state,
                "devFlags": {"manifests": [{"uri": "/opt/dev/dashboard"}]}
            }}}
        }))
        .unwrap()
    }

    fn dashboard(fs: Arc<MemoryFileSystem>) -> ManifestComponent {
        ManifestComponent::new("dashboard", "Dashboard", ManifestRoot::new("/opt/manifests", fs))
            .with_overlay(Platform::SelfManagedRhoai, "rhoai")
    }

    fn component_cr(ready: Option<(&str, &str)>) -> DynamicObject {
        let mut obj = json!({
            "apiVersion": "components.platform.opendatahub.io/v1alpha1",
            "kind": "Component",
            "metadata": {"name": "default-dashboard"},
            "spec": {}
        });
        if let Some((status, reason)) = ready {
            obj["status"] = json!({"conditions": [{
                "type": "Ready", "status": status, "reason": reason, "message": "1/2 deployments ready",
                "lastTransitionTime": "2026-01-01T00:00:00Z"
            }]});
        }
        from_value(obj).unwrap()
    }

    fn request(fake: FakeClusterClient, dsc: DataScienceCluster) -> ReconciliationRequest {
        let instance = from_value(json!({
            "apiVersion": "datasciencecluster.opendatahub.io/v1",
            "kind": "DataScienceCluster",
            "metadata": {"name": "default-dsc"}
        }))
        .unwrap();
        let mut rr = ReconciliationRequest::new(Arc::new(fake), "datasciencecluster", instance, Release::default());
        rr.dsc = Some(dsc);
        rr
    }

    #[tokio::test]
    async fn component_reconciler_deploys_rendered_manifests() {
        let fs = Arc::new(
            MemoryFileSystem::new()
                .with_file(
                    "/opt/manifests/dashboard/overlays/odh/kustomization.yaml",
                    "resources:\n- configmap.yaml\n",
                )
                .with_file(
                    "/opt/manifests/dashboard/overlays/odh/configmap.yaml",
                    "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: dashboard-config\ndata:\n  title: ODH\n",
                ),
        );
        let dsci = from_value(json!({
            "apiVersion": "dscinitialization.opendatahub.io/v1",
            "kind": "DSCInitialization",
            "metadata": {"name": "default-dsci"},
            "spec": {"applicationsNamespace": "opendatahub"}
        }))
        .unwrap();
        let fake = Arc::new(
            FakeClusterClient::new()
                .with_object(odh_common::resources::to_dynamic(&dsc("Managed")).unwrap())
                .with_object(dsci)
                .with_object(component_cr(None)),
        );
        let component = dashboard(fs).owns(GroupVersionKind::gvk("", "v1", "ConfigMap"));
        let reconciler = component
            .new_component_reconciler(fake.clone(), &ControllerConfig::default())
            .unwrap();

        reconciler
            .reconcile_ref(&ResourceRef::cluster(gvk_for::<Component>(), "default-dashboard"))
            .await
            .unwrap();

        let cm = fake
            .object(&ResourceRef::namespaced(
                GroupVersionKind::gvk("", "v1", "ConfigMap"),
                "opendatahub",
                "dashboard-config",
            ))
            .unwrap();
        let labels = cm.metadata.labels.clone().unwrap();
        assert_eq!(labels.get(&component_label("dashboard")).map(String::as_str), Some("true"));
        assert_eq!(
            labels.get(odh_common::LABEL_PART_OF).map(String::as_str),
            Some("dashboard")
        );
        let owners = cm.metadata.owner_references.unwrap();
        assert_eq!(owners[0].kind, "Component");
        assert_eq!(owners[0].name, "default-dashboard");
    }

    #[test]
    fn overlay_follows_platform() {
        let component = dashboard(Arc::new(MemoryFileSystem::new()));
        assert_eq!(
            component.manifest_info(Platform::SelfManagedRhoai).full_path(),
            PathBuf::from("/opt/manifests/dashboard/overlays/rhoai")
        );
        assert_eq!(
            component.manifest_info(Platform::OpenDataHub).full_path(),
            PathBuf::from("/opt/manifests/dashboard/overlays/odh")
        );
    }

    #[test]
    fn init_without_params_touches_nothing() {
        let fs = Arc::new(MemoryFileSystem::new());
        dashboard(fs.clone()).init(Platform::OpenDataHub).unwrap();
        assert!(fs.paths().is_empty());
    }

    #[test]
    fn init_falls_back_to_base_params() {
        let fs = Arc::new(
            MemoryFileSystem::new()
                .with_file("/opt/manifests/dashboard/base/params.env", "odh-dashboard-image=quay.io/old\nsection-title=ODH\n"),
        );
        let extra = BTreeMap::from([("section-title".to_string(), "OpenShift AI".to_string())]);
        dashboard(fs.clone())
            .with_extra_params(extra)
            .init(Platform::SelfManagedRhoai)
            .unwrap();

        let text = fs
            .read_to_string(Path::new("/opt/manifests/dashboard/base/params.env"))
            .unwrap();
        assert!(text.contains("section-title=OpenShift AI"));
        assert!(text.contains("odh-dashboard-image=quay.io/old"));
    }

    #[test]
    fn cr_object_carries_name_label_and_dev_flags() {
        let component = dashboard(Arc::new(MemoryFileSystem::new()));
        let cr = component.new_cr_object(&dsc("Managed")).unwrap();

        assert_eq!(cr.metadata.name.as_deref(), Some("default-dashboard"));
        let labels = cr.metadata.labels.unwrap();
        assert_eq!(labels.get(LABEL_COMPONENT_NAME).map(String::as_str), Some("dashboard"));
        let flags = cr.spec.dev_flags.unwrap();
        assert_eq!(flags.manifests[0].uri, "/opt/dev/dashboard");
    }

    #[tokio::test]
    async fn ready_component_marks_dsc_condition_true() {
        let fake = FakeClusterClient::new().with_object(component_cr(Some(("True", "Ready"))));
        let mut rr = request(fake, dsc("Managed"));

        let status = dashboard(Arc::new(MemoryFileSystem::new()))
            .update_dsc_status(&mut rr)
            .await
            .unwrap();

        assert_eq!(status, ConditionStatus::True);
        assert!(rr.conditions.get("DashboardReady").unwrap().is_true());
        assert_eq!(rr.extra_status["components"]["dashboard"]["managementState"], "Managed");
    }

    #[tokio::test]
    async fn unready_component_blocks_dsc_readiness() {
        let fake = FakeClusterClient::new()
            .with_object(component_cr(Some(("False", "DeploymentsNotReady"))));
        let mut rr = request(fake, dsc("Managed"));

        let status = dashboard(Arc::new(MemoryFileSystem::new()))
            .update_dsc_status(&mut rr)
            .await
            .unwrap();
        rr.conditions.mark_true(odh_controller::conditions::CONDITION_PROVISIONING_SUCCEEDED, "");
        rr.conditions.recompute_happy();

        assert_eq!(status, ConditionStatus::False);
        let ready = rr.conditions.get(CONDITION_READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "DeploymentsNotReady");
    }

    #[tokio::test]
    async fn missing_component_cr_is_not_ready() {
        let mut rr = request(FakeClusterClient::new(), dsc("Managed"));

        let status = dashboard(Arc::new(MemoryFileSystem::new()))
            .update_dsc_status(&mut rr)
            .await
            .unwrap();

        assert_eq!(status, ConditionStatus::False);
        assert_eq!(rr.conditions.get("DashboardReady").unwrap().reason, "NotReady");
    }

    #[tokio::test]
    async fn removed_component_is_informational() {
        let mut rr = request(FakeClusterClient::new(), dsc("Removed"));

        dashboard(Arc::new(MemoryFileSystem::new()))
            .update_dsc_status(&mut rr)
            .await
            .unwrap();
        rr.conditions.mark_true(odh_controller::conditions::CONDITION_PROVISIONING_SUCCEEDED, "");
        rr.conditions.recompute_happy();

        let condition = rr.conditions.get("DashboardReady").unwrap();
        assert_eq!(condition.reason, "Removed");
        assert_eq!(condition.message, "Component ManagementState is set to Removed");
        assert!(rr.conditions.is_happy());
    }
}
