//! The components this operator ships

use std::collections::BTreeMap;

use kube::api::GroupVersionKind;

use odh_common::crd::Platform;
use odh_components::{ComponentError, ComponentRegistry, ManifestComponent, ManifestRoot};

fn deployment() -> GroupVersionKind {
    GroupVersionKind::gvk("apps", "v1", "Deployment")
}

fn dashboard(root: &ManifestRoot, platform: Platform) -> ManifestComponent {
    let section_title = match platform {
        Platform::SelfManagedRhoai => "OpenShift Self Managed Services",
        Platform::ManagedRhoai => "OpenShift Managed Services",
        Platform::OpenDataHub => "OpenShift Open Data Hub",
    };
    ManifestComponent::new("dashboard", "Dashboard", root.clone())
        .with_overlay(Platform::SelfManagedRhoai, "rhoai/onprem")
        .with_overlay(Platform::ManagedRhoai, "rhoai/addon")
        .with_image_param("odh-dashboard-image", "RELATED_IMAGE_ODH_DASHBOARD_IMAGE")
        .with_image_param("model-registry-ui-image", "RELATED_IMAGE_ODH_MOD_ARCH_MODEL_REGISTRY_IMAGE")
        .with_image_param("gen-ai-ui-image", "RELATED_IMAGE_ODH_MOD_ARCH_GEN_AI_IMAGE")
        .with_image_param("kube-rbac-proxy", "RELATED_IMAGE_OSE_KUBE_RBAC_PROXY_IMAGE")
        .with_extra_params(BTreeMap::from([(
            "section-title".to_string(),
            section_title.to_string(),
        )]))
        .owns(deployment())
}

fn workbenches(root: &ManifestRoot) -> ManifestComponent {
    ManifestComponent::new("workbenches", "Workbenches", root.clone())
        .with_image_param("odh-notebook-controller-image", "RELATED_IMAGE_ODH_NOTEBOOK_CONTROLLER_IMAGE")
        .with_image_param("odh-kf-notebook-controller-image", "RELATED_IMAGE_ODH_KF_NOTEBOOK_CONTROLLER_IMAGE")
        .with_image_param("oauth-proxy-image", "RELATED_IMAGE_OSE_OAUTH_PROXY_IMAGE")
        .owns(deployment())
}

fn kueue(root: &ManifestRoot) -> ManifestComponent {
    ManifestComponent::new("kueue", "Kueue", root.clone())
        .with_default_overlay("rhoai")
        .with_image_param("odh-kueue-controller-image", "RELATED_IMAGE_ODH_KUEUE_CONTROLLER_IMAGE")
        .owns(deployment())
}

fn ray(root: &ManifestRoot) -> ManifestComponent {
    ManifestComponent::new("ray", "Ray", root.clone())
        .with_image_param("odh-kuberay-operator-controller-image", "RELATED_IMAGE_ODH_KUBERAY_OPERATOR_CONTROLLER_IMAGE")
        .owns(deployment())
}

fn kserve(root: &ManifestRoot) -> ManifestComponent {
    ManifestComponent::new("kserve", "Kserve", root.clone())
        .with_image_param("kserve-agent", "RELATED_IMAGE_ODH_KSERVE_AGENT_IMAGE")
        .with_image_param("kserve-controller", "RELATED_IMAGE_ODH_KSERVE_CONTROLLER_IMAGE")
        .with_image_param("kserve-router", "RELATED_IMAGE_ODH_KSERVE_ROUTER_IMAGE")
        .with_image_param("kserve-storage-initializer", "RELATED_IMAGE_ODH_KSERVE_STORAGE_INITIALIZER_IMAGE")
        .requires_crd(
            "servicemeshcontrolplanes.maistra.io",
            "ServiceMeshOperatorNotInstalled",
            "ServiceMesh operator must be installed for this component's configuration",
        )
        .owns(deployment())
}

fn trustyai(root: &ManifestRoot) -> ManifestComponent {
    ManifestComponent::new("trustyai", "TrustyAI", root.clone())
        .with_image_param("trustyaiServiceImage", "RELATED_IMAGE_ODH_TRUSTYAI_SERVICE_IMAGE")
        .with_image_param("trustyaiOperatorImage", "RELATED_IMAGE_ODH_TRUSTYAI_SERVICE_OPERATOR_IMAGE")
        .owns(deployment())
}

/// Registry of every shipped component, manifests read from `root`
pub fn default_registry(root: ManifestRoot, platform: Platform) -> Result<ComponentRegistry, ComponentError> {
    let mut registry = ComponentRegistry::new();
    registry.register(dashboard(&root, platform))?;
    registry.register(workbenches(&root))?;
    registry.register(kueue(&root))?;
    registry.register(ray(&root))?;
    registry.register(kserve(&root))?;
    registry.register(trustyai(&root))?;
    Ok(registry)
}
