//! CRD installation
//!
//! The operator installs its own CRDs on startup with server-side apply so
//! their schema always matches the running binary.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use odh_common::crd::{Component, DSCInitialization, DataScienceCluster};

/// Field manager used for CRD installation
pub const CRD_FIELD_MANAGER: &str = "odh-operator";

/// CRD definition with name and resource
pub struct CrdDef {
    /// `<plural>.<group>`
    pub name: &'static str,
    /// The definition
    pub crd: CustomResourceDefinition,
}

/// Every CRD the operator serves
pub fn platform_crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: "dscinitializations.dscinitialization.opendatahub.io",
            crd: DSCInitialization::crd(),
        },
        CrdDef {
            name: "datascienceclusters.datasciencecluster.opendatahub.io",
            crd: DataScienceCluster::crd(),
        },
        CrdDef {
            name: "components.components.platform.opendatahub.io",
            crd: Component::crd(),
        },
    ]
}

/// The CRDs as a multi-document YAML stream
pub fn crds_yaml() -> anyhow::Result<String> {
    let mut out = String::new();
    for def in platform_crds() {
        let doc = serde_yaml::to_string(&def.crd)
            .map_err(|e| anyhow::anyhow!("failed to serialize {} CRD: {}", def.name, e))?;
        out.push_str("---\n");
        out.push_str(&doc);
    }
    Ok(out)
}

/// Install or update every platform CRD
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CRD_FIELD_MANAGER).force();

    for def in platform_crds() {
        tracing::info!(crd = def.name, "installing CRD");
        crds.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }

    tracing::info!("platform CRDs installed/updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crd_names_match_their_definitions() {
        for def in platform_crds() {
            assert_eq!(def.crd.metadata.name.as_deref(), Some(def.name));
        }
    }

    #[test]
    fn yaml_stream_holds_every_crd() {
        let yaml = crds_yaml().unwrap();
        assert_eq!(yaml.matches("---\n").count(), 3);
        assert!(yaml.contains("kind: CustomResourceDefinition"));
        assert!(yaml.contains("name: datascienceclusters.datasciencecluster.opendatahub.io"));
    }
}
