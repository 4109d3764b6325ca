//! Helm chart rendering
//!
//! Charts are rendered client-side with `helm template`; nothing is
//! installed through Helm itself. The resulting objects go through the same
//! deploy path as every other engine.

use async_trait::async_trait;
use kube::api::DynamicObject;
#[cfg(test)]
use mockall::automock;
use odh_common::resources::sort_install_order;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::decode::decode_documents;
use crate::error::ManifestError;
use crate::transform::Transformer;

/// Default helm binary, resolved through `PATH`
pub const DEFAULT_HELM_BINARY: &str = "helm";

/// One chart release to render
#[derive(Clone, Debug, PartialEq)]
pub struct ChartSource {
    /// Local chart directory, archive or repository reference
    pub chart: String,
    /// Release name passed to `helm template`
    pub release_name: String,
    /// Namespace of the release
    pub namespace: String,
    /// Values, passed to helm as a JSON document
    pub values: Value,
}

/// Renders a chart release to a YAML stream
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HelmBackend: Send + Sync {
    /// Render `source` and return helm's stdout
    async fn template(&self, source: &ChartSource) -> Result<String, ManifestError>;
}

/// [`HelmBackend`] that runs the helm CLI
#[derive(Clone, Debug)]
pub struct HelmCli {
    binary: String,
}

impl Default for HelmCli {
    fn default() -> Self {
        Self::new(DEFAULT_HELM_BINARY)
    }
}

impl HelmCli {
    /// Use the given helm binary
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl HelmBackend for HelmCli {
    async fn template(&self, source: &ChartSource) -> Result<String, ManifestError> {
        let helm_err = |message: String| ManifestError::Helm {
            chart: source.chart.clone(),
            message,
        };

        let values = serde_json::to_vec(&source.values)
            .map_err(|e| helm_err(format!("failed to encode values: {e}")))?;

        let mut child = Command::new(&self.binary)
            .args([
                "template",
                &source.release_name,
                &source.chart,
                "--namespace",
                &source.namespace,
                "--values",
                "-",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| helm_err(format!("failed to run {}: {e}", self.binary)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&values)
                .await
                .map_err(|e| helm_err(format!("failed to write values: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| helm_err(format!("failed to wait for helm: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(helm_err(format!("helm template failed: {}", stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Renders charts through a [`HelmBackend`] into install-ordered objects
#[derive(Clone)]
pub struct HelmRenderer {
    backend: Arc<dyn HelmBackend>,
}

impl HelmRenderer {
    /// Create a renderer over `backend`
    pub fn new(backend: Arc<dyn HelmBackend>) -> Self {
        Self { backend }
    }

    /// Render every chart, apply `transformer` and move CRDs to the front
    pub async fn render(
        &self,
        charts: &[ChartSource],
        transformer: &Transformer,
    ) -> Result<Vec<DynamicObject>, ManifestError> {
        let mut objects = Vec::new();
        for chart in charts {
            let text = self.backend.template(chart).await?;
            let mut rendered = decode_documents(&chart.chart, &text)?;
            debug!(chart = %chart.chart, release = %chart.release_name, count = rendered.len(), "rendered chart");
            transformer.apply_all(&mut rendered);
            objects.extend(rendered);
        }
        sort_install_order(&mut objects);
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odh_common::resources::{is_crd, kind_of, label};
    use serde_json::json;

    const CHART_OUTPUT: &str = r#"---
# Source: kueue/templates/deployment.yaml
apiVersion: apps/v1
kind: Deployment
metadata:
  name: kueue-controller-manager
---
# Source: kueue/templates/service.yaml
apiVersion: v1
kind: Service
metadata:
  name: kueue-webhook
---
# Source: kueue/crds/workloads.yaml
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: workloads.kueue.x-k8s.io
"#;

    fn source() -> ChartSource {
        ChartSource {
            chart: "/opt/charts/kueue".to_string(),
            release_name: "kueue".to_string(),
            namespace: "opendatahub".to_string(),
            values: json!({"replicas": 1}),
        }
    }

    #[tokio::test]
    async fn crds_are_moved_first_and_transformed() {
        let mut backend = MockHelmBackend::new();
        backend
            .expect_template()
            .withf(|s| s.release_name == "kueue" && s.values["replicas"] == 1)
            .times(1)
            .returning(|_| Ok(CHART_OUTPUT.to_string()));

        let renderer = HelmRenderer::new(Arc::new(backend));
        let transformer = Transformer::namespace("opendatahub")
            .with_label("platform.opendatahub.io/part-of", "kueue");
        let objects = renderer.render(&[source()], &transformer).await.unwrap();

        assert_eq!(objects.len(), 3);
        assert!(is_crd(&objects[0]));
        assert_eq!(kind_of(&objects[1]), "Deployment");
        assert_eq!(kind_of(&objects[2]), "Service");
        assert!(objects
            .iter()
            .all(|o| label(o, "platform.opendatahub.io/part-of") == Some("kueue")));
        assert_eq!(objects[0].metadata.namespace, None);
        assert_eq!(objects[1].metadata.namespace.as_deref(), Some("opendatahub"));
    }

    #[tokio::test]
    async fn backend_failure_propagates() {
        let mut backend = MockHelmBackend::new();
        backend.expect_template().returning(|s| {
            Err(ManifestError::Helm {
                chart: s.chart.clone(),
                message: "chart not found".to_string(),
            })
        });

        let err = HelmRenderer::new(Arc::new(backend))
            .render(&[source()], &Transformer::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("chart not found"));
    }

    #[tokio::test]
    async fn malformed_output_fails_the_render() {
        let mut backend = MockHelmBackend::new();
        backend
            .expect_template()
            .returning(|_| Ok("apiVersion: v1\nkind: ConfigMap\n".to_string()));

        let err = HelmRenderer::new(Arc::new(backend))
            .render(&[source()], &Transformer::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ManifestError::Decode { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_a_helm_error() {
        let cli = HelmCli::new("/nonexistent/helm-binary");
        let err = cli.template(&source()).await.unwrap_err();
        assert!(matches!(err, ManifestError::Helm { .. }));
    }
}
