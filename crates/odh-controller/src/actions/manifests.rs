//! Actions that decide which manifests a cycle renders

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use odh_common::crd::{DevFlags, ManifestsConfig};
use odh_common::Error;

use crate::action::Action;
use crate::error::ReconcileError;
use crate::request::{HelmChartInfo, ManifestInfo, ReconciliationRequest, TemplateInfo};

/// Seeds `rr.manifests`, `rr.templates` and `rr.helm_charts`
#[derive(Clone, Debug, Default)]
pub struct InitializeAction {
    manifests: Vec<ManifestInfo>,
    templates: Vec<TemplateInfo>,
    helm_charts: Vec<HelmChartInfo>,
}

impl InitializeAction {
    /// Nothing to render until sources are added
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a kustomization
    pub fn with_manifest(mut self, manifest: ManifestInfo) -> Self {
        self.manifests.push(manifest);
        self
    }

    /// Add a template path
    pub fn with_template(mut self, template: TemplateInfo) -> Self {
        self.templates.push(template);
        self
    }

    /// Add a chart release
    pub fn with_helm_chart(mut self, chart: HelmChartInfo) -> Self {
        self.helm_charts.push(chart);
        self
    }
}

#[async_trait]
impl Action for InitializeAction {
    fn name(&self) -> &str {
        "initialize"
    }

    async fn execute(&self, rr: &mut ReconciliationRequest) -> Result<(), ReconcileError> {
        rr.manifests = self.manifests.clone();
        rr.templates = self.templates.clone();
        rr.helm_charts = self.helm_charts.clone();
        Ok(())
    }
}

/// Points the first kustomization at the manifests named in devflags
///
/// Only local paths are supported; a URI with a scheme fails the cycle.
#[derive(Clone, Debug)]
pub struct DevFlagsAction {
    component: String,
}

impl DevFlagsAction {
    /// Resolve devflags entries whose URI mentions `component`
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    fn resolve(&self, rr: &mut ReconciliationRequest, config: &ManifestsConfig) -> Result<(), ReconcileError> {
        if config.uri.contains("://") {
            return Err(Error::validation_for_field(
                rr.name(),
                "spec.devFlags.manifests.uri",
                format!("only local manifest paths are supported, got {}", config.uri),
            )
            .into());
        }

        if rr.manifests.is_empty() {
            rr.manifests.push(ManifestInfo::default());
        }
        let target = &mut rr.manifests[0];
        target.path = PathBuf::from(&config.uri);
        if !config.context_dir.is_empty() {
            target.context_dir = config.context_dir.clone();
        }
        if !config.source_path.is_empty() {
            target.source_path = config.source_path.clone();
        }
        debug!(component = %self.component, manifests = %target, "using devflags manifests");
        Ok(())
    }
}

#[async_trait]
impl Action for DevFlagsAction {
    fn name(&self) -> &str {
        "devflags"
    }

    async fn execute(&self, rr: &mut ReconciliationRequest) -> Result<(), ReconcileError> {
        let Some(flags) = rr.dev_flags.clone().filter(DevFlags::is_active) else {
            return Ok(());
        };
        for config in flags.manifests.iter().filter(|m| m.uri.contains(&self.component)) {
            self.resolve(rr, config)?;
        }
        Ok(())
    }
}
