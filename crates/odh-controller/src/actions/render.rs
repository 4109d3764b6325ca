//! Render actions, one per manifest engine
//!
//! Each action owns its engine and a [`ResourceCacher`] labelled with the
//! engine name, renders the sources listed on the request and appends the
//! result to `rr.resources`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;

use odh_manifests::{
    ChartSource, FileSystem, HelmBackend, HelmRenderer, KustomizeEngine, TemplateContext,
    TemplateEngine, Transformer,
};
use odh_common::LABEL_PART_OF;

use crate::action::Action;
use crate::cacher::{CacheKeyFn, Renderer, ResourceCacher};
use crate::error::ReconcileError;
use crate::request::ReconciliationRequest;

/// Namespace and part-of label every engine stamps, plus configured metadata
fn base_transformer(
    rr: &ReconciliationRequest,
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
) -> Transformer {
    let mut transformer =
        Transformer::namespace(rr.applications_namespace()).with_label(LABEL_PART_OF, &rr.controller);
    transformer.labels.extend(labels.clone());
    transformer.annotations.extend(annotations.clone());
    transformer
}

macro_rules! render_metadata_builders {
    () => {
        /// Add a label to every rendered object
        pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
            self.labels.insert(key.into(), value.into());
            self
        }

        /// Add an annotation to every rendered object
        pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
            self.annotations.insert(key.into(), value.into());
            self
        }

        /// Replace the cache key function, `None` renders on every cycle
        pub fn with_cache_key(mut self, key_fn: Option<CacheKeyFn>) -> Self {
            self.cacher = self.cacher.with_key_fn(key_fn);
            self
        }
    };
}

// =============================================================================
// Kustomize
// =============================================================================

/// Renders every entry of `rr.manifests`
pub struct RenderKustomizeAction {
    engine: KustomizeEngine,
    cacher: ResourceCacher,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
}

impl RenderKustomizeAction {
    /// Render kustomizations read from `fs`
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            engine: KustomizeEngine::new(fs),
            cacher: ResourceCacher::new("kustomize"),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    render_metadata_builders!();
}

#[async_trait]
impl Renderer for RenderKustomizeAction {
    async fn render(&self, rr: &ReconciliationRequest) -> Result<Vec<DynamicObject>, ReconcileError> {
        let transformer = base_transformer(rr, &self.labels, &self.annotations);
        let mut objects = Vec::new();
        for manifest in &rr.manifests {
            let rendered = self
                .engine
                .render(&manifest.full_path(), &transformer)
                .map_err(|e| ReconcileError::from(e).context(format!("rendering {manifest}")))?;
            objects.extend(rendered);
        }
        Ok(objects)
    }
}

#[async_trait]
impl Action for RenderKustomizeAction {
    fn name(&self) -> &str {
        "render-kustomize"
    }

    async fn execute(&self, rr: &mut ReconciliationRequest) -> Result<(), ReconcileError> {
        self.cacher.render(rr, self).await
    }
}

// =============================================================================
// Helm
// =============================================================================

/// Renders every entry of `rr.helm_charts`
pub struct RenderHelmAction {
    renderer: HelmRenderer,
    cacher: ResourceCacher,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
}

impl RenderHelmAction {
    /// Render charts through `backend`
    pub fn new(backend: Arc<dyn HelmBackend>) -> Self {
        Self {
            renderer: HelmRenderer::new(backend),
            cacher: ResourceCacher::new("helm"),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    render_metadata_builders!();
}

#[async_trait]
impl Renderer for RenderHelmAction {
    async fn render(&self, rr: &ReconciliationRequest) -> Result<Vec<DynamicObject>, ReconcileError> {
        let base = base_transformer(rr, &self.labels, &self.annotations);
        let mut objects = Vec::new();
        for chart in &rr.helm_charts {
            let namespace = if chart.namespace.is_empty() {
                rr.applications_namespace().to_string()
            } else {
                chart.namespace.clone()
            };
            let source = ChartSource {
                chart: chart.chart.clone(),
                release_name: chart.release_name.clone(),
                namespace: namespace.clone(),
                values: chart.values.clone(),
            };
            let transformer = base.clone().merged(&Transformer::namespace(namespace));
            objects.extend(self.renderer.render(&[source], &transformer).await?);
        }
        Ok(objects)
    }
}

#[async_trait]
impl Action for RenderHelmAction {
    fn name(&self) -> &str {
        "render-helm"
    }

    async fn execute(&self, rr: &mut ReconciliationRequest) -> Result<(), ReconcileError> {
        self.cacher.render(rr, self).await
    }
}

// =============================================================================
// Templates
// =============================================================================

/// Renders every entry of `rr.templates`
pub struct RenderTemplateAction {
    engine: TemplateEngine,
    cacher: ResourceCacher,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
}

impl RenderTemplateAction {
    /// Render templates read from `fs`
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            engine: TemplateEngine::new(fs),
            cacher: ResourceCacher::new("template"),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    render_metadata_builders!();
}

#[async_trait]
impl Renderer for RenderTemplateAction {
    async fn render(&self, rr: &ReconciliationRequest) -> Result<Vec<DynamicObject>, ReconcileError> {
        let context = TemplateContext {
            component: serde_json::to_value(&rr.instance)
                .map_err(|e| ReconcileError::fatal(format!("failed to encode instance: {e}")))?,
            dsci: serde_json::to_value(&rr.dsci)
                .map_err(|e| ReconcileError::fatal(format!("failed to encode DSCInitialization: {e}")))?,
            namespace: rr.applications_namespace().to_string(),
        };
        let base = base_transformer(rr, &self.labels, &self.annotations);

        let mut objects = Vec::new();
        for template in &rr.templates {
            let mut transformer = base.clone();
            transformer.labels.extend(template.labels.clone());
            transformer.annotations.extend(template.annotations.clone());
            objects.extend(self.engine.render(&template.path, &context, &transformer)?);
        }
        Ok(objects)
    }
}

#[async_trait]
impl Action for RenderTemplateAction {
    fn name(&self) -> &str {
        "render-template"
    }

    async fn execute(&self, rr: &mut ReconciliationRequest) -> Result<(), ReconcileError> {
        self.cacher.render(rr, self).await
    }
}
