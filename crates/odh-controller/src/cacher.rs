//! Content-addressed render cache
//!
//! Rendering kustomizations and charts is the expensive part of a cycle and
//! its inputs rarely change. [`ResourceCacher`] keeps the output of the last
//! render together with a key derived from every input, and hands back a
//! copy while the key matches.
//!
//! The cache is a single slot: one action value serves every instance of a
//! component kind, and the instance UID and generation are part of the key,
//! so two instances alternating simply re-render. The slot sits behind a
//! `parking_lot::Mutex` that is never held across an await.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use parking_lot::Mutex;
use tracing::debug;

use odh_common::metrics;
use odh_common::resources::sha256_hex;

use crate::error::ReconcileError;
use crate::request::ReconciliationRequest;

/// Produces the objects of one render engine for a cycle
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render without touching the request
    async fn render(&self, rr: &ReconciliationRequest) -> Result<Vec<DynamicObject>, ReconcileError>;
}

/// Computes the cache key of a cycle
pub type CacheKeyFn = Arc<dyn Fn(&ReconciliationRequest) -> Result<String, ReconcileError> + Send + Sync>;

struct Entry {
    key: String,
    value: Vec<DynamicObject>,
}

/// Single-slot cache in front of a [`Renderer`]
pub struct ResourceCacher {
    engine: String,
    key_fn: Option<CacheKeyFn>,
    slot: Mutex<Option<Entry>>,
}

impl ResourceCacher {
    /// Cache keyed by [`default_cache_key`], labelled with the engine name in metrics
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            key_fn: Some(Arc::new(default_cache_key)),
            slot: Mutex::new(None),
        }
    }

    /// Replace the key function; `None` renders on every cycle
    pub fn with_key_fn(mut self, key_fn: Option<CacheKeyFn>) -> Self {
        self.key_fn = key_fn;
        self
    }

    /// Engine label
    pub fn engine(&self) -> &str {
        &self.engine
    }

    fn clear(&self) {
        *self.slot.lock() = None;
    }

    fn lookup(&self, key: &str) -> Option<Vec<DynamicObject>> {
        self.slot
            .lock()
            .as_ref()
            .filter(|e| e.key == key && !e.value.is_empty())
            .map(|e| e.value.clone())
    }

    /// Append the output of `renderer` to `rr.resources`, rendering only when needed
    pub async fn render(
        &self,
        rr: &mut ReconciliationRequest,
        renderer: &dyn Renderer,
    ) -> Result<(), ReconcileError> {
        let key = if rr.dev_flags_active() {
            self.clear();
            None
        } else {
            match &self.key_fn {
                Some(key_fn) => {
                    let key = key_fn(rr)?;
                    if key.is_empty() {
                        return Err(ReconcileError::fatal("render cache key is empty"));
                    }
                    Some(key)
                }
                None => None,
            }
        };

        if let Some(hit) = key.as_deref().and_then(|k| self.lookup(k)) {
            debug!(controller = %rr.controller, engine = %self.engine, count = hit.len(), "reusing cached render");
            rr.add_resources(hit);
            return Ok(());
        }

        let rendered = renderer.render(rr).await?;
        metrics::record_rendered(&rr.controller, &self.engine, rendered.len());
        if let Some(key) = key {
            *self.slot.lock() = Some(Entry {
                key,
                value: rendered.clone(),
            });
        }
        rr.generated = true;
        rr.add_resources(rendered);
        Ok(())
    }
}

/// Append `v` as a zig-zag LEB128 varint
fn put_varint(buf: &mut Vec<u8>, v: i64) {
    let mut ux = ((v << 1) ^ (v >> 63)) as u64;
    while ux >= 0x80 {
        buf.push((ux as u8) | 0x80);
        ux >>= 7;
    }
    buf.push(ux as u8);
}

/// SHA-256 over every input that can change the rendered output
///
/// Covers the instance UID and generation, the release, every manifest
/// location, every template path and every chart with its values.
pub fn default_cache_key(rr: &ReconciliationRequest) -> Result<String, ReconcileError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(rr.uid().as_bytes());
    put_varint(&mut buf, rr.generation());
    buf.extend_from_slice(rr.release.name.as_str().as_bytes());
    buf.extend_from_slice(rr.release.version.as_bytes());
    for m in &rr.manifests {
        buf.extend_from_slice(m.to_string().as_bytes());
    }
    for t in &rr.templates {
        buf.extend_from_slice(t.path.as_bytes());
    }
    for chart in &rr.helm_charts {
        buf.extend_from_slice(chart.chart.as_bytes());
        buf.extend_from_slice(chart.release_name.as_bytes());
        let values = serde_json::to_vec(&chart.values)
            .map_err(|e| ReconcileError::fatal(format!("failed to encode values of {}: {e}", chart.chart)))?;
        buf.extend_from_slice(&values);
    }
    Ok(sha256_hex(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use odh_common::crd::{DevFlags, ManifestsConfig, Release};
    use odh_common::resources::from_value;
    use serde_json::json;

    use crate::request::ManifestInfo;
    use crate::testing::FakeClusterClient;

    struct CountingRenderer {
        calls: AtomicUsize,
    }

    impl CountingRenderer {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Renderer for CountingRenderer {
        async fn render(&self, rr: &ReconciliationRequest) -> Result<Vec<DynamicObject>, ReconcileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let obj = from_value(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": format!("{}-config", rr.name())}
            }))?;
            Ok(vec![obj])
        }
    }

    fn request(generation: i64) -> ReconciliationRequest {
        let instance = from_value(json!({
            "apiVersion": "components.platform.opendatahub.io/v1alpha1",
            "kind": "Component",
            "metadata": {"name": "dashboard", "uid": "uid-1", "generation": generation}
        }))
        .unwrap();
        let mut rr = ReconciliationRequest::new(
            Arc::new(FakeClusterClient::new()),
            "dashboard",
            instance,
            Release::default(),
        );
        rr.manifests.push(ManifestInfo::new("/opt/manifests/dashboard", "", "odh"));
        rr
    }

    #[test]
    fn varint_matches_zigzag_encoding() {
        let mut buf = Vec::new();
        put_varint(&mut buf, 1);
        put_varint(&mut buf, -1);
        put_varint(&mut buf, 64);
        assert_eq!(buf, vec![0x02, 0x01, 0x80, 0x01]);
    }

    #[test]
    fn key_changes_with_generation_and_inputs() {
        let a = default_cache_key(&request(1)).unwrap();
        assert_eq!(a, default_cache_key(&request(1)).unwrap());
        assert_ne!(a, default_cache_key(&request(2)).unwrap());

        let mut rr = request(1);
        rr.manifests[0].source_path = "rhoai".to_string();
        assert_ne!(a, default_cache_key(&rr).unwrap());
    }

    #[tokio::test]
    async fn same_inputs_reuse_the_render() {
        let cacher = ResourceCacher::new("kustomize");
        let renderer = CountingRenderer::new();

        let mut rr = request(1);
        cacher.render(&mut rr, &renderer).await.unwrap();
        assert_eq!(renderer.calls(), 1);
        assert!(rr.generated);
        assert_eq!(rr.resources.len(), 1);

        let mut rr = request(1);
        cacher.render(&mut rr, &renderer).await.unwrap();
        assert_eq!(renderer.calls(), 1);
        assert!(!rr.generated);
        assert_eq!(rr.resources.len(), 1);

        let mut rr = request(2);
        cacher.render(&mut rr, &renderer).await.unwrap();
        assert_eq!(renderer.calls(), 2);
        assert!(rr.generated);
    }

    #[tokio::test]
    async fn alternating_generations_render_each_time() {
        let cacher = ResourceCacher::new("kustomize");
        let renderer = CountingRenderer::new();
        for generation in [1, 2, 1] {
            let mut rr = request(generation);
            cacher.render(&mut rr, &renderer).await.unwrap();
            assert!(rr.generated);
        }
        assert_eq!(renderer.calls(), 3);
    }

    #[tokio::test]
    async fn devflags_bypass_the_cache() {
        let cacher = ResourceCacher::new("kustomize");
        let renderer = CountingRenderer::new();
        for _ in 0..2 {
            let mut rr = request(1);
            rr.dev_flags = Some(DevFlags {
                manifests: vec![ManifestsConfig {
                    uri: "/opt/dev/dashboard".to_string(),
                    ..Default::default()
                }],
            });
            cacher.render(&mut rr, &renderer).await.unwrap();
            assert!(rr.generated);
        }
        assert_eq!(renderer.calls(), 2);
    }

    #[tokio::test]
    async fn empty_devflags_bypass_the_cache() {
        let cacher = ResourceCacher::new("kustomize");
        let renderer = CountingRenderer::new();
        for _ in 0..2 {
            let mut rr = request(1);
            rr.dev_flags = Some(DevFlags::default());
            cacher.render(&mut rr, &renderer).await.unwrap();
            assert!(rr.generated);
        }
        assert_eq!(renderer.calls(), 2);
    }

    #[tokio::test]
    async fn no_key_function_always_renders() {
        let cacher = ResourceCacher::new("template").with_key_fn(None);
        let renderer = CountingRenderer::new();
        cacher.render(&mut request(1), &renderer).await.unwrap();
        cacher.render(&mut request(1), &renderer).await.unwrap();
        assert_eq!(renderer.calls(), 2);
    }

    #[tokio::test]
    async fn key_errors_propagate_without_rendering() {
        let key_fn: CacheKeyFn = Arc::new(|_| Err(ReconcileError::fatal("no key")));
        let cacher = ResourceCacher::new("kustomize").with_key_fn(Some(key_fn));
        let renderer = CountingRenderer::new();
        let mut rr = request(1);
        assert!(cacher.render(&mut rr, &renderer).await.is_err());
        assert_eq!(renderer.calls(), 0);
        assert!(rr.resources.is_empty());
    }

    #[tokio::test]
    async fn empty_key_is_an_error() {
        let key_fn: CacheKeyFn = Arc::new(|_| Ok(String::new()));
        let cacher = ResourceCacher::new("kustomize").with_key_fn(Some(key_fn));
        let renderer = CountingRenderer::new();
        let err = cacher.render(&mut request(1), &renderer).await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
