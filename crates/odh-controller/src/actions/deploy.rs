//! Server-side apply of rendered resources
//!
//! Every rendered object is stamped with ownership metadata and applied with
//! the controller as field manager. A [`DeployCache`] remembers what was
//! applied at which live resourceVersion so unchanged objects cost one GET
//! and no write.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::Value;
use tracing::{debug, info};

use odh_common::resources::{
    gvk_of, hash_object, is_terminating, is_unmanaged, label, set_annotation, set_label,
    sha256_hex,
};
use odh_common::{
    metrics, ANNOTATION_INSTANCE_GENERATION, ANNOTATION_INSTANCE_NAME, ANNOTATION_INSTANCE_UID,
    ANNOTATION_MANAGED, ANNOTATION_PLATFORM_TYPE, ANNOTATION_PLATFORM_VERSION, LABEL_PART_OF,
};

use crate::action::Action;
use crate::client::ResourceRef;
use crate::error::ReconcileError;
use crate::request::ReconciliationRequest;

/// Default lifetime of a deploy cache entry
pub const DEFAULT_DEPLOY_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

// =============================================================================
// Deploy cache
// =============================================================================

/// Remembers objects applied at a given live state
///
/// Entries are stored per object. The key covers the identity of the
/// object, the resourceVersion the server returned and the hash of what was
/// sent, so any change on either side misses. Entries expire after the TTL
/// so drift is corrected eventually even when nothing bumps the
/// resourceVersion.
pub struct DeployCache {
    ttl: Option<Duration>,
    entries: DashMap<String, (String, Instant)>,
}

impl Default for DeployCache {
    fn default() -> Self {
        Self::new(Some(DEFAULT_DEPLOY_CACHE_TTL))
    }
}

fn identity(resource: &ResourceRef) -> String {
    format!("{}/{}", resource.gvk.group, resource)
}

impl DeployCache {
    /// Cache with the given TTL, entries never expire with `None`
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Key of `desired` applied over `live`
    pub fn key(live: Option<&DynamicObject>, desired: &DynamicObject) -> Result<String, ReconcileError> {
        let gvk = gvk_of(desired)?;
        let resource_version = live
            .and_then(|l| l.metadata.resource_version.as_deref())
            .unwrap_or_default();
        let raw = format!(
            "{}/{}.{}.{}/{}.{}.{}",
            gvk.group,
            gvk.version,
            gvk.kind,
            desired.metadata.namespace.as_deref().unwrap_or_default(),
            desired.metadata.name.as_deref().unwrap_or_default(),
            resource_version,
            hash_object(desired)?,
        );
        Ok(sha256_hex(raw.as_bytes()))
    }

    /// True when `resource` was last applied under `key` and has not expired
    pub fn has(&self, resource: &ResourceRef, key: &str) -> bool {
        match self.entries.get(&identity(resource)) {
            Some(entry) => {
                let (cached, added) = entry.value();
                cached == key && self.ttl.map_or(true, |ttl| added.elapsed() < ttl)
            }
            None => false,
        }
    }

    /// Record that `resource` was applied under `key`
    pub fn add(&self, resource: &ResourceRef, key: String) {
        self.entries.insert(identity(resource), (key, Instant::now()));
    }

    /// Forget `resource`
    pub fn delete(&self, resource: &ResourceRef) {
        self.entries.remove(&identity(resource));
    }

    /// Drop expired entries
    pub fn sync(&self) {
        if let Some(ttl) = self.ttl {
            self.entries.retain(|_, (_, added)| added.elapsed() < ttl);
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Deploy action
// =============================================================================

/// Applies `rr.resources` to the cluster
pub struct DeployAction {
    owned: Vec<GroupVersionKind>,
    cache: Option<DeployCache>,
}

impl Default for DeployAction {
    fn default() -> Self {
        Self::new()
    }
}

impl DeployAction {
    /// Deploy with the default cache and no owned kinds
    pub fn new() -> Self {
        Self {
            owned: Vec::new(),
            cache: Some(DeployCache::default()),
        }
    }

    /// Set a controller owner reference on objects of these kinds
    ///
    /// Versions are ignored when matching.
    pub fn with_owned(mut self, owned: impl IntoIterator<Item = GroupVersionKind>) -> Self {
        self.owned.extend(owned);
        self
    }

    /// Replace the cache, `None` applies on every cycle
    pub fn with_cache(mut self, cache: Option<DeployCache>) -> Self {
        self.cache = cache;
        self
    }

    fn is_owned(&self, gvk: &GroupVersionKind) -> bool {
        self.owned
            .iter()
            .any(|o| o.group == gvk.group && o.kind == gvk.kind)
    }

    async fn deploy_one(
        &self,
        rr: &ReconciliationRequest,
        obj: &DynamicObject,
    ) -> Result<(), ReconcileError> {
        let resource = ResourceRef::of(obj)?;
        let live = rr.client.get(&resource).await?;

        if live.as_ref().is_some_and(is_unmanaged) {
            debug!(resource = %resource, "skipping unmanaged resource");
            return Ok(());
        }

        if live.as_ref().is_some_and(is_terminating) {
            if let Some(cache) = &self.cache {
                cache.delete(&resource);
            }
            debug!(resource = %resource, "skipping resource being deleted");
            return Ok(());
        }

        let mut desired = obj.clone();
        stamp(rr, &mut desired);
        let create_only = is_unmanaged(&desired);
        if create_only {
            if let Some(annotations) = desired.metadata.annotations.as_mut() {
                annotations.remove(ANNOTATION_MANAGED);
            }
        } else {
            if self.is_owned(&resource.gvk) {
                set_controller_reference(rr, &mut desired)?;
            }
            strip_aggregated_rules(&mut desired);
        }

        if let Some(cache) = &self.cache {
            if cache.has(&resource, &DeployCache::key(live.as_ref(), &desired)?) {
                metrics::record_deploy_skipped(&rr.controller);
                return Ok(());
            }
        }

        let deployed = if create_only {
            match live {
                Some(existing) => existing,
                None => match rr.client.create(&desired).await {
                    Ok(created) => created,
                    Err(e) if e.api_code() == Some(409) => {
                        rr.client.get(&resource).await?.unwrap_or_else(|| desired.clone())
                    }
                    Err(e) => {
                        return Err(ReconcileError::from(e).context(format!("creating {resource}")))
                    }
                },
            }
        } else {
            rr.client
                .apply(&desired, &rr.controller, true)
                .await
                .map_err(|e| ReconcileError::from(e).context(format!("applying {resource}")))?
        };

        if let Some(cache) = &self.cache {
            cache.add(&resource, DeployCache::key(Some(&deployed), &desired)?);
        }
        metrics::record_deployed(&rr.controller);
        Ok(())
    }
}

/// Ownership and platform metadata stamped on every deployed object
fn stamp(rr: &ReconciliationRequest, obj: &mut DynamicObject) {
    if label(obj, LABEL_PART_OF).is_none() {
        set_label(obj, LABEL_PART_OF, &rr.controller);
    }
    set_annotation(obj, ANNOTATION_INSTANCE_GENERATION, &rr.generation().to_string());
    set_annotation(obj, ANNOTATION_INSTANCE_NAME, rr.name());
    set_annotation(obj, ANNOTATION_INSTANCE_UID, rr.uid());
    set_annotation(obj, ANNOTATION_PLATFORM_TYPE, rr.release.name.as_str());
    set_annotation(obj, ANNOTATION_PLATFORM_VERSION, &rr.release.version);
}

fn set_controller_reference(
    rr: &ReconciliationRequest,
    obj: &mut DynamicObject,
) -> Result<(), ReconcileError> {
    let owner = rr.owner_reference()?;
    let refs = obj.metadata.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.controller != Some(true) && r.uid != owner.uid);
    refs.push(owner);
    Ok(())
}

/// The API server fills `rules` of aggregated ClusterRoles, so applying them
/// would fight the aggregation controller
fn strip_aggregated_rules(obj: &mut DynamicObject) {
    let is_cluster_role = obj.types.as_ref().is_some_and(|t| t.kind == "ClusterRole");
    if !is_cluster_role {
        return;
    }
    if let Value::Object(map) = &mut obj.data {
        if map.contains_key("aggregationRule") {
            map.remove("rules");
        }
    }
}

#[async_trait]
impl Action for DeployAction {
    fn name(&self) -> &str {
        "deploy"
    }

    async fn execute(&self, rr: &mut ReconciliationRequest) -> Result<(), ReconcileError> {
        if let Some(cache) = &self.cache {
            cache.sync();
        }

        let pre: Vec<_> = rr.helm_charts.iter().flat_map(|c| c.pre_apply.clone()).collect();
        for hook in pre {
            hook.execute(rr).await?;
        }

        let rr_ref: &ReconciliationRequest = rr;
        for obj in &rr_ref.resources {
            self.deploy_one(rr_ref, obj).await?;
        }
        info!(
            controller = %rr.controller,
            instance = %rr.name(),
            count = rr.resources.len(),
            "deployed resources"
        );

        let post: Vec<_> = rr.helm_charts.iter().flat_map(|c| c.post_apply.clone()).collect();
        for hook in post {
            hook.execute(rr).await?;
        }
        Ok(())
    }
}
