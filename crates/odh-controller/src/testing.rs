//! In-memory [`ClusterClient`] for pipeline tests
//!
//! Models just enough of the API server for actions to be tested end to
//! end: object identity, resource versions, label selectors, finalizers and
//! deletion timestamps. Every write is counted so tests can assert that an
//! idempotent reconcile issued none.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{DynamicObject, GroupVersionKind};
use parking_lot::Mutex;
use serde_json::Value;

use odh_common::resources::{gvk_of, ResourceKey};
use odh_common::Error;
use odh_manifests::transform::is_cluster_scoped;

use crate::client::{ClusterClient, ResourceRef};

/// Kinds of the platform CRDs, all cluster-scoped
const PLATFORM_KINDS: [&str; 3] = ["Component", "DataScienceCluster", "DSCInitialization"];

/// Number of write calls received, by kind of write
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteCounts {
    /// `create` calls
    pub creates: usize,
    /// `apply` calls
    pub applies: usize,
    /// Objects deleted or marked for deletion
    pub deletes: usize,
    /// `update_status` calls
    pub status_updates: usize,
    /// Finalizer patches that changed something
    pub finalizer_patches: usize,
    /// Label removals that changed something
    pub label_patches: usize,
}

impl WriteCounts {
    /// Sum of every write
    pub fn total(&self) -> usize {
        self.creates
            + self.applies
            + self.deletes
            + self.status_updates
            + self.finalizer_patches
            + self.label_patches
    }
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ResourceKey, DynamicObject>,
    versions: BTreeMap<ResourceKey, String>,
    next_version: u64,
    next_uid: u64,
    deletable: Option<Vec<GroupVersionKind>>,
    status_failures: Vec<u16>,
    writes: WriteCounts,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// In-memory [`ClusterClient`]
#[derive(Default)]
pub struct FakeClusterClient {
    state: Mutex<State>,
}

fn is_namespaced_kind(kind: &str) -> bool {
    !is_cluster_scoped(kind) && !PLATFORM_KINDS.contains(&kind)
}

fn key_of(gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> ResourceKey {
    ResourceKey {
        group: gvk.group.clone(),
        kind: gvk.kind.clone(),
        namespace: namespace
            .filter(|_| is_namespaced_kind(&gvk.kind))
            .map(str::to_string),
        name: name.to_string(),
    }
}

fn key_of_ref(r: &ResourceRef) -> ResourceKey {
    key_of(&r.gvk, r.namespace.as_deref(), &r.name)
}

fn key_of_obj(obj: &DynamicObject) -> Result<ResourceKey, Error> {
    Ok(key_of_ref(&ResourceRef::of(obj)?))
}

/// Evaluate a comma separated selector of `k=v`, `k!=v`, `k` and `!k` terms
pub fn matches_selector(obj: &DynamicObject, selector: &str) -> bool {
    let empty = BTreeMap::new();
    let labels = obj.metadata.labels.as_ref().unwrap_or(&empty);
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                labels.get(k.trim()).map(String::as_str) != Some(v.trim())
            } else if let Some((k, v)) = term.split_once('=') {
                let v = v.trim_start_matches('=');
                labels.get(k.trim()).map(String::as_str) == Some(v.trim())
            } else if let Some(k) = term.strip_prefix('!') {
                !labels.contains_key(k)
            } else {
                labels.contains_key(term)
            }
        })
}

/// Desired-state view used to decide whether an apply changed anything
fn content(obj: &DynamicObject) -> Value {
    let mut data = obj.data.clone();
    if let Value::Object(map) = &mut data {
        map.remove("status");
    }
    serde_json::json!({
        "labels": obj.metadata.labels,
        "annotations": obj.metadata.annotations,
        "ownerReferences": obj.metadata.owner_references,
        "data": data,
    })
}

impl FakeClusterClient {
    /// Empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`FakeClusterClient::insert`]
    pub fn with_object(self, obj: DynamicObject) -> Self {
        self.insert(obj);
        self
    }

    /// Store an object as-is, assigning uid, resourceVersion and generation
    ///
    /// Does not count as a write.
    pub fn insert(&self, mut obj: DynamicObject) {
        let Ok(key) = key_of_obj(&obj) else {
            return;
        };
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if obj.metadata.uid.is_none() {
            state.next_uid += 1;
            obj.metadata.uid = Some(format!("uid-{}", state.next_uid));
        }
        obj.metadata.generation.get_or_insert(1);
        let rv = state.bump();
        obj.metadata.resource_version = Some(rv.clone());
        state.versions.insert(key.clone(), rv);
        state.objects.insert(key, obj);
    }

    /// Current copy of an object
    pub fn object(&self, r: &ResourceRef) -> Option<DynamicObject> {
        self.state.lock().objects.get(&key_of_ref(r)).cloned()
    }

    /// Every stored object of a kind, ordered by namespace and name
    pub fn objects_of_kind(&self, kind: &str) -> Vec<DynamicObject> {
        self.state
            .lock()
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .map(|(_, o)| o.clone())
            .collect()
    }

    /// Names of every stored object of a kind
    pub fn names_of_kind(&self, kind: &str) -> Vec<String> {
        self.objects_of_kind(kind)
            .into_iter()
            .filter_map(|o| o.metadata.name)
            .collect()
    }

    /// Write counters since creation or the last reset
    pub fn writes(&self) -> WriteCounts {
        self.state.lock().writes
    }

    /// Zero the write counters
    pub fn reset_writes(&self) {
        self.state.lock().writes = WriteCounts::default();
    }

    /// Set the deletion timestamp of an object, as if a user deleted it while
    /// a finalizer held it
    pub fn mark_deleting(&self, r: &ResourceRef) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let key = key_of_ref(r);
        let rv = state.bump();
        if let Some(obj) = state.objects.get_mut(&key) {
            obj.metadata.deletion_timestamp = Some(Time(Utc::now()));
            obj.metadata.resource_version = Some(rv.clone());
            state.versions.insert(key, rv);
        }
    }

    /// Change an object behind the controller's back (bumps resourceVersion)
    pub fn modify(&self, r: &ResourceRef, f: impl FnOnce(&mut DynamicObject)) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let key = key_of_ref(r);
        let rv = state.bump();
        if let Some(obj) = state.objects.get_mut(&key) {
            f(obj);
            obj.metadata.resource_version = Some(rv.clone());
            state.versions.insert(key, rv);
        }
    }

    /// Fix the list returned by `deletable_types`
    ///
    /// By default every type with at least one stored object is deletable.
    pub fn with_deletable_types(self, types: Vec<GroupVersionKind>) -> Self {
        self.state.lock().deletable = Some(types);
        self
    }

    /// Make the next status updates fail with the given HTTP codes, in order
    pub fn fail_status_updates(&self, codes: &[u16]) {
        self.state.lock().status_failures = codes.to_vec();
    }

    fn remove_or_mark(state: &mut State, key: &ResourceKey) {
        let has_finalizers = state
            .objects
            .get(key)
            .and_then(|o| o.metadata.finalizers.as_ref())
            .is_some_and(|f| !f.is_empty());
        if has_finalizers {
            if let Some(obj) = state.objects.get_mut(key) {
                if obj.metadata.deletion_timestamp.is_none() {
                    obj.metadata.deletion_timestamp = Some(Time(Utc::now()));
                }
            }
        } else {
            state.objects.remove(key);
            state.versions.remove(key);
        }
        state.writes.deletes += 1;
    }

    fn patch_finalizers(
        &self,
        r: &ResourceRef,
        update: impl FnOnce(&mut Vec<String>) -> bool,
    ) -> Result<(), Error> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let key = key_of_ref(r);
        let Some(obj) = state.objects.get_mut(&key) else {
            return Ok(());
        };
        let mut finalizers = obj.metadata.finalizers.clone().unwrap_or_default();
        if !update(&mut finalizers) {
            return Ok(());
        }
        let release = finalizers.is_empty() && obj.metadata.deletion_timestamp.is_some();
        obj.metadata.finalizers = Some(finalizers);
        state.writes.finalizer_patches += 1;
        if release {
            state.objects.remove(&key);
            state.versions.remove(&key);
        } else {
            let rv = state.bump();
            if let Some(obj) = state.objects.get_mut(&key) {
                obj.metadata.resource_version = Some(rv.clone());
            }
            state.versions.insert(key, rv);
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn get(&self, r: &ResourceRef) -> Result<Option<DynamicObject>, Error> {
        Ok(self.object(r))
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<String>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, Error> {
        let state = self.state.lock();
        Ok(state
            .objects
            .iter()
            .filter(|(k, _)| k.group == gvk.group && k.kind == gvk.kind)
            .filter(|(k, _)| namespace.is_none() || k.namespace.is_none() || k.namespace == namespace)
            .filter(|(_, o)| matches_selector(o, label_selector))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, Error> {
        let key = key_of_obj(obj)?;
        if self.state.lock().objects.contains_key(&key) {
            return Err(Error::api(409, "AlreadyExists", format!("{key} already exists")));
        }
        self.insert(obj.clone());
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.writes.creates += 1;
        state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::internal("object vanished after create"))
    }

    async fn apply(
        &self,
        obj: &DynamicObject,
        _field_manager: &str,
        _force: bool,
    ) -> Result<DynamicObject, Error> {
        let key = key_of_obj(obj)?;
        gvk_of(obj)?;
        let existing = self.state.lock().objects.get(&key).cloned();
        let Some(current) = existing else {
            self.insert(obj.clone());
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.writes.applies += 1;
            return state
                .objects
                .get(&key)
                .cloned()
                .ok_or_else(|| Error::internal("object vanished after apply"));
        };

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.writes.applies += 1;
        if content(&current) == content(obj) {
            return Ok(current);
        }

        let mut updated = obj.clone();
        updated.metadata.uid = current.metadata.uid.clone();
        updated.metadata.finalizers = current.metadata.finalizers.clone();
        updated.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
        updated.metadata.generation = current.metadata.generation.map(|g| g + 1);
        if let Some(status) = current.data.get("status") {
            updated.data["status"] = status.clone();
        }
        let rv = state.bump();
        updated.metadata.resource_version = Some(rv.clone());
        state.versions.insert(key.clone(), rv);
        state.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, r: &ResourceRef) -> Result<(), Error> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let key = key_of_ref(r);
        if state.objects.contains_key(&key) {
            Self::remove_or_mark(state, &key);
        }
        Ok(())
    }

    async fn delete_all_of(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<String>,
        label_selector: &str,
    ) -> Result<(), Error> {
        let matching = self.list(gvk, namespace, label_selector).await?;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for obj in matching {
            let key = key_of_obj(&obj)?;
            Self::remove_or_mark(state, &key);
        }
        Ok(())
    }

    async fn update_status(&self, obj: &DynamicObject) -> Result<DynamicObject, Error> {
        let key = key_of_obj(obj)?;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.status_failures.is_empty() {
            let code = state.status_failures.remove(0);
            return Err(Error::api(code, "Injected", format!("injected {code} for {key}")));
        }
        let current_rv = state
            .versions
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{key} not found")))?;
        if let Some(rv) = &obj.metadata.resource_version {
            if rv != &current_rv {
                return Err(Error::conflict(format!("{key} was modified")));
            }
        }
        let rv = state.bump();
        state.writes.status_updates += 1;
        state.versions.insert(key.clone(), rv.clone());
        let stored = state
            .objects
            .get_mut(&key)
            .ok_or_else(|| Error::not_found(format!("{key} not found")))?;
        match obj.data.get("status") {
            Some(status) => stored.data["status"] = status.clone(),
            None => {
                if let Value::Object(map) = &mut stored.data {
                    map.remove("status");
                }
            }
        }
        stored.metadata.resource_version = Some(rv);
        Ok(stored.clone())
    }

    async fn add_finalizer(&self, r: &ResourceRef, finalizer: &str) -> Result<(), Error> {
        self.patch_finalizers(r, |finalizers| {
            if finalizers.iter().any(|f| f == finalizer) {
                return false;
            }
            finalizers.push(finalizer.to_string());
            true
        })
    }

    async fn remove_finalizer(&self, r: &ResourceRef, finalizer: &str) -> Result<(), Error> {
        self.patch_finalizers(r, |finalizers| {
            let before = finalizers.len();
            finalizers.retain(|f| f != finalizer);
            finalizers.len() != before
        })
    }

    async fn remove_label(&self, r: &ResourceRef, key: &str) -> Result<(), Error> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let obj_key = key_of_ref(r);
        let removed = state
            .objects
            .get_mut(&obj_key)
            .and_then(|o| o.metadata.labels.as_mut())
            .is_some_and(|labels| labels.remove(key).is_some());
        if removed {
            state.writes.label_patches += 1;
            let rv = state.bump();
            if let Some(obj) = state.objects.get_mut(&obj_key) {
                obj.metadata.resource_version = Some(rv.clone());
            }
            state.versions.insert(obj_key, rv);
        }
        Ok(())
    }

    async fn is_namespaced(&self, gvk: &GroupVersionKind) -> Result<bool, Error> {
        Ok(is_namespaced_kind(&gvk.kind))
    }

    async fn deletable_types(&self) -> Result<Vec<GroupVersionKind>, Error> {
        let state = self.state.lock();
        if let Some(types) = &state.deletable {
            return Ok(types.clone());
        }
        let mut seen = BTreeSet::new();
        let mut types = Vec::new();
        for obj in state.objects.values() {
            let gvk = gvk_of(obj)?;
            if seen.insert((gvk.group.clone(), gvk.kind.clone())) {
                types.push(gvk);
            }
        }
        Ok(types)
    }
}
