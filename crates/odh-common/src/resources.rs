//! Helpers for unstructured Kubernetes objects
//!
//! Rendered manifests travel through the pipeline as `DynamicObject`s. These
//! helpers cover the handful of operations every action needs: identity,
//! labels and annotations, typed conversion, hashing and install ordering.

use std::fmt;

use kube::api::{DynamicObject, GroupVersionKind, TypeMeta};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::{Error, ANNOTATION_MANAGED};

/// Kind of the objects that define new API types
pub const CRD_KIND: &str = "CustomResourceDefinition";

/// Group of CustomResourceDefinition objects
pub const CRD_GROUP: &str = "apiextensions.k8s.io";

// =============================================================================
// Identity
// =============================================================================

/// Identity of an object independent of its API version
///
/// Two objects with the same group, kind, namespace and name are the same
/// object on the cluster even when rendered at different versions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    /// API group ("" for the core group)
    pub group: String,
    /// Kind
    pub kind: String,
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Name
    pub name: String,
}

impl ResourceKey {
    /// Build the key of an unstructured object
    pub fn of(obj: &DynamicObject) -> Result<Self, Error> {
        let gvk = gvk_of(obj)?;
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::validation_for(gvk.kind.clone(), "object has no name"))?;
        Ok(Self {
            group: gvk.group,
            kind: gvk.kind,
            namespace: obj.metadata.namespace.clone(),
            name,
        })
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let group = if self.group.is_empty() { "core" } else { &self.group };
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} {}/{}", group, self.kind, ns, self.name),
            None => write!(f, "{}/{} {}", group, self.kind, self.name),
        }
    }
}

/// Split an apiVersion into group and version
///
/// `apps/v1` gives `("apps", "v1")`, the core `v1` gives `("", "v1")`.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Group, version and kind of an unstructured object
pub fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind, Error> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| Error::validation("object has no apiVersion/kind"))?;
    if types.kind.is_empty() || types.api_version.is_empty() {
        return Err(Error::validation("object has an empty apiVersion or kind"));
    }
    let (group, version) = parse_api_version(&types.api_version);
    Ok(GroupVersionKind::gvk(&group, &version, &types.kind))
}

/// Kind of an unstructured object, empty when unset
pub fn kind_of(obj: &DynamicObject) -> &str {
    obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default()
}

/// apiVersion string for a group and version
pub fn api_version(group: &str, version: &str) -> String {
    if group.is_empty() {
        version.to_string()
    } else {
        format!("{group}/{version}")
    }
}

/// True for CustomResourceDefinition objects
pub fn is_crd(obj: &DynamicObject) -> bool {
    kind_of(obj) == CRD_KIND
}

// =============================================================================
// Conversion
// =============================================================================

/// Build an unstructured object from a JSON value
pub fn from_value(value: Value) -> Result<DynamicObject, Error> {
    serde_json::from_value(value).map_err(|e| Error::serialization(e.to_string()))
}

/// Convert a typed object to its unstructured form, keeping apiVersion/kind
pub fn to_dynamic<K>(obj: &K) -> Result<DynamicObject, Error>
where
    K: kube::Resource<DynamicType = ()> + Serialize,
{
    let mut value = serde_json::to_value(obj)?;
    if let Value::Object(map) = &mut value {
        map.insert("apiVersion".to_string(), K::api_version(&()).into());
        map.insert("kind".to_string(), K::kind(&()).into());
    }
    from_value(value)
}

/// Convert an unstructured object to a typed one
pub fn to_typed<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K, Error> {
    let value = serde_json::to_value(obj)?;
    serde_json::from_value(value).map_err(|e| {
        Error::serialization_for_kind(kind_of(obj).to_string(), e.to_string())
    })
}

/// TypeMeta for a group/version/kind
pub fn type_meta(gvk: &GroupVersionKind) -> TypeMeta {
    TypeMeta {
        api_version: api_version(&gvk.group, &gvk.version),
        kind: gvk.kind.clone(),
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Set a label, creating the label map if needed
pub fn set_label(obj: &mut DynamicObject, key: &str, value: &str) {
    obj.metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
}

/// Remove a label, returning whether it was present
pub fn remove_label(obj: &mut DynamicObject, key: &str) -> bool {
    obj.metadata
        .labels
        .as_mut()
        .map(|labels| labels.remove(key).is_some())
        .unwrap_or(false)
}

/// Set an annotation, creating the annotation map if needed
pub fn set_annotation(obj: &mut DynamicObject, key: &str, value: &str) {
    obj.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
}

/// Read an annotation
pub fn annotation<'a>(obj: &'a DynamicObject, key: &str) -> Option<&'a str> {
    obj.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

/// Read a label
pub fn label<'a>(obj: &'a DynamicObject, key: &str) -> Option<&'a str> {
    obj.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(key))
        .map(String::as_str)
}

/// True when the object opts out of operator management
pub fn is_unmanaged(obj: &DynamicObject) -> bool {
    annotation(obj, ANNOTATION_MANAGED) == Some("false")
}

/// True when the object is being deleted
pub fn is_terminating(obj: &DynamicObject) -> bool {
    obj.metadata.deletion_timestamp.is_some()
}

// =============================================================================
// Ordering
// =============================================================================

/// Stable sort placing type definitions before anything that may use them
///
/// Relative order within each group is preserved.
pub fn sort_install_order(resources: &mut [DynamicObject]) {
    resources.sort_by_key(|r| if is_crd(r) { 0u8 } else { 1u8 });
}

// =============================================================================
// Hashing
// =============================================================================

/// Hex-encoded SHA-256 digest
pub fn sha256_hex(data: &[u8]) -> String {
    use aws_lc_rs::digest::{digest, SHA256};
    let hash = digest(&SHA256, data);
    hash.as_ref()
        .iter()
        .fold(String::with_capacity(64), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Content hash of an object
///
/// serde_json maps are ordered, so equal objects always hash equal.
pub fn hash_object(obj: &DynamicObject) -> Result<String, Error> {
    let bytes = serde_json::to_vec(obj)?;
    Ok(sha256_hex(&bytes))
}
