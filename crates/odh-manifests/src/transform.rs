//! Namespace, label and annotation transformers
//!
//! Every render engine runs its output through a [`Transformer`] so that all
//! objects carry the target namespace and the platform labels regardless of
//! what the source manifests declared.

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use odh_common::resources::{kind_of, set_annotation, set_label};
use serde_json::Value;

/// Kinds that are never namespaced
///
/// Manifests are rendered without access to API discovery, so the scope of
/// well-known kinds is fixed here. Unknown kinds are treated as namespaced.
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "APIService",
    "ClusterRole",
    "ClusterRoleBinding",
    "ConsoleLink",
    "ConsoleYAMLSample",
    "CustomResourceDefinition",
    "IngressClass",
    "MutatingWebhookConfiguration",
    "Namespace",
    "PersistentVolume",
    "PriorityClass",
    "RuntimeClass",
    "SecurityContextConstraints",
    "StorageClass",
    "ValidatingAdmissionPolicy",
    "ValidatingAdmissionPolicyBinding",
    "ValidatingWebhookConfiguration",
];

/// True when the kind is known to be cluster-scoped
pub fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// Namespace, labels and annotations to stamp onto rendered objects
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transformer {
    /// Namespace for namespaced objects
    pub namespace: Option<String>,
    /// Labels added to `metadata.labels`
    pub labels: BTreeMap<String, String>,
    /// Annotations added to `metadata.annotations`
    pub annotations: BTreeMap<String, String>,
}

impl Transformer {
    /// Transformer that only sets the namespace
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Merge another transformer on top of this one
    pub fn merged(mut self, other: &Transformer) -> Self {
        if other.namespace.is_some() {
            self.namespace.clone_from(&other.namespace);
        }
        self.labels
            .extend(other.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.annotations
            .extend(other.annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// True when applying the transformer changes nothing
    pub fn is_empty(&self) -> bool {
        self.namespace.is_none() && self.labels.is_empty() && self.annotations.is_empty()
    }

    /// Apply to every object
    pub fn apply_all(&self, objects: &mut [DynamicObject]) {
        for obj in objects {
            self.apply(obj);
        }
    }

    /// Apply to one object
    pub fn apply(&self, obj: &mut DynamicObject) {
        if let Some(ns) = &self.namespace {
            set_namespace(obj, ns);
        }
        for (k, v) in &self.labels {
            set_label(obj, k, v);
        }
        for (k, v) in &self.annotations {
            set_annotation(obj, k, v);
        }
    }
}

/// Move an object into a namespace
///
/// Cluster-scoped kinds are left alone. ServiceAccount subjects of role
/// bindings follow the namespace so the binding keeps pointing at the
/// account rendered next to it.
pub fn set_namespace(obj: &mut DynamicObject, namespace: &str) {
    let kind = kind_of(obj).to_string();
    if !is_cluster_scoped(&kind) {
        obj.metadata.namespace = Some(namespace.to_string());
    }
    if kind == "RoleBinding" || kind == "ClusterRoleBinding" {
        if let Some(Value::Array(subjects)) = obj.data.get_mut("subjects") {
            for subject in subjects.iter_mut() {
                if subject.get("kind").and_then(Value::as_str) == Some("ServiceAccount") {
                    subject["namespace"] = Value::String(namespace.to_string());
                }
            }
        }
    }
}
