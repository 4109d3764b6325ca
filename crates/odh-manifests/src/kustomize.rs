//! Kustomize rendering
//!
//! A native implementation of the subset of kustomize the component
//! manifests use: `resources` (files and nested kustomizations), `namespace`,
//! `namePrefix`/`nameSuffix`, `commonLabels`, `labels[].pairs` and
//! `commonAnnotations`. Patches and generators are not supported and make
//! the render fail rather than silently produce different output.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kube::api::DynamicObject;
use odh_common::resources::{is_crd, kind_of, set_annotation, set_label};
use odh_common::yaml::parse_yaml;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::decode::decode_documents;
use crate::error::ManifestError;
use crate::fs::{normalize, FileSystem};
use crate::transform::{set_namespace, Transformer};

/// File names recognised as a kustomization, in lookup order
pub const KUSTOMIZATION_FILES: [&str; 3] = ["kustomization.yaml", "kustomization.yml", "Kustomization"];

/// Subdirectory used when the given path has no kustomization
pub const DEFAULT_OVERLAY: &str = "default";

/// Fields that require a full kustomize and are rejected
const UNSUPPORTED_FIELDS: [&str; 6] = [
    "patches",
    "patchesStrategicMerge",
    "patchesJson6902",
    "configMapGenerator",
    "secretGenerator",
    "replacements",
];

/// Kinds whose pod template and selector follow `commonLabels`
const WORKLOAD_KINDS: [&str; 4] = ["Deployment", "StatefulSet", "DaemonSet", "ReplicaSet"];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Kustomization {
    #[serde(default)]
    resources: Vec<String>,
    #[serde(default)]
    bases: Vec<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    name_prefix: Option<String>,
    #[serde(default)]
    name_suffix: Option<String>,
    #[serde(default)]
    common_labels: BTreeMap<String, String>,
    #[serde(default)]
    common_annotations: BTreeMap<String, String>,
    #[serde(default)]
    labels: Vec<LabelSet>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelSet {
    #[serde(default)]
    pairs: BTreeMap<String, String>,
    #[serde(default)]
    include_selectors: bool,
}

/// Renders kustomization directories from a [`FileSystem`]
#[derive(Clone)]
pub struct KustomizeEngine {
    fs: Arc<dyn FileSystem>,
}

impl KustomizeEngine {
    /// Create an engine reading from `fs`
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Render the kustomization at `path` and apply `transformer` to the output
    ///
    /// When `path` has no kustomization file the `default` subdirectory is
    /// used instead.
    pub fn render(
        &self,
        path: &Path,
        transformer: &Transformer,
    ) -> Result<Vec<DynamicObject>, ManifestError> {
        let root = self.resolve_root(path)?;
        debug!(path = %root.display(), "rendering kustomization");

        let mut visiting = HashSet::new();
        let mut objects = self.build(&root, &mut visiting)?;
        transformer.apply_all(&mut objects);
        Ok(objects)
    }

    fn find_kustomization(&self, dir: &Path) -> Option<PathBuf> {
        KUSTOMIZATION_FILES
            .iter()
            .map(|f| dir.join(f))
            .find(|p| self.fs.is_file(p))
    }

    fn resolve_root(&self, path: &Path) -> Result<PathBuf, ManifestError> {
        let path = normalize(path);
        if self.find_kustomization(&path).is_some() {
            return Ok(path);
        }
        let fallback = path.join(DEFAULT_OVERLAY);
        if self.find_kustomization(&fallback).is_some() {
            return Ok(fallback);
        }
        Err(ManifestError::Kustomize {
            path,
            message: format!("no kustomization file found here or in {DEFAULT_OVERLAY}/"),
        })
    }

    fn build(
        &self,
        dir: &Path,
        visiting: &mut HashSet<PathBuf>,
    ) -> Result<Vec<DynamicObject>, ManifestError> {
        let dir = normalize(dir);
        if !visiting.insert(dir.clone()) {
            return Err(ManifestError::Kustomize {
                path: dir,
                message: "kustomization cycle detected".to_string(),
            });
        }

        let file = self
            .find_kustomization(&dir)
            .ok_or_else(|| ManifestError::Kustomize {
                path: dir.clone(),
                message: "resource directory has no kustomization file".to_string(),
            })?;
        let kustomization = self.load(&file)?;

        let mut objects = Vec::new();
        for entry in kustomization.resources.iter().chain(&kustomization.bases) {
            let target = normalize(&dir.join(entry));
            if self.fs.is_dir(&target) {
                objects.extend(self.build(&target, visiting)?);
            } else {
                let text = self.fs.read_to_string(&target)?;
                objects.extend(decode_documents(&target.display().to_string(), &text)?);
            }
        }

        apply_kustomization(&kustomization, &mut objects);
        visiting.remove(&dir);
        Ok(objects)
    }

    fn load(&self, file: &Path) -> Result<Kustomization, ManifestError> {
        let text = self.fs.read_to_string(file)?;
        let value = parse_yaml(&text).map_err(|e| ManifestError::Parse {
            path: file.to_path_buf(),
            message: e.to_string(),
        })?;
        if value.is_null() {
            return Ok(Kustomization::default());
        }
        if let Some(field) = UNSUPPORTED_FIELDS.iter().find(|f| value.get(**f).is_some()) {
            return Err(ManifestError::Kustomize {
                path: file.to_path_buf(),
                message: format!("unsupported field: {field}"),
            });
        }
        serde_json::from_value(value).map_err(|e| ManifestError::Parse {
            path: file.to_path_buf(),
            message: e.to_string(),
        })
    }
}

fn apply_kustomization(k: &Kustomization, objects: &mut [DynamicObject]) {
    for obj in objects.iter_mut() {
        if !is_crd(obj) {
            if let Some(name) = obj.metadata.name.take() {
                let prefix = k.name_prefix.as_deref().unwrap_or_default();
                let suffix = k.name_suffix.as_deref().unwrap_or_default();
                obj.metadata.name = Some(format!("{prefix}{name}{suffix}"));
            }
        }
        if let Some(ns) = &k.namespace {
            set_namespace(obj, ns);
        }
        for (key, value) in &k.common_labels {
            set_label(obj, key, value);
            set_selector_label(obj, key, value);
        }
        for set in &k.labels {
            for (key, value) in &set.pairs {
                set_label(obj, key, value);
                if set.include_selectors {
                    set_selector_label(obj, key, value);
                }
            }
        }
        for (key, value) in &k.common_annotations {
            set_annotation(obj, key, value);
        }
    }
}

/// Propagate a label to the selector and pod template of workloads and services
fn set_selector_label(obj: &mut DynamicObject, key: &str, value: &str) {
    let kind = kind_of(obj).to_string();
    let value = Value::String(value.to_string());
    if WORKLOAD_KINDS.contains(&kind.as_str()) {
        if let Some(spec) = obj.data.get_mut("spec").and_then(Value::as_object_mut) {
            let selector = spec
                .entry("selector")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Some(selector) = selector.as_object_mut() {
                let match_labels = selector
                    .entry("matchLabels")
                    .or_insert_with(|| Value::Object(Default::default()));
                match_labels[key] = value.clone();
            }
            if let Some(template) = spec.get_mut("template").and_then(Value::as_object_mut) {
                let metadata = template
                    .entry("metadata")
                    .or_insert_with(|| Value::Object(Default::default()));
                if let Some(metadata) = metadata.as_object_mut() {
                    let labels = metadata
                        .entry("labels")
                        .or_insert_with(|| Value::Object(Default::default()));
                    labels[key] = value;
                }
            }
        }
    } else if kind == "Service" {
        if let Some(spec) = obj.data.get_mut("spec").and_then(Value::as_object_mut) {
            let selector = spec
                .entry("selector")
                .or_insert_with(|| Value::Object(Default::default()));
            selector[key] = value;
        }
    }
}
