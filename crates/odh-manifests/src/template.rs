//! Template rendering
//!
//! Templates are YAML streams with minijinja expressions. They see the
//! component instance as `Component`, the DSCInitialization as `DSCI` and
//! the applications namespace as `Namespace`:
//!
//! ```text
//! metadata:
//!   name: {{ Component.metadata.name }}-config
//!   namespace: {{ Namespace }}
//! ```
//!
//! Undefined variables are errors. Template paths may contain `*`, `?` and
//! `[...]` wildcards, expanded in sorted order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::{MatchOptions, Pattern};
use kube::api::DynamicObject;
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::decode::decode_documents;
use crate::error::ManifestError;
use crate::fs::{normalize, FileSystem};
use crate::transform::Transformer;

const WILDCARD_CHARS: [char; 3] = ['*', '?', '['];

/// Data made available to templates
#[derive(Clone, Debug, Default, Serialize)]
pub struct TemplateContext {
    /// The instance being reconciled
    #[serde(rename = "Component")]
    pub component: Value,
    /// The DSCInitialization singleton
    #[serde(rename = "DSCI")]
    pub dsci: Value,
    /// Applications namespace
    #[serde(rename = "Namespace")]
    pub namespace: String,
}

/// Renders templates read from a [`FileSystem`]
pub struct TemplateEngine {
    fs: Arc<dyn FileSystem>,
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Create an engine with strict undefined handling
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { fs, env }
    }

    /// Render every template matching `path` and apply `transformer`
    pub fn render(
        &self,
        path: &str,
        context: &TemplateContext,
        transformer: &Transformer,
    ) -> Result<Vec<DynamicObject>, ManifestError> {
        let files = self.expand(path)?;
        let mut objects = Vec::new();
        for file in files {
            let name = file.display().to_string();
            let source = self.fs.read_to_string(&file)?;
            let rendered = self
                .env
                .render_str(&source, context)
                .map_err(|e| ManifestError::Template {
                    name: name.clone(),
                    message: format!("{e:#}"),
                })?;
            let mut decoded = decode_documents(&name, &rendered)?;
            debug!(template = %name, count = decoded.len(), "rendered template");
            transformer.apply_all(&mut decoded);
            objects.extend(decoded);
        }
        Ok(objects)
    }

    /// Resolve a template path, expanding wildcards
    fn expand(&self, path: &str) -> Result<Vec<PathBuf>, ManifestError> {
        if !path.contains(WILDCARD_CHARS) {
            return Ok(vec![PathBuf::from(path)]);
        }

        let pattern = Pattern::new(path).map_err(|e| ManifestError::Template {
            name: path.to_string(),
            message: format!("invalid pattern: {e}"),
        })?;
        let options = MatchOptions {
            require_literal_separator: true,
            ..MatchOptions::default()
        };

        let root = literal_prefix(Path::new(path));
        let mut matches = Vec::new();
        if self.fs.is_dir(&root) {
            self.walk(&root, &mut |p| {
                if pattern.matches_path_with(p, options) {
                    matches.push(p.to_path_buf());
                }
            })?;
        }

        if matches.is_empty() {
            return Err(ManifestError::Template {
                name: path.to_string(),
                message: "pattern matched no files".to_string(),
            });
        }
        matches.sort();
        Ok(matches)
    }

    fn walk(&self, dir: &Path, visit: &mut dyn FnMut(&Path)) -> Result<(), ManifestError> {
        for entry in self.fs.read_dir(dir)? {
            if self.fs.is_dir(&entry) {
                self.walk(&entry, visit)?;
            } else {
                visit(&entry);
            }
        }
        Ok(())
    }
}

/// Leading path components that contain no wildcard
fn literal_prefix(path: &Path) -> PathBuf {
    let prefix: PathBuf = path
        .components()
        .take_while(|c| !c.as_os_str().to_string_lossy().contains(WILDCARD_CHARS))
        .collect();
    normalize(&prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;
    use odh_common::resources::{annotation, kind_of};
    use serde_json::json;

    const CONFIGMAP: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: {{ Component.metadata.name }}-config
  namespace: {{ Namespace }}
data:
  monitoring: "{{ DSCI.spec.monitoring.managementState }}"
"#;

    const SERVICE: &str = r#"
apiVersion: v1
kind: Service
metadata:
  name: {{ Component.metadata.name }}
"#;

    fn context() -> TemplateContext {
        TemplateContext {
            component: json!({"metadata": {"name": "default-dashboard"}}),
            dsci: json!({"spec": {"monitoring": {"managementState": "Managed"}}}),
            namespace: "opendatahub".to_string(),
        }
    }

    fn engine(fs: MemoryFileSystem) -> TemplateEngine {
        TemplateEngine::new(Arc::new(fs))
    }

    #[test]
    fn renders_context_values() {
        let fs = MemoryFileSystem::new().with_file("/t/dashboard/configmap.tmpl.yaml", CONFIGMAP);
        let objects = engine(fs)
            .render(
                "/t/dashboard/configmap.tmpl.yaml",
                &context(),
                &Transformer::default().with_annotation("platform.opendatahub.io/type", "Open Data Hub"),
            )
            .unwrap();

        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].metadata.name.as_deref(), Some("default-dashboard-config"));
        assert_eq!(objects[0].metadata.namespace.as_deref(), Some("opendatahub"));
        assert_eq!(objects[0].data["data"]["monitoring"], "Managed");
        assert_eq!(
            annotation(&objects[0], "platform.opendatahub.io/type"),
            Some("Open Data Hub")
        );
    }

    #[test]
    fn wildcards_expand_in_sorted_order() {
        let fs = MemoryFileSystem::new()
            .with_file("/t/dashboard/b-service.tmpl.yaml", SERVICE)
            .with_file("/t/dashboard/a-configmap.tmpl.yaml", CONFIGMAP)
            .with_file("/t/dashboard/nested/skip.tmpl.yaml", SERVICE)
            .with_file("/t/dashboard/readme.md", "not yaml");
        let objects = engine(fs)
            .render("/t/dashboard/*.tmpl.yaml", &context(), &Transformer::default())
            .unwrap();

        let kinds: Vec<_> = objects.iter().map(kind_of).collect();
        assert_eq!(kinds, vec!["ConfigMap", "Service"]);
    }

    #[test]
    fn wildcard_without_matches_is_an_error() {
        let fs = MemoryFileSystem::new().with_file("/t/dashboard/configmap.yaml", CONFIGMAP);
        let err = engine(fs)
            .render("/t/dashboard/*.tmpl.yaml", &context(), &Transformer::default())
            .unwrap_err();
        assert!(err.to_string().contains("matched no files"));
    }

    #[test]
    fn undefined_variables_fail() {
        let fs = MemoryFileSystem::new().with_file(
            "/t/broken.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ Component.spec.missing }}\n",
        );
        let err = engine(fs)
            .render("/t/broken.yaml", &context(), &Transformer::default())
            .unwrap_err();
        assert!(matches!(err, ManifestError::Template { .. }));
    }

    #[test]
    fn rendered_documents_are_decoded_strictly() {
        let fs = MemoryFileSystem::new().with_file(
            "/t/no-kind.yaml",
            "apiVersion: v1\nmetadata:\n  name: {{ Namespace }}\n",
        );
        let err = engine(fs)
            .render("/t/no-kind.yaml", &context(), &Transformer::default())
            .unwrap_err();
        assert!(matches!(err, ManifestError::Decode { .. }));
    }

    #[test]
    fn missing_template_is_not_found() {
        let err = engine(MemoryFileSystem::new())
            .render("/t/missing.yaml", &context(), &Transformer::default())
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
