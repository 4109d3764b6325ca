//! Manifest rendering for the ODH operator
//!
//! Turns manifest sources (kustomizations, helm charts, templates) into
//! unstructured objects ready to deploy, and rewrites `params.env` files
//! ahead of rendering. Nothing here talks to the cluster.

#![deny(missing_docs)]

/// Strict decoding of YAML into unstructured objects
pub mod decode;
/// Error type shared by the engines
pub mod error;
/// Filesystem abstraction (disk and in-memory)
pub mod fs;
/// Helm chart rendering
pub mod helm;
/// Native kustomize subset
pub mod kustomize;
/// `params.env` rewriting
pub mod params;
/// minijinja templates
pub mod template;
/// Namespace, label and annotation transformers
pub mod transform;

pub use error::ManifestError;
pub use fs::{DiskFileSystem, FileSystem, MemoryFileSystem};
pub use helm::{ChartSource, HelmBackend, HelmCli, HelmRenderer};
pub use kustomize::KustomizeEngine;
pub use params::ParamsApplier;
pub use template::{TemplateContext, TemplateEngine};
pub use transform::Transformer;
