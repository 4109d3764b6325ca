//! Errors raised while reading or rendering manifests

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Error from a render engine, the filesystem or the params applier
#[derive(Debug, Error)]
pub enum ManifestError {
    /// File or directory does not exist
    #[error("not found: {}", path.display())]
    NotFound {
        /// Path that was looked up
        path: PathBuf,
    },

    /// Underlying I/O failure
    #[error("i/o error on {}: {message}", path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// YAML/JSON could not be parsed
    #[error("failed to parse {}: {message}", path.display())]
    Parse {
        /// File being parsed
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// A rendered document is not a valid Kubernetes object
    #[error("invalid object in {source_name}: {message}")]
    Decode {
        /// Template, chart or file the document came from
        source_name: String,
        /// What is wrong with the document
        message: String,
    },

    /// Kustomization could not be resolved
    #[error("kustomize error in {}: {message}", path.display())]
    Kustomize {
        /// Kustomization directory
        path: PathBuf,
        /// What failed
        message: String,
    },

    /// Template could not be loaded or executed
    #[error("template error in {name}: {message}")]
    Template {
        /// Template path or pattern
        name: String,
        /// minijinja message
        message: String,
    },

    /// Helm failed to render a chart
    #[error("helm error for chart {chart}: {message}")]
    Helm {
        /// Chart reference
        chart: String,
        /// What failed
        message: String,
    },
}

impl ManifestError {
    /// Map an I/O error, turning `NotFound` into [`ManifestError::NotFound`]
    pub fn io(path: &Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            Self::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            }
        }
    }

    /// Create a decode error
    pub fn decode(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// True when the error is a missing file
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
