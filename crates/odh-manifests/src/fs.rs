//! Filesystem abstraction used by the render engines and the params applier
//!
//! Production code reads the manifests tree from disk. Tests use
//! [`MemoryFileSystem`] so kustomizations and templates can be declared inline.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use parking_lot::RwLock;

use crate::error::ManifestError;

/// Minimal filesystem surface the manifest code needs
pub trait FileSystem: Send + Sync {
    /// Read a whole file as UTF-8
    fn read_to_string(&self, path: &Path) -> Result<String, ManifestError>;

    /// Write a whole file, replacing any existing content
    fn write(&self, path: &Path, contents: &str) -> Result<(), ManifestError>;

    /// Atomically replace `to` with `from`
    fn rename(&self, from: &Path, to: &Path) -> Result<(), ManifestError>;

    /// Remove a file
    fn remove_file(&self, path: &Path) -> Result<(), ManifestError>;

    /// True when the path exists and is a regular file
    fn is_file(&self, path: &Path) -> bool;

    /// True when the path exists and is a directory
    fn is_dir(&self, path: &Path) -> bool;

    /// Direct children of a directory, sorted
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>, ManifestError>;
}

/// Lexically normalize a path (`a/./b/../c` -> `a/c`) without touching disk
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// =============================================================================
// Disk
// =============================================================================

/// [`FileSystem`] backed by the real filesystem
#[derive(Clone, Debug, Default)]
pub struct DiskFileSystem;

impl FileSystem for DiskFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, ManifestError> {
        std::fs::read_to_string(path).map_err(|e| ManifestError::io(path, e))
    }

    fn write(&self, path: &Path, contents: &str) -> Result<(), ManifestError> {
        std::fs::write(path, contents).map_err(|e| ManifestError::io(path, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), ManifestError> {
        std::fs::rename(from, to).map_err(|e| ManifestError::io(to, e))
    }

    fn remove_file(&self, path: &Path) -> Result<(), ManifestError> {
        std::fs::remove_file(path).map_err(|e| ManifestError::io(path, e))
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>, ManifestError> {
        let mut entries = std::fs::read_dir(path)
            .map_err(|e| ManifestError::io(path, e))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ManifestError::io(path, e))?;
        entries.sort();
        Ok(entries)
    }
}

// =============================================================================
// Memory
// =============================================================================

/// In-memory [`FileSystem`]
///
/// Directories exist implicitly as prefixes of stored files.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: RwLock<BTreeMap<PathBuf, String>>,
}

impl MemoryFileSystem {
    /// Create an empty filesystem
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style file insertion
    pub fn with_file(self, path: impl AsRef<Path>, contents: impl Into<String>) -> Self {
        self.files
            .write()
            .insert(normalize(path.as_ref()), contents.into());
        self
    }

    /// Paths of every stored file
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.read().keys().cloned().collect()
    }
}

impl FileSystem for MemoryFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, ManifestError> {
        self.files
            .read()
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| ManifestError::NotFound {
                path: path.to_path_buf(),
            })
    }

    fn write(&self, path: &Path, contents: &str) -> Result<(), ManifestError> {
        self.files
            .write()
            .insert(normalize(path), contents.to_string());
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), ManifestError> {
        let mut files = self.files.write();
        let contents = files
            .remove(&normalize(from))
            .ok_or_else(|| ManifestError::NotFound {
                path: from.to_path_buf(),
            })?;
        files.insert(normalize(to), contents);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), ManifestError> {
        self.files
            .write()
            .remove(&normalize(path))
            .map(|_| ())
            .ok_or_else(|| ManifestError::NotFound {
                path: path.to_path_buf(),
            })
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files.read().contains_key(&normalize(path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        let dir = normalize(path);
        self.files
            .read()
            .keys()
            .any(|p| p != &dir && p.starts_with(&dir))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>, ManifestError> {
        let dir = normalize(path);
        let mut children: Vec<PathBuf> = self
            .files
            .read()
            .keys()
            .filter_map(|p| {
                let rest = p.strip_prefix(&dir).ok()?;
                let first = rest.components().next()?;
                Some(dir.join(first.as_os_str()))
            })
            .collect();
        if children.is_empty() && !self.is_dir(&dir) {
            return Err(ManifestError::NotFound { path: dir });
        }
        children.sort();
        children.dedup();
        Ok(children)
    }
}
