//! `params.env` rewriting
//!
//! Component manifests read image references and a few deployment settings
//! from a `params.env` file next to their kustomization. Before rendering, the
//! operator rewrites that file with the images resolved from its own
//! environment (the `RELATED_IMAGE_*` variables) and with per-component extra
//! values.
//!
//! For keys in the image map a non-empty environment variable replaces the
//! value in the file. Extra params are applied afterwards and win over both.
//! Environment variables never add keys the file does not already have.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use crate::error::ManifestError;
use crate::fs::{DiskFileSystem, FileSystem};

/// Default parameter file name
pub const PARAMS_FILE: &str = "params.env";

type EnvGetter = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Rewrites `params.env` files on a [`FileSystem`]
pub struct ParamsApplier {
    fs: Arc<dyn FileSystem>,
    get_env: EnvGetter,
}

impl Default for ParamsApplier {
    fn default() -> Self {
        Self::new(Arc::new(DiskFileSystem))
    }
}

impl ParamsApplier {
    /// Applier reading the process environment
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            get_env: Box::new(|key| std::env::var(key).ok()),
        }
    }

    /// Replace the environment lookup
    pub fn with_env(mut self, get_env: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.get_env = Box::new(get_env);
        self
    }

    /// Apply image overrides and extra params to `<component_path>/<file>`
    ///
    /// `image_params` maps a key of the file to the environment variable that
    /// overrides it. A missing file is not an error and leaves nothing
    /// behind. The file is only rewritten when a value changed.
    pub fn apply_params(
        &self,
        component_path: &Path,
        file: &str,
        image_params: &BTreeMap<String, String>,
        extra_params: &[BTreeMap<String, String>],
    ) -> Result<(), ManifestError> {
        let params_file = component_path.join(file);
        let mut params = match self.fs.read_to_string(&params_file) {
            Ok(text) => parse_params(&text),
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut updated = false;
        let keys: Vec<String> = params.keys().cloned().collect();
        for key in keys {
            let Some(env_var) = image_params.get(&key) else {
                continue;
            };
            match (self.get_env)(env_var) {
                Some(value) if !value.is_empty() => {
                    updated |= update(&mut params, &key, &value);
                }
                _ => {}
            }
        }

        for extra in extra_params {
            for (key, value) in extra {
                updated |= update(&mut params, key, value);
            }
        }

        if !updated {
            return Ok(());
        }

        let tmp = self.write_tmp(&params, component_path)?;
        if let Err(e) = self.fs.rename(&tmp, &params_file) {
            let _ = self.fs.remove_file(&tmp);
            return Err(e);
        }
        debug!(file = %params_file.display(), "updated params");
        Ok(())
    }

    /// Apply params to `overlays/<overlay>/params.env`, falling back to `base/params.env`
    ///
    /// Returns the file that was used. Neither file existing is an error.
    pub fn apply_params_with_fallback(
        &self,
        component_path: &Path,
        overlay: &str,
        image_params: &BTreeMap<String, String>,
        extra_params: &[BTreeMap<String, String>],
    ) -> Result<PathBuf, ManifestError> {
        let overlay_path = component_path.join("overlays").join(overlay);
        let base_path = component_path.join("base");

        for dir in [overlay_path, base_path] {
            let candidate = dir.join(PARAMS_FILE);
            if self.fs.is_file(&candidate) {
                self.apply_params(&dir, PARAMS_FILE, image_params, extra_params)?;
                return Ok(candidate);
            }
        }

        Err(ManifestError::NotFound {
            path: component_path.join("overlays").join(overlay).join(PARAMS_FILE),
        })
    }

    fn write_tmp(
        &self,
        params: &BTreeMap<String, String>,
        dir: &Path,
    ) -> Result<PathBuf, ManifestError> {
        let suffix: u32 = rand::thread_rng().gen();
        let tmp = dir.join(format!("{PARAMS_FILE}-{suffix:08x}"));
        self.fs.write(&tmp, &render_params(params))?;
        Ok(tmp)
    }
}

/// Parse `key=value` lines; lines without `=` are dropped
pub fn parse_params(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn render_params(params: &BTreeMap<String, String>) -> String {
    params.iter().map(|(k, v)| format!("{k}={v}\n")).collect()
}

fn update(params: &mut BTreeMap<String, String>, key: &str, value: &str) -> bool {
    if params.get(key).map(String::as_str) == Some(value) {
        return false;
    }
    params.insert(key.to_string(), value.to_string());
    true
}
