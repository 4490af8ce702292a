//! Static asset access for `get-manifest` and `get-component`.
//!
//! Reads go through an [`AssetSource`] so the hub never touches the
//! filesystem directly. [`AssetCache`] memoizes successful reads for the life
//! of the hub; the cache only grows and is never invalidated. Failed reads are
//! not cached, so a component that appears later can still be served.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;

use crate::error::HubError;

/// Read-only access to assets by relative path.
pub trait AssetSource: fmt::Debug + Send {
    /// Read the asset at `path` as UTF-8 text.
    fn read(&self, path: &Path) -> io::Result<String>;
}

/// Assets under a directory on disk.
#[derive(Debug, Clone)]
pub struct FsAssets {
    root: PathBuf,
}

impl FsAssets {
    /// Serve assets relative to `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetSource for FsAssets {
    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(self.root.join(path))
    }
}

/// Memoizing front for an [`AssetSource`].
#[derive(Debug)]
pub struct AssetCache {
    source: Box<dyn AssetSource>,
    manifest_file: PathBuf,
    components_dir: PathBuf,
    manifest: Option<Value>,
    components: HashMap<String, String>,
}

impl AssetCache {
    /// Create a cache over `source`.
    pub fn new(
        source: Box<dyn AssetSource>,
        manifest_file: impl Into<PathBuf>,
        components_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            manifest_file: manifest_file.into(),
            components_dir: components_dir.into(),
            manifest: None,
            components: HashMap::new(),
        }
    }

    /// The parsed build manifest.
    pub fn manifest(&mut self) -> Result<Value, HubError> {
        if let Some(manifest) = &self.manifest {
            return Ok(manifest.clone());
        }

        let path = self.manifest_file.display().to_string();
        let raw = self
            .source
            .read(&self.manifest_file)
            .map_err(|e| HubError::MissingAsset {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        let manifest: Value = serde_json::from_str(&raw).map_err(|e| HubError::InvalidManifest {
            path,
            reason: e.to_string(),
        })?;

        self.manifest = Some(manifest.clone());
        Ok(manifest)
    }

    /// Contents of the component `name`, read at most once.
    pub fn component(&mut self, name: &str) -> Result<String, HubError> {
        if let Some(contents) = self.components.get(name) {
            return Ok(contents.clone());
        }

        let relative = component_path(name)?;
        let path = self.components_dir.join(&relative);
        let contents = self.source.read(&path).map_err(|e| HubError::MissingAsset {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        log::debug!("[Hub] Cached component {}", name);
        self.components.insert(name.to_string(), contents.clone());
        Ok(contents)
    }

    /// Number of cached components.
    pub fn cached_components(&self) -> usize {
        self.components.len()
    }
}

/// Resolve a component name to a path that stays inside the components dir.
fn component_path(name: &str) -> Result<PathBuf, HubError> {
    let path = Path::new(name);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if name.trim().is_empty() || escapes {
        return Err(HubError::UnknownComponent(name.to_string()));
    }
    Ok(path.to_path_buf())
}
