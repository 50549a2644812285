//! Bundle resolution.
//!
//! The archive format of a plugin bundle is owned by an external collaborator.
//! The dispatcher only needs the manifest, which names the plugin and lists
//! the permissions it requests.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::error::PluginError;
use crate::permission::SbcPermission;

pub const MANIFEST_FILE_NAME: &str = "plugin.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Unique plugin name, used as the registry key
    #[serde(alias = "id")]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default, alias = "sbcExecutable")]
    pub entry_point: Option<String>,
    #[serde(default, alias = "sbcPermissions")]
    pub permissions: Vec<SbcPermission>,
}

impl PluginManifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            author: None,
            entry_point: None,
            permissions: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = SbcPermission>) -> Self {
        self.permissions.extend(permissions);
        self
    }

    fn validate(&self) -> Result<(), BundleError> {
        if self.name.is_empty() {
            return Err(BundleError::InvalidManifest(
                "plugin name cannot be empty".into(),
            ));
        }
        if self.name.contains(['/', '\\']) || self.name == "." || self.name == ".." {
            return Err(BundleError::InvalidManifest(format!(
                "plugin name '{}' is not a valid identifier",
                self.name
            )));
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Bundle path must be absolute: {0}")]
    RelativePath(PathBuf),
    #[error("Unknown bundle: {0}")]
    UnknownBundle(PathBuf),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),
}

impl From<BundleError> for PluginError {
    fn from(err: BundleError) -> Self {
        PluginError::InvalidBundle {
            message: err.to_string(),
        }
    }
}

/// Turns an `InstallPlugin.pluginFile` into a manifest.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BundleResolver: Send + Sync {
    async fn resolve(&self, plugin_file: &Path) -> Result<PluginManifest, BundleError>;
}

/// Reads `plugin.json` from an unpacked bundle directory, or the manifest file
/// itself when the path points to a file.
#[derive(Debug, Clone, Default)]
pub struct ManifestFileResolver;

#[async_trait]
impl BundleResolver for ManifestFileResolver {
    #[tracing::instrument(skip(self), level = "debug")]
    async fn resolve(&self, plugin_file: &Path) -> Result<PluginManifest, BundleError> {
        if !plugin_file.is_absolute() {
            return Err(BundleError::RelativePath(plugin_file.to_path_buf()));
        }

        let manifest_path = if tokio::fs::metadata(plugin_file)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            plugin_file.join(MANIFEST_FILE_NAME)
        } else {
            plugin_file.to_path_buf()
        };

        let raw = tokio::fs::read_to_string(&manifest_path)
            .await
            .map_err(|source| BundleError::Io {
                path: manifest_path.clone(),
                source,
            })?;
        let manifest: PluginManifest =
            serde_json::from_str(&raw).map_err(|source| BundleError::Parse {
                path: manifest_path.clone(),
                source,
            })?;
        manifest.validate()?;
        Ok(manifest)
    }
}

/// Resolver backed by a map of known bundles. Useful for embedding hosts that
/// unpack bundles themselves, and for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBundleResolver {
    bundles: Arc<DashMap<PathBuf, PluginManifest>>,
}

impl InMemoryBundleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, plugin_file: impl Into<PathBuf>, manifest: PluginManifest) {
        self.bundles.insert(plugin_file.into(), manifest);
    }
}

#[async_trait]
impl BundleResolver for InMemoryBundleResolver {
    async fn resolve(&self, plugin_file: &Path) -> Result<PluginManifest, BundleError> {
        let manifest = self
            .bundles
            .get(plugin_file)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BundleError::UnknownBundle(plugin_file.to_path_buf()))?;
        manifest.validate()?;
        Ok(manifest)
    }
}
