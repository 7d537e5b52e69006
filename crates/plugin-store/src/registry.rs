//! In-memory index of installed plugins.
//!
//! The registry is derived from disk: [`Registry::load`] walks
//! `root/plugins` and reads every `plugin.json`. Directories with corrupt
//! metadata, or whose metadata id differs from the directory name, are
//! skipped with a warning.

use crate::error::Result;
use crate::layout::PluginFs;
use crate::types::PluginFilter;
use plugin_core::{PluginId, PluginMeta};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Current registry snapshot schema version.
pub const REGISTRY_SCHEMA_VERSION: &str = "1";

/// Serializable snapshot of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySchema {
    /// Schema version.
    pub version: String,
    /// Registered plugins in insertion order.
    pub plugins: Vec<PluginMeta>,
}

/// Ordered collection of [`PluginMeta`] records with unique ids.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    plugins: Vec<PluginMeta>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from the plugin directories under `fs`.
    ///
    /// # Errors
    ///
    /// Returns an error only if `root/plugins` itself cannot be listed.
    pub async fn load(fs: &PluginFs) -> Result<Self> {
        let mut registry = Self::new();

        for name in fs.plugin_dir_names().await? {
            let dir = fs.plugins_dir().join(&name);

            let doc = match fs.read_metadata(&dir).await {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("Skipping plugin directory {}: {}", dir.display(), e);
                    continue;
                }
            };

            if doc.id.as_str() != name {
                warn!(
                    "Skipping plugin directory {}: metadata id '{}' does not match directory name",
                    dir.display(),
                    doc.id
                );
                continue;
            }

            registry.upsert(PluginMeta::from_document(doc, dir));
        }

        debug!("Loaded {} plugins from {}", registry.len(), fs.root().display());
        Ok(registry)
    }

    /// Restores a registry from a snapshot.
    ///
    /// A snapshot of another schema version is discarded and the registry
    /// is rebuilt from disk instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the fallback rebuild fails.
    pub async fn from_snapshot(schema: RegistrySchema, fs: &PluginFs) -> Result<Self> {
        if schema.version != REGISTRY_SCHEMA_VERSION {
            warn!(
                "Registry snapshot version {} is not {}, rebuilding from disk",
                schema.version, REGISTRY_SCHEMA_VERSION
            );
            return Self::load(fs).await;
        }

        let mut registry = Self::new();
        for meta in schema.plugins {
            registry.upsert(meta);
        }
        Ok(registry)
    }

    /// Plugins matching `filter`, in insertion order.
    #[must_use]
    pub fn list(&self, filter: &PluginFilter) -> Vec<PluginMeta> {
        self.plugins
            .iter()
            .filter(|meta| filter.matches(meta))
            .cloned()
            .collect()
    }

    /// Looks up a plugin by id.
    #[must_use]
    pub fn get(&self, id: &PluginId) -> Option<&PluginMeta> {
        self.plugins.iter().find(|meta| &meta.id == id)
    }

    /// Returns `true` if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &PluginId) -> bool {
        self.get(id).is_some()
    }

    /// Number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Returns `true` if no plugin is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Replaces the record with the same id in place, or appends it.
    pub fn upsert(&mut self, meta: PluginMeta) {
        match self.plugins.iter_mut().find(|existing| existing.id == meta.id) {
            Some(existing) => *existing = meta,
            None => self.plugins.push(meta),
        }
    }

    /// Removes and returns the record for `id`.
    pub fn remove(&mut self, id: &PluginId) -> Option<PluginMeta> {
        let index = self.plugins.iter().position(|meta| &meta.id == id)?;
        Some(self.plugins.remove(index))
    }

    /// Serializable snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySchema {
        RegistrySchema {
            version: REGISTRY_SCHEMA_VERSION.to_string(),
            plugins: self.plugins.clone(),
        }
    }
}
