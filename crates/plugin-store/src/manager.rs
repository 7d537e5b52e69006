//! Plugin manager: the public face of the store.
//!
//! Every mutation runs under the per-id lock, commits to disk first, and
//! only then updates the in-memory registry. A failed mutation leaves both
//! disk and registry as they were. Created and imported plugins are built
//! in a staging directory and swapped in whole, so a failed forced
//! replacement keeps the previous plugin.
//!
//! # Examples
//!
//! ```
//! use plugin_store::{CreatePluginInput, DeleteOptions, PluginFilter, PluginManager, PluginPatch};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let temp = tempfile::tempdir()?;
//! let manager = PluginManager::open(temp.path()).await?;
//!
//! let created = manager
//!     .create(CreatePluginInput::new("example-plugin").with_skill("hello.md", "# Hello"))
//!     .await?;
//! assert_eq!(created.id.as_str(), "example-plugin");
//! assert_eq!(manager.list(&PluginFilter::new()).await.len(), 1);
//!
//! manager
//!     .update("example-plugin", PluginPatch::new().with_version("1.1.0"))
//!     .await?;
//! manager.delete("example-plugin", DeleteOptions::forced()).await?;
//! assert!(manager.get("example-plugin").await.is_none());
//! # Ok(())
//! # }
//! ```

use crate::error::{PluginStoreError, Result};
use crate::layout::{PluginFs, validate_resource_content};
use crate::lock::LockRegistry;
use crate::marketplace::{FetchRequest, MarketplaceClient, PluginFetcher};
use crate::registry::{Registry, RegistrySchema};
use crate::types::{
    CreatePluginInput, DeleteOptions, ImportPathInput, ImportUrlInput, METADATA_FILE,
    PACKAGED_MANIFEST, PluginFilter, PluginPatch, SourceManifest,
};
use chrono::Utc;
use plugin_core::{
    ConfigResolver, DEFAULT_VERSION, PluginId, PluginJson, PluginMeta, PluginSource, ResourceKind,
    ResourceName, validate_version,
};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// RAII guard for staging directory cleanup on error.
///
/// Removes the staging directory if the operation fails or panics before
/// [`commit`](Self::commit), so no partial plugin remains on disk.
struct PluginDirGuard {
    path: PathBuf,
    cleanup: bool,
}

impl PluginDirGuard {
    const fn new(path: PathBuf) -> Self {
        Self {
            path,
            cleanup: true,
        }
    }

    fn commit(mut self) {
        self.cleanup = false;
    }
}

impl Drop for PluginDirGuard {
    fn drop(&mut self) {
        if self.cleanup {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(
                    "Failed to cleanup staging directory {}: {}",
                    self.path.display(),
                    e
                );
            } else {
                debug!(
                    "Cleaned up incomplete staging directory: {}",
                    self.path.display()
                );
            }
        }
    }
}

/// Creation input after validation.
struct PreparedCreate {
    id: PluginId,
    name: String,
    description: String,
    version: String,
    tags: Vec<String>,
    resources: Vec<(ResourceKind, ResourceName, String)>,
    force: bool,
}

impl PreparedCreate {
    fn validate(input: CreatePluginInput) -> Result<Self> {
        let name = required_name(&input.name)?;
        let id = match input.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => PluginId::new(id)?,
            _ => PluginId::from_name(&name)?,
        };
        let version = resolve_version(input.version.as_deref())?;

        let mut resources = Vec::new();
        for (kind, items) in input.resources() {
            let mut seen = HashSet::new();
            for item in items {
                let resource = ResourceName::new(item.name.trim())?;
                if !seen.insert(resource.clone()) {
                    return Err(PluginStoreError::validation(format!(
                        "duplicate {kind} name '{resource}'"
                    )));
                }
                validate_resource_content(kind, &resource, &item.content)?;
                resources.push((kind, resource, item.content.clone()));
            }
        }

        Ok(Self {
            id,
            name,
            description: input.description.unwrap_or_default(),
            version,
            tags: normalize_tags(input.tags),
            resources,
            force: input.force,
        })
    }
}

/// Builder for [`PluginManager`].
pub struct PluginManagerBuilder {
    root: PathBuf,
    locks: Option<LockRegistry>,
    fetcher: Option<Arc<dyn PluginFetcher>>,
}

impl PluginManagerBuilder {
    /// Shares an existing lock registry with this manager.
    #[must_use]
    pub fn locks(mut self, locks: LockRegistry) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Uses `fetcher` for marketplace imports instead of the HTTP client.
    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn PluginFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Opens the store: creates the layout, clears what an interrupted
    /// install left behind, and loads the registry.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::IoFailure`] if the root cannot be
    /// created or listed, or [`PluginStoreError::Config`] if the default
    /// HTTP client cannot be built.
    pub async fn open(self) -> Result<PluginManager> {
        let root =
            std::path::absolute(&self.root).map_err(|e| PluginStoreError::io(&self.root, e))?;
        let fs = PluginFs::new(root);
        fs.ensure_layout().await?;
        let recovered = fs.recover_work_dirs().await?;
        if recovered > 0 {
            info!("Recovered {recovered} interrupted installs");
        }

        let registry = Registry::load(&fs).await?;
        let fetcher: Arc<dyn PluginFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(MarketplaceClient::new()?),
        };

        info!(
            "Opened plugin store at {} ({} plugins)",
            fs.root().display(),
            registry.len()
        );

        Ok(PluginManager {
            fs,
            registry: RwLock::new(registry),
            locks: self.locks.unwrap_or_default(),
            fetcher,
        })
    }
}

impl fmt::Debug for PluginManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManagerBuilder")
            .field("root", &self.root)
            .field("locks", &self.locks)
            .field("custom_fetcher", &self.fetcher.is_some())
            .finish()
    }
}

/// Plugin store manager.
///
/// Owns the on-disk layout, the registry, and the per-id locks. Share it
/// across tasks behind an `Arc`.
pub struct PluginManager {
    fs: PluginFs,
    registry: RwLock<Registry>,
    locks: LockRegistry,
    fetcher: Arc<dyn PluginFetcher>,
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("root", &self.fs.root())
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

impl PluginManager {
    /// Opens a store rooted at `root` with default components.
    ///
    /// # Errors
    ///
    /// See [`PluginManagerBuilder::open`].
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::builder(root).open().await
    }

    /// Opens the store at the root chosen by `resolver`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::Config`] if the root cannot be resolved,
    /// otherwise see [`PluginManagerBuilder::open`].
    pub async fn from_config(resolver: &ConfigResolver) -> Result<Self> {
        let resolved = resolver.resolve()?;
        info!(
            "Resolved plugin root {} from {}",
            resolved.path.display(),
            resolved.origin
        );
        Self::open(resolved.path).await
    }

    /// Starts a builder for a store rooted at `root`.
    #[must_use]
    pub fn builder(root: impl Into<PathBuf>) -> PluginManagerBuilder {
        PluginManagerBuilder {
            root: root.into(),
            locks: None,
            fetcher: None,
        }
    }

    /// Absolute plugin root.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.fs.root()
    }

    /// Lock registry guarding this store.
    #[must_use]
    pub const fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// Plugins matching `filter`, in registry order.
    pub async fn list(&self, filter: &PluginFilter) -> Vec<PluginMeta> {
        self.registry.read().await.list(filter)
    }

    /// Looks up a plugin. Unknown or malformed ids yield `None`.
    pub async fn get(&self, id: &str) -> Option<PluginMeta> {
        let id = PluginId::new(id).ok()?;
        self.registry.read().await.get(&id).cloned()
    }

    /// Creates a plugin with its initial resources.
    ///
    /// # Errors
    ///
    /// * [`PluginStoreError::Validation`] - Blank name, malformed version,
    ///   unsafe id or resource name, duplicate resource, invalid MCP JSON
    /// * [`PluginStoreError::AlreadyExists`] - Id taken and `force` unset
    /// * [`PluginStoreError::IoFailure`] - Disk write failed; nothing is
    ///   left behind and a plugin being replaced stays intact
    pub async fn create(&self, input: CreatePluginInput) -> Result<PluginMeta> {
        let prepared = PreparedCreate::validate(input)?;
        let id = prepared.id.clone();

        self.locks
            .with_lock(id.as_str(), || self.create_locked(prepared))
            .await
    }

    async fn create_locked(&self, prepared: PreparedCreate) -> Result<PluginMeta> {
        self.check_vacancy(&prepared.id, prepared.force).await?;

        let staging = self.fs.create_staging_dir(&prepared.id).await?;
        let guard = PluginDirGuard::new(staging.clone());

        let mut doc = PluginJson::new(
            prepared.id.clone(),
            prepared.name,
            PluginSource::LocalCreated,
        );
        doc.description = prepared.description;
        doc.version = prepared.version;
        doc.tags = prepared.tags;
        self.fs.write_metadata(&staging, &doc).await?;

        for (kind, name, content) in &prepared.resources {
            self.fs.write_resource(&staging, *kind, name, content).await?;
        }

        let dir = self.fs.install_plugin_dir(&staging, &prepared.id).await?;
        guard.commit();

        let meta = PluginMeta::from_document(doc, dir);
        self.register(meta.clone()).await;
        info!(
            "Created plugin {} ({} resources)",
            meta.id,
            prepared.resources.len()
        );
        Ok(meta)
    }

    /// Applies a partial metadata update.
    ///
    /// # Errors
    ///
    /// * [`PluginStoreError::NotFound`] - Plugin not registered
    /// * [`PluginStoreError::Validation`] - Blank name or malformed version
    /// * [`PluginStoreError::IoFailure`] - Write failed; disk and registry
    ///   are unchanged
    pub async fn update(&self, id: &str, patch: PluginPatch) -> Result<PluginMeta> {
        let id = PluginId::new(id)?;
        let name = patch.name.as_deref().map(required_name).transpose()?;
        let version = match patch.version.as_deref() {
            Some(version) => Some(resolve_version(Some(version))?),
            None => None,
        };
        let tags = patch.tags.map(normalize_tags);
        let description = patch.description;

        self.locks
            .with_lock(id.as_str(), || async {
                let current = self.registered(&id).await?;

                let mut doc = current.to_document();
                if let Some(name) = name {
                    doc.name = name;
                }
                if let Some(description) = description {
                    doc.description = description;
                }
                if let Some(version) = version {
                    doc.version = version;
                }
                if let Some(tags) = tags {
                    doc.tags = tags;
                }
                doc.updated_at = Utc::now();

                self.fs.write_metadata(&current.location, &doc).await?;

                let meta = PluginMeta::from_document(doc, current.location);
                self.registry.write().await.upsert(meta.clone());
                info!("Updated plugin {}", meta.id);
                Ok(meta)
            })
            .await
    }

    /// Deletes a plugin and its directory.
    ///
    /// Entries copied in by an import count as managed.
    ///
    /// # Errors
    ///
    /// * [`PluginStoreError::NotFound`] - Plugin not registered
    /// * [`PluginStoreError::UnmanagedContent`] - Directory holds foreign
    ///   entries and `force` is unset
    pub async fn delete(&self, id: &str, options: DeleteOptions) -> Result<()> {
        let id = PluginId::new(id)?;

        self.locks
            .with_lock(id.as_str(), || async {
                let meta = self.registered(&id).await?;
                self.fs
                    .delete_plugin_dir(&id, options.force, &meta.imported_entries)
                    .await?;
                self.registry.write().await.remove(&id);
                info!("Deleted plugin {id}");
                Ok(())
            })
            .await
    }

    /// Imports a plugin by copying a local directory.
    ///
    /// Metadata is taken from `plugin.json` or `.claude-plugin/plugin.json`
    /// in the source when present, falling back to the directory name.
    ///
    /// # Errors
    ///
    /// * [`PluginStoreError::Validation`] - Source is not a directory or
    ///   overlaps the store
    /// * [`PluginStoreError::AlreadyExists`] - Id taken and `force` unset
    pub async fn import_from_path(&self, input: ImportPathInput) -> Result<PluginMeta> {
        let source = tokio::fs::canonicalize(&input.path).await.map_err(|e| {
            PluginStoreError::validation(format!(
                "import source {} is not accessible: {e}",
                input.path.display()
            ))
        })?;
        if !source.is_dir() {
            return Err(PluginStoreError::validation(format!(
                "import source {} is not a directory",
                input.path.display()
            )));
        }

        let manifest = read_source_manifest(&source).await;
        let id = derive_import_id(input.id.as_deref(), &manifest, &source)?;

        self.adopt(
            &source,
            id,
            manifest,
            PluginSource::ImportedPath,
            input.force,
            None,
        )
        .await
    }

    /// Imports a plugin from a marketplace.
    ///
    /// The archive is fetched and verified before the lock is taken. The
    /// staging directory is removed whatever the outcome.
    ///
    /// # Errors
    ///
    /// * [`PluginStoreError::DownloadFailure`] - Request failed
    /// * [`PluginStoreError::ChecksumMismatch`] - Archive digest differs;
    ///   nothing is created or registered
    /// * [`PluginStoreError::AlreadyExists`] - Id taken and `force` unset
    pub async fn import_from_url(&self, input: ImportUrlInput) -> Result<PluginMeta> {
        let id = PluginId::new(input.id.as_deref().unwrap_or(&input.plugin_id))?;
        let force = input.force;

        let request = FetchRequest {
            market_url: input.market_url,
            plugin_id: input.plugin_id,
            version: input.version,
            token: input.token,
        };
        let mut staged = self.fetcher.fetch(&request).await?;

        let manifest = read_source_manifest(staged.root()).await;
        let fallback_version = staged.descriptor().version.clone();
        let result = self
            .adopt(
                staged.root(),
                id,
                manifest,
                PluginSource::ImportedUrl,
                force,
                fallback_version,
            )
            .await;

        staged.cleanup();
        result
    }

    /// Resource names of `kind` for plugin `id`, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::NotFound`] for an unknown plugin.
    pub async fn list_resources(&self, id: &str, kind: ResourceKind) -> Result<Vec<String>> {
        let meta = self.registered(&PluginId::new(id)?).await?;
        self.fs.list_resources(&meta.location, kind).await
    }

    /// Skill names for plugin `id`, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::NotFound`] for an unknown plugin.
    pub async fn list_skills(&self, id: &str) -> Result<Vec<String>> {
        self.list_resources(id, ResourceKind::Skill).await
    }

    /// Reads one resource.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::NotFound`] for an unknown plugin or
    /// [`PluginStoreError::ReadFailure`] for a missing resource.
    pub async fn read_resource(&self, id: &str, kind: ResourceKind, name: &str) -> Result<String> {
        let meta = self.registered(&PluginId::new(id)?).await?;
        let name = ResourceName::new(name)?;
        self.fs.read_resource(&meta.location, kind, &name).await
    }

    /// Creates or overwrites one resource.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::NotFound`] for an unknown plugin or
    /// [`PluginStoreError::Validation`] for an invalid name or MCP JSON.
    pub async fn write_resource(
        &self,
        id: &str,
        kind: ResourceKind,
        name: &str,
        content: &str,
    ) -> Result<()> {
        let id = PluginId::new(id)?;
        let name = ResourceName::new(name)?;

        self.locks
            .with_lock(id.as_str(), || async {
                let meta = self.registered(&id).await?;
                self.fs
                    .write_resource(&meta.location, kind, &name, content)
                    .await?;
                info!("Wrote {kind} {name} for plugin {id}");
                Ok(())
            })
            .await
    }

    /// Deletes one resource. Returns `false` if it was already absent.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::NotFound`] for an unknown plugin.
    pub async fn delete_resource(&self, id: &str, kind: ResourceKind, name: &str) -> Result<bool> {
        let id = PluginId::new(id)?;
        let name = ResourceName::new(name)?;

        self.locks
            .with_lock(id.as_str(), || async {
                let meta = self.registered(&id).await?;
                let removed = self.fs.delete_resource(&meta.location, kind, &name).await?;
                if removed {
                    info!("Deleted {kind} {name} from plugin {id}");
                }
                Ok(removed)
            })
            .await
    }

    /// Rebuilds the registry from disk. Returns the number of plugins.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::IoFailure`] if the plugins directory
    /// cannot be listed.
    pub async fn reload(&self) -> Result<usize> {
        let registry = Registry::load(&self.fs).await?;
        let count = registry.len();
        *self.registry.write().await = registry;
        info!("Reloaded registry ({count} plugins)");
        Ok(count)
    }

    /// Serializable snapshot of the registry.
    pub async fn snapshot(&self) -> RegistrySchema {
        self.registry.read().await.snapshot()
    }

    async fn registered(&self, id: &PluginId) -> Result<PluginMeta> {
        self.registry
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PluginStoreError::not_found(id.as_str()))
    }

    /// Fails unless `id` is free or `force` is set. Must run under the id
    /// lock.
    ///
    /// Nothing is removed here; a forced replacement happens in
    /// [`PluginFs::install_plugin_dir`].
    async fn check_vacancy(&self, id: &PluginId, force: bool) -> Result<()> {
        if force {
            return Ok(());
        }
        if self.registry.read().await.contains(id) {
            return Err(PluginStoreError::AlreadyExists { id: id.to_string() });
        }
        self.fs.ensure_vacant(id).await
    }

    /// Records an installed plugin, replacing any previous record.
    async fn register(&self, meta: PluginMeta) {
        let mut registry = self.registry.write().await;
        if registry.contains(&meta.id) {
            info!("Replacing existing plugin {}", meta.id);
        }
        registry.upsert(meta);
    }

    /// Copies `source` into the store as plugin `id`.
    async fn adopt(
        &self,
        source: &Path,
        id: PluginId,
        manifest: SourceManifest,
        origin: PluginSource,
        force: bool,
        fallback_version: Option<String>,
    ) -> Result<PluginMeta> {
        self.locks
            .with_lock(id.as_str(), || async {
                self.ensure_no_overlap(source, &id).await?;
                self.check_vacancy(&id, force).await?;

                let staging = self.fs.create_staging_dir(&id).await?;
                let guard = PluginDirGuard::new(staging.clone());

                let copied = PluginFs::copy_tree(source, &staging).await?;
                debug!("Copied {copied} files from {}", source.display());
                let imported = PluginFs::foreign_entries(&staging).await?;

                let version = manifest
                    .version
                    .filter(|v| {
                        let valid = validate_version(v).is_ok();
                        if !valid {
                            warn!("Ignoring invalid version '{v}' in {}", source.display());
                        }
                        valid
                    })
                    .or(fallback_version)
                    .unwrap_or_else(|| DEFAULT_VERSION.to_string());

                let name = manifest.name.unwrap_or_else(|| id.to_string());
                let mut doc = PluginJson::new(id.clone(), name, origin);
                doc.description = manifest.description.unwrap_or_default();
                doc.version = version;
                doc.tags = normalize_tags(manifest.tags);
                doc.imported_entries = imported;
                self.fs.write_metadata(&staging, &doc).await?;

                let dir = self.fs.install_plugin_dir(&staging, &id).await?;
                guard.commit();

                let meta = PluginMeta::from_document(doc, dir);
                self.register(meta.clone()).await;
                info!("Imported plugin {} ({origin})", meta.id);
                Ok(meta)
            })
            .await
    }

    /// Rejects sources that contain, or live inside, the target directory.
    async fn ensure_no_overlap(&self, source: &Path, id: &PluginId) -> Result<()> {
        let plugins_dir = tokio::fs::canonicalize(self.fs.plugins_dir())
            .await
            .map_err(|e| PluginStoreError::io(self.fs.plugins_dir(), e))?;
        let target = plugins_dir.join(id.as_str());

        if target.starts_with(source) || source.starts_with(&target) {
            return Err(PluginStoreError::validation(format!(
                "import source {} overlaps the plugin store",
                source.display()
            )));
        }
        Ok(())
    }
}

fn required_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(PluginStoreError::validation("plugin name is required"));
    }
    Ok(trimmed.to_string())
}

fn resolve_version(version: Option<&str>) -> Result<String> {
    match version.map(str::trim) {
        Some(version) if !version.is_empty() => {
            validate_version(version)?;
            Ok(version.to_string())
        }
        Some(_) => Err(PluginStoreError::validation("version cannot be blank")),
        None => Ok(DEFAULT_VERSION.to_string()),
    }
}

/// Trims tags, drops blank ones, and removes duplicates keeping the first.
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
        .collect()
}

/// Reads import metadata from `plugin.json` or the packaged manifest.
///
/// Unreadable or malformed manifests are ignored with a warning.
async fn read_source_manifest(source: &Path) -> SourceManifest {
    for candidate in [METADATA_FILE, PACKAGED_MANIFEST] {
        let path = source.join(candidate);
        let Ok(content) = tokio::fs::read_to_string(&path).await else {
            continue;
        };
        match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(value) => return SourceManifest::from_value(&value),
            Err(e) => warn!("Ignoring malformed manifest {}: {}", path.display(), e),
        }
    }
    SourceManifest::default()
}

fn derive_import_id(
    explicit: Option<&str>,
    manifest: &SourceManifest,
    source: &Path,
) -> Result<PluginId> {
    if let Some(id) = explicit {
        return Ok(PluginId::new(id)?);
    }

    if let Some(id) = manifest.id.as_deref()
        && let Ok(id) = PluginId::new(id)
    {
        return Ok(id);
    }

    let fallback = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = manifest.name.as_deref().unwrap_or(&fallback);
    Ok(PluginId::from_name(name)?)
}
