//! On-disk layout of the plugin store.
//!
//! ```text
//! root/
//! └── plugins/
//!     └── <id>/
//!         ├── plugin.json     # PluginJson metadata
//!         ├── skills/<name>
//!         ├── agents/<name>
//!         ├── commands/<name>
//!         └── mcp/<name>      # JSON server definitions
//! ```
//!
//! Every file write goes through [`write_atomic`]. New and replacement
//! plugins are built in a hidden `.<id>.<uuid>.staging` directory next to
//! the plugin directories and renamed into place once complete.

use crate::atomic::{is_temp_artifact, write_atomic};
use crate::error::{PluginStoreError, Result};
use crate::types::{METADATA_FILE, PLUGINS_DIR};
use plugin_core::{FORMAT_VERSION, PluginId, PluginJson, ResourceKind, ResourceName};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

const STAGING_SUFFIX: &str = "staging";
const BACKUP_SUFFIX: &str = "backup";

/// Filesystem operations scoped to one plugin root.
///
/// # Examples
///
/// ```
/// use plugin_store::PluginFs;
/// use plugin_core::PluginId;
///
/// let fs = PluginFs::new("/data/store");
/// let id = PluginId::new("demo").unwrap();
/// assert_eq!(fs.plugin_dir(&id), std::path::Path::new("/data/store/plugins/demo"));
/// ```
#[derive(Debug, Clone)]
pub struct PluginFs {
    root: PathBuf,
    plugins_dir: PathBuf,
}

impl PluginFs {
    /// Creates a layout rooted at `root`. Does not touch the disk.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let plugins_dir = root.join(PLUGINS_DIR);
        Self { root, plugins_dir }
    }

    /// Plugin root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one sub-directory per plugin.
    #[must_use]
    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// Directory of the plugin `id`.
    #[must_use]
    pub fn plugin_dir(&self, id: &PluginId) -> PathBuf {
        self.plugins_dir.join(id.as_str())
    }

    /// Path of a sub-resource file inside `plugin_dir`.
    #[must_use]
    pub fn resource_path(plugin_dir: &Path, kind: ResourceKind, name: &ResourceName) -> PathBuf {
        plugin_dir.join(kind.dir_name()).join(name.as_str())
    }

    /// Creates `root/plugins` if missing.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::IoFailure`] if the directory cannot be
    /// created.
    pub async fn ensure_layout(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.plugins_dir)
            .await
            .map_err(|e| PluginStoreError::io(&self.plugins_dir, e))
    }

    /// Checks that nothing occupies the directory of `id`.
    ///
    /// A missing or empty directory counts as vacant.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::AlreadyExists`] if the path holds a file
    /// or a non-empty directory, or [`PluginStoreError::IoFailure`] on I/O
    /// errors.
    pub async fn ensure_vacant(&self, id: &PluginId) -> Result<()> {
        let dir = self.plugin_dir(id);
        let is_dir = match tokio::fs::metadata(&dir).await {
            Ok(meta) => meta.is_dir(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(PluginStoreError::io(&dir, e)),
        };

        if is_dir && is_empty_dir(&dir).await? {
            return Ok(());
        }
        Err(PluginStoreError::AlreadyExists { id: id.to_string() })
    }

    /// Creates a fresh staging directory for `id` beside the plugin
    /// directories.
    ///
    /// Staging names start with `.` so the registry never loads them.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::IoFailure`] if the directory cannot be
    /// created.
    pub async fn create_staging_dir(&self, id: &PluginId) -> Result<PathBuf> {
        self.ensure_layout().await?;
        let dir = self.plugins_dir.join(work_dir_name(id, STAGING_SUFFIX));
        tokio::fs::create_dir(&dir)
            .await
            .map_err(|e| PluginStoreError::io(&dir, e))?;
        debug!("Created staging directory: {}", dir.display());
        Ok(dir)
    }

    /// Moves a fully built `staging` directory into place as plugin `id`.
    ///
    /// An existing directory is first renamed to a backup, then the staging
    /// directory is renamed onto the target and the backup is removed. If
    /// the second rename fails the backup is renamed back, so the previous
    /// plugin stays intact.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::IoFailure`] if either rename fails. The
    /// staging directory is left for the caller to remove.
    pub async fn install_plugin_dir(&self, staging: &Path, id: &PluginId) -> Result<PathBuf> {
        let target = self.plugin_dir(id);
        let backup_path = self.plugins_dir.join(work_dir_name(id, BACKUP_SUFFIX));

        let backup = match tokio::fs::rename(&target, &backup_path).await {
            Ok(()) => Some(backup_path),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(PluginStoreError::io(&target, e)),
        };

        if let Err(e) = tokio::fs::rename(staging, &target).await {
            if let Some(backup) = &backup
                && let Err(restore) = tokio::fs::rename(backup, &target).await
            {
                warn!(
                    "Failed to restore {} from {}: {}",
                    target.display(),
                    backup.display(),
                    restore
                );
            }
            return Err(PluginStoreError::io(&target, e));
        }

        if let Some(backup) = backup {
            match tokio::fs::remove_dir_all(&backup).await {
                Ok(()) => debug!("Replaced plugin directory: {}", target.display()),
                Err(e) => warn!("Failed to remove {}: {}", backup.display(), e),
            }
        }

        debug!("Installed plugin directory: {}", target.display());
        Ok(target)
    }

    /// Cleans up staging and backup directories left by an interrupted
    /// install. Returns the number of entries handled.
    ///
    /// Staging directories are removed. A backup whose plugin directory is
    /// missing is renamed back into place, any other backup is removed.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::IoFailure`] if the plugins directory
    /// cannot be listed or an entry cannot be moved.
    pub async fn recover_work_dirs(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.plugins_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(PluginStoreError::io(&self.plugins_dir, e)),
        };

        let mut handled = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PluginStoreError::io(&self.plugins_dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((id, suffix)) = parse_work_dir_name(&name) else {
                continue;
            };
            let path = entry.path();
            let target = self.plugins_dir.join(id);

            let target_exists = tokio::fs::try_exists(&target)
                .await
                .map_err(|e| PluginStoreError::io(&target, e))?;

            if suffix == BACKUP_SUFFIX && !target_exists {
                tokio::fs::rename(&path, &target)
                    .await
                    .map_err(|e| PluginStoreError::io(&path, e))?;
                warn!("Restored plugin directory {} from backup", target.display());
            } else {
                tokio::fs::remove_dir_all(&path)
                    .await
                    .map_err(|e| PluginStoreError::io(&path, e))?;
                debug!("Removed leftover {suffix} directory: {}", path.display());
            }
            handled += 1;
        }

        Ok(handled)
    }

    /// Reads and validates `plugin.json` in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::ReadFailure`] if the file is missing,
    /// unreadable, unparsable, or of an unsupported format version.
    pub async fn read_metadata(&self, dir: &Path) -> Result<PluginJson> {
        let path = dir.join(METADATA_FILE);
        let content =
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| PluginStoreError::ReadFailure {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;

        let doc: PluginJson =
            serde_json::from_str(&content).map_err(|e| PluginStoreError::ReadFailure {
                path: path.clone(),
                reason: format!("Failed to parse JSON: {e}"),
            })?;

        if doc.format_version != FORMAT_VERSION {
            return Err(PluginStoreError::ReadFailure {
                path,
                reason: format!(
                    "Unsupported format version: {} (expected {FORMAT_VERSION})",
                    doc.format_version
                ),
            });
        }

        Ok(doc)
    }

    /// Writes `doc` as pretty JSON to `plugin.json` in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::IoFailure`] if the write fails.
    pub async fn write_metadata(&self, dir: &Path, doc: &PluginJson) -> Result<()> {
        let mut json = serde_json::to_string_pretty(doc)?;
        json.push('\n');
        write_atomic(&dir.join(METADATA_FILE), json.as_bytes()).await?;
        debug!("Wrote plugin metadata for {}", doc.id);
        Ok(())
    }

    /// Lists resource names of `kind` in `dir`, sorted.
    ///
    /// A missing collection directory yields an empty list. Dot-prefixed
    /// entries and sub-directories are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::IoFailure`] if the directory exists but
    /// cannot be read.
    pub async fn list_resources(&self, dir: &Path, kind: ResourceKind) -> Result<Vec<String>> {
        let collection = dir.join(kind.dir_name());
        let mut entries = match tokio::fs::read_dir(&collection).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PluginStoreError::io(&collection, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PluginStoreError::io(&collection, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let is_file = entry
                .file_type()
                .await
                .map_err(|e| PluginStoreError::io(entry.path(), e))?
                .is_file();
            if is_file {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    /// Creates or overwrites a resource file.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::Validation`] if an MCP server definition
    /// is not valid JSON, or [`PluginStoreError::IoFailure`] on write errors.
    pub async fn write_resource(
        &self,
        dir: &Path,
        kind: ResourceKind,
        name: &ResourceName,
        content: &str,
    ) -> Result<()> {
        validate_resource_content(kind, name, content)?;

        let collection = dir.join(kind.dir_name());
        tokio::fs::create_dir_all(&collection)
            .await
            .map_err(|e| PluginStoreError::io(&collection, e))?;

        write_atomic(&Self::resource_path(dir, kind, name), content.as_bytes()).await?;
        debug!("Wrote {kind} {name} in {}", dir.display());
        Ok(())
    }

    /// Reads a resource file.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::ReadFailure`] if the resource is absent or
    /// unreadable.
    pub async fn read_resource(
        &self,
        dir: &Path,
        kind: ResourceKind,
        name: &ResourceName,
    ) -> Result<String> {
        let path = Self::resource_path(dir, kind, name);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| PluginStoreError::ReadFailure {
                path,
                reason: e.to_string(),
            })
    }

    /// Deletes a resource file.
    ///
    /// Returns `false` if the resource was already absent.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::IoFailure`] if removal fails.
    pub async fn delete_resource(
        &self,
        dir: &Path,
        kind: ResourceKind,
        name: &ResourceName,
    ) -> Result<bool> {
        let path = Self::resource_path(dir, kind, name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted {kind} {name} in {}", dir.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PluginStoreError::io(&path, e)),
        }
    }

    /// Removes the directory of `id`.
    ///
    /// Without `force`, refuses if the directory holds anything besides
    /// `plugin.json`, the four collection directories, and the top-level
    /// `imported` entries recorded when the plugin was imported. A
    /// directory that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::UnmanagedContent`] or
    /// [`PluginStoreError::IoFailure`].
    pub async fn delete_plugin_dir(
        &self,
        id: &PluginId,
        force: bool,
        imported: &[String],
    ) -> Result<()> {
        let dir = self.plugin_dir(id);

        if !force {
            let unmanaged = match unmanaged_entries(&dir).await {
                Ok(unmanaged) => unmanaged,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(PluginStoreError::io(&dir, e)),
            };
            let unmanaged: Vec<String> = unmanaged
                .into_iter()
                .filter(|entry| !imported.contains(entry))
                .collect();
            if !unmanaged.is_empty() {
                return Err(PluginStoreError::UnmanagedContent {
                    id: id.to_string(),
                    entries: unmanaged,
                });
            }
        }

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!("Removed plugin directory: {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PluginStoreError::io(&dir, e)),
        }
    }

    /// Sorted names of the plugin directories under `root/plugins`.
    ///
    /// Hidden entries, including staging and backup directories, are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::IoFailure`] if the directory exists but
    /// cannot be read.
    pub async fn plugin_dir_names(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.plugins_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PluginStoreError::io(&self.plugins_dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PluginStoreError::io(&self.plugins_dir, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map_err(|e| PluginStoreError::io(entry.path(), e))?
                .is_dir();
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_dir && !name.starts_with('.') {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    /// Sorted top-level entries of `dir` outside the managed layout.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::IoFailure`] if `dir` cannot be listed.
    pub async fn foreign_entries(dir: &Path) -> Result<Vec<String>> {
        unmanaged_entries(dir)
            .await
            .map_err(|e| PluginStoreError::io(dir, e))
    }

    /// Recursively copies `src` into `dest` on the blocking pool.
    ///
    /// Regular files and directories are copied; symlinks are skipped.
    /// Returns the number of files copied.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::IoFailure`] on the first failing path.
    pub async fn copy_tree(src: &Path, dest: &Path) -> Result<usize> {
        let src = src.to_path_buf();
        let dest = dest.to_path_buf();

        tokio::task::spawn_blocking(move || copy_tree_blocking(&src, &dest))
            .await
            .map_err(|e| PluginStoreError::io(PathBuf::new(), std::io::Error::other(e)))?
    }
}

/// Validates resource content for its collection kind.
pub(crate) fn validate_resource_content(
    kind: ResourceKind,
    name: &ResourceName,
    content: &str,
) -> Result<()> {
    if kind == ResourceKind::McpServer {
        serde_json::from_str::<serde_json::Value>(content).map_err(|e| {
            PluginStoreError::validation(format!(
                "MCP server definition '{name}' is not valid JSON: {e}"
            ))
        })?;
    }
    Ok(())
}

/// `.<id>.<uuid>.<suffix>`, unique per call.
fn work_dir_name(id: &PluginId, suffix: &str) -> String {
    format!(".{id}.{}.{suffix}", Uuid::new_v4().simple())
}

/// Splits a staging or backup directory name into plugin id and suffix.
fn parse_work_dir_name(name: &str) -> Option<(&str, &str)> {
    let rest = name.strip_prefix('.')?;
    let (rest, suffix) = rest.rsplit_once('.')?;
    if suffix != STAGING_SUFFIX && suffix != BACKUP_SUFFIX {
        return None;
    }
    let (id, _) = rest.rsplit_once('.')?;
    PluginId::new(id).ok()?;
    Some((id, suffix))
}

fn is_managed_entry(name: &str) -> bool {
    name == METADATA_FILE
        || is_temp_artifact(name)
        || ResourceKind::ALL.iter().any(|kind| kind.dir_name() == name)
}

async fn unmanaged_entries(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut unmanaged = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_managed_entry(&name) {
            unmanaged.push(name);
        }
    }

    unmanaged.sort();
    Ok(unmanaged)
}

async fn is_empty_dir(dir: &Path) -> Result<bool> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PluginStoreError::io(dir, e))?;
    let first = entries
        .next_entry()
        .await
        .map_err(|e| PluginStoreError::io(dir, e))?;
    Ok(first.is_none())
}

fn copy_tree_blocking(src: &Path, dest: &Path) -> Result<usize> {
    std::fs::create_dir_all(dest).map_err(|e| PluginStoreError::io(dest, e))?;
    let mut copied = 0;

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().map_or_else(|| src.to_path_buf(), Path::to_path_buf);
            PluginStoreError::io(path, std::io::Error::other(e.to_string()))
        })?;

        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| PluginStoreError::io(entry.path(), std::io::Error::other(e)))?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| PluginStoreError::io(&target, e))?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| PluginStoreError::io(parent, e))?;
            }
            std::fs::copy(entry.path(), &target).map_err(|e| PluginStoreError::io(&target, e))?;
            copied += 1;
        } else {
            debug!("Skipping non-regular entry: {}", entry.path().display());
        }
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_core::PluginSource;
    use tempfile::TempDir;

    fn id(value: &str) -> PluginId {
        PluginId::new(value).unwrap()
    }

    fn name(value: &str) -> ResourceName {
        ResourceName::new(value).unwrap()
    }

    fn plugin_dir(fs: &PluginFs, value: &str) -> PathBuf {
        let dir = fs.plugin_dir(&id(value));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_ensure_vacant() {
        let temp = TempDir::new().unwrap();
        let fs = PluginFs::new(temp.path());
        fs.ensure_vacant(&id("demo")).await.unwrap();

        // An empty directory is vacant.
        let dir = plugin_dir(&fs, "demo");
        fs.ensure_vacant(&id("demo")).await.unwrap();

        std::fs::write(dir.join("leftover.txt"), "x").unwrap();
        let err = fs.ensure_vacant(&id("demo")).await.unwrap_err();
        assert!(matches!(err, PluginStoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_install_plugin_dir_fresh() {
        let temp = TempDir::new().unwrap();
        let fs = PluginFs::new(temp.path());
        let demo = id("demo");

        let staging = fs.create_staging_dir(&demo).await.unwrap();
        assert_eq!(staging.parent(), Some(fs.plugins_dir()));
        assert!(staging.file_name().unwrap().to_string_lossy().starts_with(".demo."));
        std::fs::write(staging.join(METADATA_FILE), "{}").unwrap();

        let dir = fs.install_plugin_dir(&staging, &demo).await.unwrap();
        assert_eq!(dir, temp.path().join("plugins/demo"));
        assert!(dir.join(METADATA_FILE).is_file());
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn test_install_plugin_dir_replaces_existing() {
        let temp = TempDir::new().unwrap();
        let fs = PluginFs::new(temp.path());
        let demo = id("demo");
        let old = plugin_dir(&fs, "demo");
        std::fs::write(old.join("old.txt"), "old").unwrap();

        let staging = fs.create_staging_dir(&demo).await.unwrap();
        std::fs::write(staging.join("new.txt"), "new").unwrap();
        let dir = fs.install_plugin_dir(&staging, &demo).await.unwrap();

        assert!(dir.join("new.txt").is_file());
        assert!(!dir.join("old.txt").exists());
        let names: Vec<_> = std::fs::read_dir(fs.plugins_dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["demo"]);
    }

    #[tokio::test]
    async fn test_install_plugin_dir_failure_keeps_original() {
        let temp = TempDir::new().unwrap();
        let fs = PluginFs::new(temp.path());
        let demo = id("demo");
        let old = plugin_dir(&fs, "demo");
        std::fs::write(old.join("old.txt"), "old").unwrap();

        let missing = fs.plugins_dir().join(".demo.gone.staging");
        let err = fs.install_plugin_dir(&missing, &demo).await.unwrap_err();
        assert!(matches!(err, PluginStoreError::IoFailure { .. }));

        assert_eq!(std::fs::read_to_string(old.join("old.txt")).unwrap(), "old");
        assert_eq!(fs.plugin_dir_names().await.unwrap(), vec!["demo"]);
        assert_eq!(std::fs::read_dir(fs.plugins_dir()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_recover_work_dirs() {
        let temp = TempDir::new().unwrap();
        let fs = PluginFs::new(temp.path());
        fs.ensure_layout().await.unwrap();
        let plugins = fs.plugins_dir();

        // Interrupted between the two renames: only the backup survives.
        let orphan = plugins.join(".alpha.0123abcd.backup");
        std::fs::create_dir_all(&orphan).unwrap();
        std::fs::write(orphan.join("keep.txt"), "alpha").unwrap();

        // Interrupted after the swap: the backup is stale.
        plugin_dir(&fs, "beta");
        std::fs::create_dir_all(plugins.join(".beta.4567cdef.backup")).unwrap();

        std::fs::create_dir_all(plugins.join(".gamma.89abcdef.staging")).unwrap();
        std::fs::create_dir_all(plugins.join(".hidden")).unwrap();

        assert_eq!(fs.recover_work_dirs().await.unwrap(), 3);
        assert_eq!(
            std::fs::read_to_string(plugins.join("alpha/keep.txt")).unwrap(),
            "alpha"
        );
        assert!(!plugins.join(".beta.4567cdef.backup").exists());
        assert!(!plugins.join(".gamma.89abcdef.staging").exists());
        assert!(plugins.join(".hidden").exists());
        assert_eq!(fs.plugin_dir_names().await.unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_parse_work_dir_name() {
        let demo = id("demo");
        let staging = work_dir_name(&demo, STAGING_SUFFIX);
        assert_eq!(parse_work_dir_name(&staging), Some(("demo", "staging")));
        assert_eq!(
            parse_work_dir_name(".v1.2.abc.backup"),
            Some(("v1.2", "backup"))
        );
        assert_eq!(parse_work_dir_name(".demo.abc.tmp"), None);
        assert_eq!(parse_work_dir_name("demo.abc.staging"), None);
        assert_eq!(parse_work_dir_name(".staging"), None);
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let temp = TempDir::new().unwrap();
        let fs = PluginFs::new(temp.path());
        let dir = plugin_dir(&fs, "demo");

        let doc = PluginJson::new(id("demo"), "Demo", PluginSource::LocalCreated);
        fs.write_metadata(&dir, &doc).await.unwrap();

        assert_eq!(fs.read_metadata(&dir).await.unwrap(), doc);
    }

    #[tokio::test]
    async fn test_read_metadata_failures() {
        let temp = TempDir::new().unwrap();
        let fs = PluginFs::new(temp.path());
        let dir = plugin_dir(&fs, "demo");

        let missing = fs.read_metadata(&dir).await.unwrap_err();
        assert!(matches!(missing, PluginStoreError::ReadFailure { .. }));

        std::fs::write(dir.join(METADATA_FILE), "{not json").unwrap();
        let corrupt = fs.read_metadata(&dir).await.unwrap_err();
        assert!(corrupt.to_string().contains("Failed to parse JSON"));

        std::fs::write(
            dir.join(METADATA_FILE),
            r#"{"format_version": "2.0", "id": "demo", "name": "Demo", "source": "local-created"}"#,
        )
        .unwrap();
        let future = fs.read_metadata(&dir).await.unwrap_err();
        assert!(future.to_string().contains("Unsupported format version"));
    }

    #[tokio::test]
    async fn test_list_resources_missing_collection_is_empty() {
        let temp = TempDir::new().unwrap();
        let fs = PluginFs::new(temp.path());
        let dir = plugin_dir(&fs, "demo");

        for kind in ResourceKind::ALL {
            assert!(fs.list_resources(&dir, kind).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_list_resources_sorted_and_skips_hidden() {
        let temp = TempDir::new().unwrap();
        let fs = PluginFs::new(temp.path());
        let dir = plugin_dir(&fs, "demo");

        for skill in ["zeta.md", "alpha.md", "mid.md"] {
            fs.write_resource(&dir, ResourceKind::Skill, &name(skill), "body")
                .await
                .unwrap();
        }
        std::fs::write(dir.join("skills/.alpha.md.1.abc.tmp"), "partial").unwrap();
        std::fs::create_dir(dir.join("skills/nested")).unwrap();

        let names = fs.list_resources(&dir, ResourceKind::Skill).await.unwrap();
        assert_eq!(names, vec!["alpha.md", "mid.md", "zeta.md"]);
    }

    #[tokio::test]
    async fn test_resource_read_write_delete() {
        let temp = TempDir::new().unwrap();
        let fs = PluginFs::new(temp.path());
        let dir = plugin_dir(&fs, "demo");
        let agent = name("reviewer");

        fs.write_resource(&dir, ResourceKind::Agent, &agent, "v1")
            .await
            .unwrap();
        fs.write_resource(&dir, ResourceKind::Agent, &agent, "v2")
            .await
            .unwrap();
        assert_eq!(
            fs.read_resource(&dir, ResourceKind::Agent, &agent)
                .await
                .unwrap(),
            "v2"
        );

        assert!(
            fs.delete_resource(&dir, ResourceKind::Agent, &agent)
                .await
                .unwrap()
        );
        assert!(
            !fs.delete_resource(&dir, ResourceKind::Agent, &agent)
                .await
                .unwrap()
        );

        let err = fs
            .read_resource(&dir, ResourceKind::Agent, &agent)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginStoreError::ReadFailure { .. }));
    }

    #[tokio::test]
    async fn test_mcp_server_content_must_be_json() {
        let temp = TempDir::new().unwrap();
        let fs = PluginFs::new(temp.path());
        let dir = plugin_dir(&fs, "demo");

        let err = fs
            .write_resource(&dir, ResourceKind::McpServer, &name("srv"), "not json")
            .await
            .unwrap_err();
        assert!(matches!(err, PluginStoreError::Validation { .. }));
        assert!(!dir.join("mcp/srv").exists());

        fs.write_resource(
            &dir,
            ResourceKind::McpServer,
            &name("srv"),
            r#"{"command": "node", "args": ["server.js"]}"#,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_delete_plugin_dir_unmanaged_content() {
        let temp = TempDir::new().unwrap();
        let fs = PluginFs::new(temp.path());
        let demo = id("demo");
        let dir = plugin_dir(&fs, "demo");
        let doc = PluginJson::new(demo.clone(), "Demo", PluginSource::LocalCreated);
        fs.write_metadata(&dir, &doc).await.unwrap();
        fs.write_resource(&dir, ResourceKind::Command, &name("run"), "run it")
            .await
            .unwrap();
        std::fs::write(dir.join("README.md"), "notes").unwrap();

        std::fs::write(dir.join("LICENSE"), "mit").unwrap();

        let err = fs.delete_plugin_dir(&demo, false, &[]).await.unwrap_err();
        match err {
            PluginStoreError::UnmanagedContent { entries, .. } => {
                assert_eq!(entries, vec!["LICENSE".to_string(), "README.md".to_string()]);
            }
            other => panic!("Expected UnmanagedContent, got {other:?}"),
        }
        assert!(dir.exists());

        // Entries recorded at import time count as managed.
        let imported = vec!["README.md".to_string()];
        let err = fs.delete_plugin_dir(&demo, false, &imported).await.unwrap_err();
        match err {
            PluginStoreError::UnmanagedContent { entries, .. } => {
                assert_eq!(entries, vec!["LICENSE".to_string()]);
            }
            other => panic!("Expected UnmanagedContent, got {other:?}"),
        }

        std::fs::remove_file(dir.join("LICENSE")).unwrap();
        fs.delete_plugin_dir(&demo, false, &imported).await.unwrap();
        assert!(!dir.exists());

        // Already gone.
        fs.delete_plugin_dir(&demo, false, &[]).await.unwrap();
        fs.delete_plugin_dir(&demo, true, &[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_plugin_dir_names_sorted_dirs_only() {
        let temp = TempDir::new().unwrap();
        let fs = PluginFs::new(temp.path());
        assert!(fs.plugin_dir_names().await.unwrap().is_empty());

        for plugin in ["beta", "alpha"] {
            plugin_dir(&fs, plugin);
        }
        std::fs::write(fs.plugins_dir().join("stray.txt"), "x").unwrap();
        std::fs::create_dir_all(fs.plugins_dir().join(".beta.0123.staging")).unwrap();

        assert_eq!(fs.plugin_dir_names().await.unwrap(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_copy_tree() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join("skills/nested")).unwrap();
        std::fs::write(src.path().join("plugin.json"), "{}").unwrap();
        std::fs::write(src.path().join("skills/a.md"), "A").unwrap();
        std::fs::write(src.path().join("skills/nested/b.md"), "B").unwrap();

        #[cfg(unix)]
        std::os::unix::fs::symlink("/etc/passwd", src.path().join("link")).unwrap();

        let target = dest.path().join("copy");
        let copied = PluginFs::copy_tree(src.path(), &target).await.unwrap();

        assert_eq!(copied, 3);
        assert_eq!(
            std::fs::read_to_string(target.join("skills/nested/b.md")).unwrap(),
            "B"
        );
        assert!(!target.join("link").exists());
    }
}
