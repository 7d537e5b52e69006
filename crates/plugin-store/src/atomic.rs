//! Crash-safe file replacement.
//!
//! Content is written to a hidden sibling temp file
//! (`.<file>.<unix-millis>.<random>.tmp`), flushed with `sync_all`, and then
//! renamed over the target. Readers observe either the old content or the
//! new content, never a partial write.
//!
//! # Examples
//!
//! ```
//! use plugin_store::atomic::write_atomic;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let temp = tempfile::tempdir()?;
//! let path = temp.path().join("plugin.json");
//! write_atomic(&path, b"{}").await?;
//! assert_eq!(std::fs::read(&path)?, b"{}");
//! # Ok(())
//! # }
//! ```

use crate::error::{PluginStoreError, Result};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Writes `bytes` to `path` atomically.
///
/// # Errors
///
/// Returns [`PluginStoreError::IoFailure`] carrying `path` if the temp file
/// cannot be written or renamed. The temp file is removed on failure.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    StagedWrite::stage(path, bytes).await?.commit().await
}

/// A fully written temp file waiting to be renamed onto its target.
///
/// Dropping a `StagedWrite` without calling [`commit`](Self::commit)
/// removes the temp file and leaves the target untouched.
#[derive(Debug)]
pub struct StagedWrite {
    target: PathBuf,
    temp: PathBuf,
    committed: bool,
}

impl StagedWrite {
    /// Writes `bytes` to a temp file next to `path` and flushes it to disk.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::IoFailure`] carrying `path` if `path` has
    /// no file name or the temp file cannot be written.
    pub async fn stage(path: impl Into<PathBuf>, bytes: &[u8]) -> Result<Self> {
        let target = path.into();
        let temp = temp_path_for(&target)?;
        let staged = Self {
            target,
            temp,
            committed: false,
        };

        staged.write_temp(bytes).await?;
        debug!(
            "Staged {} bytes for {}",
            bytes.len(),
            staged.target.display()
        );
        Ok(staged)
    }

    /// Renames the temp file onto the target.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::IoFailure`] carrying the target path if
    /// the rename fails. The temp file is removed in that case.
    pub async fn commit(mut self) -> Result<()> {
        tokio::fs::rename(&self.temp, &self.target)
            .await
            .map_err(|e| PluginStoreError::io(&self.target, e))?;
        self.committed = true;
        Ok(())
    }

    /// Path the content will land at.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Path of the temp file holding the staged content.
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    async fn write_temp(&self, bytes: &[u8]) -> Result<()> {
        let io_err = |e| PluginStoreError::io(&self.target, e);

        let mut file = tokio::fs::File::create(&self.temp).await.map_err(io_err)?;
        file.write_all(bytes).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.temp) {
            Ok(()) => debug!("Removed uncommitted temp file {}", self.temp.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!(
                "Failed to remove temp file {}: {}",
                self.temp.display(),
                e
            ),
        }
    }
}

/// Returns `true` if `name` looks like a temp artifact of this module.
#[must_use]
pub fn is_temp_artifact(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

fn temp_path_for(target: &Path) -> Result<PathBuf> {
    let file_name = target.file_name().ok_or_else(|| {
        PluginStoreError::io(
            target,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
        )
    })?;

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    let temp_name = format!(
        ".{}.{millis}.{}.tmp",
        file_name.to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    );

    Ok(target.with_file_name(temp_name))
}
