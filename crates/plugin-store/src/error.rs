//! Error types for plugin store operations.

use std::path::PathBuf;

/// Result type for plugin store operations.
pub type Result<T> = std::result::Result<T, PluginStoreError>;

/// Errors that can occur during plugin store operations.
#[derive(thiserror::Error, Debug)]
pub enum PluginStoreError {
    /// Input rejected before anything touched the disk.
    ///
    /// Covers blank names, malformed versions, unsafe identifiers, duplicate
    /// resource names, and invalid import sources.
    #[error("Validation failed: {reason}")]
    Validation {
        /// Description of why the input is invalid
        reason: String,
    },

    /// Plugin (or one of its resources) was not found.
    ///
    /// # Examples
    ///
    /// ```
    /// use plugin_store::{PluginManager, PluginStoreError};
    /// use plugin_core::ResourceKind;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let temp = tempfile::tempdir()?;
    /// let manager = PluginManager::open(temp.path()).await?;
    ///
    /// let result = manager.list_resources("nonexistent", ResourceKind::Skill).await;
    /// assert!(matches!(result, Err(PluginStoreError::NotFound { .. })));
    /// # Ok(())
    /// # }
    /// ```
    #[error("Not found: {what}")]
    NotFound {
        /// Identifier of the missing plugin or resource
        what: String,
    },

    /// A plugin with the same id is already installed.
    ///
    /// Pass `force` to the creating operation to replace it.
    #[error("Plugin already exists: {id}")]
    AlreadyExists {
        /// Id of the existing plugin
        id: String,
    },

    /// I/O error on a specific path.
    #[error("IO error on {}: {source}", path.display())]
    IoFailure {
        /// Path the operation failed on
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A file exists but its contents could not be read or understood.
    ///
    /// Raised for missing or corrupt `plugin.json`, unsupported format
    /// versions, and absent resource files.
    #[error("Failed to read {}: {reason}", path.display())]
    ReadFailure {
        /// Path of the unreadable file
        path: PathBuf,
        /// Description of the failure
        reason: String,
    },

    /// Marketplace request or download failed.
    #[error("Download from {url} failed: {reason}")]
    DownloadFailure {
        /// URL that was requested
        url: String,
        /// Status or transport error
        reason: String,
    },

    /// Downloaded archive does not match the advertised digest.
    ///
    /// # Security
    ///
    /// No plugin directory is created and nothing is registered when this
    /// error is returned.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Digest advertised by the marketplace
        expected: String,
        /// Digest of the downloaded bytes
        actual: String,
    },

    /// Downloaded archive could not be unpacked.
    #[error("Invalid plugin archive: {reason}")]
    Archive {
        /// Description of the archive problem
        reason: String,
    },

    /// Plugin directory holds files the store does not manage.
    ///
    /// Deleting such a plugin requires `force`.
    #[error("Plugin {id} contains unmanaged entries: {}", entries.join(", "))]
    UnmanagedContent {
        /// Id of the plugin
        id: String,
        /// Names of the unmanaged entries
        entries: Vec<String>,
    },

    /// Plugin root could not be resolved.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration problem
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PluginStoreError {
    /// Returns true if this error is recoverable.
    ///
    /// Recoverable errors are user errors (invalid input, missing or
    /// conflicting plugins) rather than system errors (I/O failures,
    /// corrupt downloads).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::NotFound { .. }
                | Self::AlreadyExists { .. }
                | Self::UnmanagedContent { .. }
        )
    }

    /// Returns true if this is a `NotFound` error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoFailure {
            path: path.into(),
            source,
        }
    }
}

impl From<plugin_core::Error> for PluginStoreError {
    fn from(err: plugin_core::Error) -> Self {
        match err {
            plugin_core::Error::ValidationError { field, reason } => Self::Validation {
                reason: format!("{field}: {reason}"),
            },
            plugin_core::Error::ConfigError { message, source } => Self::Config {
                message: match source {
                    Some(source) => format!("{message}: {source}"),
                    None => message,
                },
            },
        }
    }
}
