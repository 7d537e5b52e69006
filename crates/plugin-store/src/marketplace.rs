//! Marketplace download and staging.
//!
//! Importing from a marketplace is a two-step HTTP exchange:
//!
//! 1. `GET {market}/api/plugins/{id}/download[?version=...]` returns a
//!    [`DownloadDescriptor`] (`url`, `checksum`, `version`, `size`).
//! 2. `GET {url}` returns a zip archive whose SHA-256 digest must equal
//!    `checksum`.
//!
//! The verified archive is unpacked into a fresh temporary directory and
//! handed to the caller as a [`StagedPlugin`]. Nothing is written under the
//! plugin root by this module.

use crate::checksum::verify_checksum;
use crate::error::{PluginStoreError, Result};
use crate::types::METADATA_FILE;
use async_trait::async_trait;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Default cap on archive size (100 MiB).
pub const DEFAULT_MAX_DOWNLOAD_SIZE: u64 = 100 * 1024 * 1024;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_ENTRY_COUNT: usize = 10_000;
const MAX_EXTRACTED_SIZE: u64 = 500 * 1024 * 1024;
const STAGING_PREFIX: &str = "plugin-stage-";

/// Marketplace answer describing where to download a plugin archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadDescriptor {
    /// Archive URL, absolute or relative to the marketplace URL.
    pub url: String,
    /// SHA-256 hex digest, optionally prefixed with `sha256:`.
    pub checksum: String,
    /// Version served.
    #[serde(default)]
    pub version: Option<String>,
    /// Archive size in bytes.
    #[serde(default)]
    pub size: Option<u64>,
}

/// Parameters of a marketplace fetch.
#[derive(Debug)]
pub struct FetchRequest {
    /// Marketplace base URL.
    pub market_url: String,
    /// Plugin id within the marketplace.
    pub plugin_id: String,
    /// Requested version; latest when absent.
    pub version: Option<String>,
    /// Bearer token.
    pub token: Option<SecretString>,
}

/// A verified plugin unpacked into a temporary staging directory.
///
/// The staging directory is removed by [`cleanup`](Self::cleanup) or when
/// the value is dropped.
#[derive(Debug)]
pub struct StagedPlugin {
    dir: Option<TempDir>,
    root: PathBuf,
    descriptor: DownloadDescriptor,
}

impl StagedPlugin {
    /// Wraps a staging directory. `root` is the plugin root inside it.
    #[must_use]
    pub const fn new(dir: TempDir, root: PathBuf, descriptor: DownloadDescriptor) -> Self {
        Self {
            dir: Some(dir),
            root,
            descriptor,
        }
    }

    /// Directory holding the unpacked plugin.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Descriptor the archive was downloaded with.
    #[must_use]
    pub const fn descriptor(&self) -> &DownloadDescriptor {
        &self.descriptor
    }

    /// Returns `true` once the staging directory has been removed.
    #[must_use]
    pub const fn is_cleaned_up(&self) -> bool {
        self.dir.is_none()
    }

    /// Removes the staging directory. Safe to call more than once.
    pub fn cleanup(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!("Removed staging directory {}", path.display()),
                Err(e) => warn!("Failed to remove staging directory {}: {}", path.display(), e),
            }
        }
    }
}

/// Source of marketplace plugins.
///
/// [`MarketplaceClient`] is the HTTP implementation; tests substitute their
/// own.
#[async_trait]
pub trait PluginFetcher: Send + Sync {
    /// Downloads, verifies, and stages the requested plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::DownloadFailure`],
    /// [`PluginStoreError::ChecksumMismatch`], or
    /// [`PluginStoreError::Archive`].
    async fn fetch(&self, request: &FetchRequest) -> Result<StagedPlugin>;
}

/// HTTP marketplace client.
#[derive(Debug, Clone)]
pub struct MarketplaceClient {
    client: reqwest::Client,
    max_download_size: u64,
}

impl MarketplaceClient {
    /// Creates a client with the default timeout and size cap.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::Config`] if the HTTP client cannot be
    /// built.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("plugin-store/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PluginStoreError::Config {
                message: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self::with_client(client))
    }

    /// Wraps an existing HTTP client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            max_download_size: DEFAULT_MAX_DOWNLOAD_SIZE,
        }
    }

    /// Sets the archive size cap in bytes.
    #[must_use]
    pub const fn with_max_download_size(mut self, limit: u64) -> Self {
        self.max_download_size = limit;
        self
    }

    /// Builds the descriptor endpoint URL for `plugin_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginStoreError::DownloadFailure`] if `market_url` is not
    /// a valid base URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use plugin_store::MarketplaceClient;
    ///
    /// let url = MarketplaceClient::descriptor_url("https://market.example/", "my plugin", Some("1.2.0")).unwrap();
    /// assert_eq!(
    ///     url.as_str(),
    ///     "https://market.example/api/plugins/my%20plugin/download?version=1.2.0"
    /// );
    /// ```
    pub fn descriptor_url(market_url: &str, plugin_id: &str, version: Option<&str>) -> Result<Url> {
        let mut url = parse_market_url(market_url)?;
        url.path_segments_mut()
            .map_err(|()| PluginStoreError::DownloadFailure {
                url: market_url.to_string(),
                reason: "marketplace URL cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .extend(["api", "plugins", plugin_id, "download"]);

        if let Some(version) = version {
            url.query_pairs_mut().append_pair("version", version);
        }
        Ok(url)
    }

    async fn fetch_descriptor(
        &self,
        url: &Url,
        token: Option<&SecretString>,
    ) -> Result<DownloadDescriptor> {
        debug!("Requesting download descriptor: {url}");
        let response = self.get(url, token).await?;

        response
            .json::<DownloadDescriptor>()
            .await
            .map_err(|e| PluginStoreError::DownloadFailure {
                url: url.to_string(),
                reason: format!("invalid download descriptor: {e}"),
            })
    }

    async fn download(&self, url: &Url, token: Option<&SecretString>) -> Result<Vec<u8>> {
        debug!("Downloading plugin archive: {url}");
        let mut response = self.get(url, token).await?;
        let limit = self.max_download_size;

        if let Some(len) = response.content_length()
            && len > limit
        {
            return Err(too_large(url, len, limit));
        }

        let capacity = usize::try_from(response.content_length().unwrap_or(0).min(limit))
            .unwrap_or(0);
        let mut bytes = Vec::with_capacity(capacity);

        while let Some(chunk) =
            response
                .chunk()
                .await
                .map_err(|e| PluginStoreError::DownloadFailure {
                    url: url.to_string(),
                    reason: format!("download error: {e}"),
                })?
        {
            bytes.extend_from_slice(&chunk);
            let current = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
            if current > limit {
                return Err(too_large(url, current, limit));
            }
        }

        Ok(bytes)
    }

    async fn get(&self, url: &Url, token: Option<&SecretString>) -> Result<reqwest::Response> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| PluginStoreError::DownloadFailure {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PluginStoreError::DownloadFailure {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl PluginFetcher for MarketplaceClient {
    async fn fetch(&self, request: &FetchRequest) -> Result<StagedPlugin> {
        let market = parse_market_url(&request.market_url)?;
        let descriptor_url = Self::descriptor_url(
            &request.market_url,
            &request.plugin_id,
            request.version.as_deref(),
        )?;
        let descriptor = self
            .fetch_descriptor(&descriptor_url, request.token.as_ref())
            .await?;

        let download_url =
            market
                .join(&descriptor.url)
                .map_err(|e| PluginStoreError::DownloadFailure {
                    url: descriptor.url.clone(),
                    reason: format!("invalid download URL: {e}"),
                })?;

        // Credentials only travel to the marketplace's own origin.
        let token = request
            .token
            .as_ref()
            .filter(|_| download_url.origin() == market.origin());
        let bytes = self.download(&download_url, token).await?;

        if let Some(expected) = descriptor.size {
            let actual = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
            if actual != expected {
                return Err(PluginStoreError::DownloadFailure {
                    url: download_url.to_string(),
                    reason: format!("expected {expected} bytes, received {actual}"),
                });
            }
        }

        verify_checksum(&bytes, &descriptor.checksum)?;
        info!(
            "Downloaded and verified {} ({} bytes)",
            request.plugin_id,
            bytes.len()
        );

        stage_archive(bytes, descriptor).await
    }
}

/// Unpacks a zip archive into a fresh staging directory.
///
/// Runs on the blocking pool. Entries with unsafe paths and symlinks are
/// skipped.
///
/// # Errors
///
/// Returns [`PluginStoreError::Archive`] if the bytes are not a valid zip
/// archive or exceed extraction limits, or
/// [`PluginStoreError::IoFailure`] if staging fails.
pub async fn stage_archive(bytes: Vec<u8>, descriptor: DownloadDescriptor) -> Result<StagedPlugin> {
    let dir = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir()
        .map_err(|e| PluginStoreError::io(std::env::temp_dir(), e))?;
    let dest = dir.path().to_path_buf();

    let root = tokio::task::spawn_blocking(move || {
        let count = extract_zip(&bytes, &dest)?;
        debug!("Extracted {count} files into {}", dest.display());
        resolve_plugin_root(&dest)
    })
    .await
    .map_err(|e| PluginStoreError::Archive {
        reason: format!("extraction task failed: {e}"),
    })??;

    Ok(StagedPlugin::new(dir, root, descriptor))
}

fn parse_market_url(market_url: &str) -> Result<Url> {
    Url::parse(market_url).map_err(|e| PluginStoreError::DownloadFailure {
        url: market_url.to_string(),
        reason: format!("invalid marketplace URL: {e}"),
    })
}

fn too_large(url: &Url, size: u64, limit: u64) -> PluginStoreError {
    PluginStoreError::DownloadFailure {
        url: url.to_string(),
        reason: format!("archive of {size} bytes exceeds the {limit} byte limit"),
    }
}

fn archive_error(e: impl std::fmt::Display) -> PluginStoreError {
    PluginStoreError::Archive {
        reason: e.to_string(),
    }
}

/// Extracts `data` into `dest`, returning the number of files written.
fn extract_zip(data: &[u8], dest: &Path) -> Result<usize> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data)).map_err(archive_error)?;

    if archive.len() > MAX_ENTRY_COUNT {
        return Err(archive_error(format!(
            "archive exceeds maximum entry count ({MAX_ENTRY_COUNT})"
        )));
    }

    let mut total_size: u64 = 0;
    let mut files = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(archive_error)?;

        let Some(relative) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            warn!("Skipping archive entry with unsafe path: {}", entry.name());
            continue;
        };

        if let Some(mode) = entry.unix_mode()
            && (mode & 0o170_000) == 0o120_000
        {
            debug!("Skipping symlink in archive: {}", entry.name());
            continue;
        }

        total_size = total_size.saturating_add(entry.size());
        if total_size > MAX_EXTRACTED_SIZE {
            return Err(archive_error(format!(
                "archive exceeds maximum extracted size ({MAX_EXTRACTED_SIZE} bytes)"
            )));
        }

        let out = dest.join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out).map_err(|e| PluginStoreError::io(&out, e))?;
            continue;
        }

        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PluginStoreError::io(parent, e))?;
        }
        let mut file = std::fs::File::create(&out).map_err(|e| PluginStoreError::io(&out, e))?;
        std::io::copy(&mut entry, &mut file).map_err(|e| PluginStoreError::io(&out, e))?;
        files += 1;
    }

    Ok(files)
}

/// Picks the plugin root inside an extracted archive.
///
/// A top-level `plugin.json` marks the staging directory itself. Otherwise a
/// single top-level directory is unwrapped.
fn resolve_plugin_root(extract_dir: &Path) -> Result<PathBuf> {
    if extract_dir.join(METADATA_FILE).is_file() {
        return Ok(extract_dir.to_path_buf());
    }

    let entries: Vec<std::fs::DirEntry> = std::fs::read_dir(extract_dir)
        .map_err(|e| PluginStoreError::io(extract_dir, e))?
        .collect::<std::io::Result<_>>()
        .map_err(|e| PluginStoreError::io(extract_dir, e))?;

    if let [only] = entries.as_slice()
        && only.file_type().is_ok_and(|t| t.is_dir())
    {
        return Ok(only.path());
    }

    Ok(extract_dir.to_path_buf())
}
