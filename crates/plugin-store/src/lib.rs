//! Local plugin store.
//!
//! Manages user-scoped plugins on disk: create, update, delete, import from
//! a local directory or a remote marketplace, and manage each plugin's
//! skills, agents, commands, and MCP server definitions. Every write is
//! crash-safe and every mutation of one plugin is serialized.
//!
//! # Architecture
//!
//! Plugins live under a single root:
//! ```text
//! <root>/
//! └── plugins/
//!     └── <plugin-id>/
//!         ├── plugin.json       # Metadata (format 1.0)
//!         ├── skills/
//!         ├── agents/
//!         ├── commands/
//!         └── mcp/
//! ```
//!
//! The disk is the source of truth. The in-memory [`Registry`] is rebuilt
//! from it on open and updated only after a write has been committed.
//!
//! # Features
//!
//! - **Atomic writes**: temp file, fsync, rename ([`atomic`])
//! - **Per-plugin locking**: FIFO handoff keyed by plugin id ([`LockRegistry`])
//! - **Marketplace import**: descriptor lookup, bounded download, SHA-256
//!   verification, and sandboxed zip extraction ([`MarketplaceClient`])
//! - **Root resolution**: override, environment, config file, default
//!   ([`plugin_core::ConfigResolver`])
//!
//! # Examples
//!
//! ```
//! use plugin_store::{CreatePluginInput, PluginFilter, PluginManager};
//! use plugin_core::ResourceKind;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let temp = tempfile::tempdir()?;
//! let manager = PluginManager::open(temp.path()).await?;
//!
//! manager
//!     .create(
//!         CreatePluginInput::new("Review Tools")
//!             .with_tags(["review"])
//!             .with_command("review.md", "Review the current diff."),
//!     )
//!     .await?;
//!
//! for plugin in manager.list(&PluginFilter::new().with_tag("review")).await {
//!     let commands = manager
//!         .list_resources(plugin.id.as_str(), ResourceKind::Command)
//!         .await?;
//!     println!("{} v{}: {:?}", plugin.id, plugin.version, commands);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! Archives are verified against the marketplace checksum before they are
//! extracted, and entries escaping the staging directory are rejected.
//! The checksum proves integrity against the descriptor, not authenticity
//! of the marketplace itself.

#![deny(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations)]

pub mod atomic;
pub mod checksum;
pub mod error;
pub mod layout;
pub mod lock;
pub mod manager;
pub mod marketplace;
pub mod registry;
pub mod types;

// Re-export main types
pub use checksum::constant_time_compare;
pub use error::{PluginStoreError, Result};
pub use layout::PluginFs;
pub use lock::{LockRegistry, PathLockGuard};
pub use manager::{PluginManager, PluginManagerBuilder};
pub use marketplace::{
    DownloadDescriptor, FetchRequest, MarketplaceClient, PluginFetcher, StagedPlugin,
    stage_archive,
};
pub use registry::{Registry, RegistrySchema};
pub use types::{
    CreatePluginInput, DeleteOptions, ImportPathInput, ImportUrlInput, METADATA_FILE,
    PluginFilter, PluginPatch, ResourceInput,
};
