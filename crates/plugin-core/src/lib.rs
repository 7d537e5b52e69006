//! Core types, errors, and configuration for the local plugin store.
//!
//! This crate provides the foundational types shared by the store crates.
//!
//! # Architecture
//!
//! The core consists of:
//! - Strong domain types (`PluginId`, `ResourceName`)
//! - The on-disk metadata document (`PluginJson`) and its registry record
//!   (`PluginMeta`)
//! - Error hierarchy with contextual information
//! - Plugin root resolution (`ConfigResolver`)

#![deny(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations)]

pub mod config;
mod error;
mod types;

pub use config::{ConfigResolver, ROOT_ENV_VAR, ResolvedRoot, RootOrigin, StoreConfig};
pub use error::{Error, Result};
pub use types::{
    DEFAULT_VERSION, FORMAT_VERSION, PluginId, PluginJson, PluginMeta, PluginSource, ResourceKind,
    ResourceName, validate_version,
};
