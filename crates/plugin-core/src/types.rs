//! Strong domain types for the plugin store.
//!
//! Identifiers double as directory and file names, so every newtype here
//! validates its value on construction and on deserialization.
//!
//! # Examples
//!
//! ```
//! use plugin_core::{PluginId, ResourceName};
//!
//! let id = PluginId::from_name("Example Plugin").unwrap();
//! assert_eq!(id.as_str(), "example-plugin");
//!
//! let skill = ResourceName::new("greeting.md").unwrap();
//! assert_eq!(skill.as_str(), "greeting.md");
//! ```

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Current `plugin.json` format version.
pub const FORMAT_VERSION: &str = "1.0";

/// Version assigned to plugins created without an explicit version.
pub const DEFAULT_VERSION: &str = "0.0.0";

/// Maximum length of an identifier or resource name, in bytes.
const MAX_NAME_LEN: usize = 128;

/// Plugin identifier (newtype over String).
///
/// Unique within the registry and used verbatim as the plugin's directory
/// name, so it must be a single safe path component.
///
/// # Examples
///
/// ```
/// use plugin_core::PluginId;
///
/// let id = PluginId::new("my-plugin").unwrap();
/// assert_eq!(id.to_string(), "my-plugin");
///
/// assert!(PluginId::new("a/b").is_err());
/// assert!(PluginId::new("..").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PluginId(String);

impl PluginId {
    /// Creates a plugin identifier, validating it as a path component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] if the identifier is empty, too
    /// long, hidden (leading `.`), or contains separators or control
    /// characters.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_path_component("id", &id)?;
        Ok(Self(id))
    }

    /// Derives an identifier from a human-readable plugin name.
    ///
    /// ASCII letters and digits are lowercased and kept; every other run of
    /// characters becomes a single `-`. Leading and trailing dashes are
    /// trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] if nothing usable remains.
    ///
    /// # Examples
    ///
    /// ```
    /// use plugin_core::PluginId;
    ///
    /// assert_eq!(PluginId::from_name("example-plugin").unwrap().as_str(), "example-plugin");
    /// assert_eq!(PluginId::from_name("  My  Cool_Plugin! ").unwrap().as_str(), "my-cool-plugin");
    /// assert!(PluginId::from_name("!!!").is_err());
    /// ```
    pub fn from_name(name: &str) -> Result<Self> {
        let mut slug = String::with_capacity(name.len());
        let mut pending_dash = false;

        for c in name.chars() {
            if c.is_ascii_alphanumeric() {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(c.to_ascii_lowercase());
            } else {
                pending_dash = true;
            }
        }

        if slug.is_empty() {
            return Err(Error::validation(
                "name",
                format!("cannot derive a plugin id from '{name}'"),
            ));
        }

        slug.truncate(MAX_NAME_LEN);
        let trimmed = slug.trim_end_matches('-').to_string();
        Self::new(trimmed)
    }

    /// Returns the identifier as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `PluginId` and returns the inner `String`.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PluginId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PluginId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PluginId> for String {
    fn from(id: PluginId) -> Self {
        id.0
    }
}

/// Name of a single sub-resource file (skill, agent, command, MCP server).
///
/// Unique within its plugin and collection kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceName(String);

impl ResourceName {
    /// Creates a resource name, validating it as a path component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] under the same rules as
    /// [`PluginId::new`].
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_path_component("resource name", &name)?;
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ResourceName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ResourceName> for String {
    fn from(name: ResourceName) -> Self {
        name.0
    }
}

/// Sub-resource collection kinds stored inside a plugin directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// Skill documents, stored under `skills/`.
    Skill,
    /// Agent definitions, stored under `agents/`.
    Agent,
    /// Slash-command definitions, stored under `commands/`.
    Command,
    /// MCP server definitions (JSON), stored under `mcp/`.
    McpServer,
}

impl ResourceKind {
    /// All collection kinds, in on-disk listing order.
    pub const ALL: [Self; 4] = [Self::Skill, Self::Agent, Self::Command, Self::McpServer];

    /// Name of the sub-directory holding this collection.
    ///
    /// # Examples
    ///
    /// ```
    /// use plugin_core::ResourceKind;
    ///
    /// assert_eq!(ResourceKind::Skill.dir_name(), "skills");
    /// assert_eq!(ResourceKind::McpServer.dir_name(), "mcp");
    /// ```
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Skill => "skills",
            Self::Agent => "agents",
            Self::Command => "commands",
            Self::McpServer => "mcp",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Skill => "skill",
            Self::Agent => "agent",
            Self::Command => "command",
            Self::McpServer => "mcp-server",
        };
        f.write_str(label)
    }
}

/// Provenance of an installed plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginSource {
    /// Created through the store's `create` operation.
    LocalCreated,
    /// Copied from a directory on the local filesystem.
    ImportedPath,
    /// Downloaded from a marketplace.
    ImportedUrl,
}

impl fmt::Display for PluginSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::LocalCreated => "local-created",
            Self::ImportedPath => "imported-path",
            Self::ImportedUrl => "imported-url",
        };
        f.write_str(label)
    }
}

/// The metadata document stored as `plugin.json` in each plugin directory.
///
/// This is the serialized projection of [`PluginMeta`] without the
/// positional `location` field.
///
/// # Examples
///
/// ```
/// use plugin_core::{PluginId, PluginJson, PluginSource};
///
/// let id = PluginId::new("example").unwrap();
/// let doc = PluginJson::new(id, "Example", PluginSource::LocalCreated);
///
/// let json = serde_json::to_string_pretty(&doc).unwrap();
/// assert!(json.contains("\"source\": \"local-created\""));
/// assert!(!json.contains("location"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginJson {
    /// Document format version for future schema migrations.
    #[serde(default = "default_format_version")]
    pub format_version: String,

    /// Stable plugin identifier; equals the directory name.
    pub id: PluginId,

    /// Human-readable name.
    pub name: String,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Semantic-version-like string.
    #[serde(default = "default_version")]
    pub version: String,

    /// Ordered tags.
    #[serde(default)]
    pub tags: Vec<String>,

    /// How the plugin was installed.
    pub source: PluginSource,

    /// Top-level entries copied in by an import beyond the managed layout.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imported_entries: Vec<String>,

    /// Creation timestamp.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Timestamp of the last metadata change.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl PluginJson {
    /// Creates a document with default description, version, and tags.
    #[must_use]
    pub fn new(id: PluginId, name: impl Into<String>, source: PluginSource) -> Self {
        let now = Utc::now();
        Self {
            format_version: FORMAT_VERSION.to_string(),
            id,
            name: name.into(),
            description: String::new(),
            version: DEFAULT_VERSION.to_string(),
            tags: Vec::new(),
            source,
            imported_entries: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

fn default_format_version() -> String {
    FORMAT_VERSION.to_string()
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

/// Canonical registry record for one installed plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMeta {
    /// Stable plugin identifier.
    pub id: PluginId,
    /// Human-readable name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Semantic-version-like string.
    pub version: String,
    /// Ordered tags.
    pub tags: Vec<String>,
    /// How the plugin was installed.
    pub source: PluginSource,
    /// Top-level entries an import brought in beyond the managed layout.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imported_entries: Vec<String>,
    /// Absolute path of the plugin directory.
    pub location: PathBuf,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last metadata change.
    pub updated_at: DateTime<Utc>,
}

impl PluginMeta {
    /// Builds a record from a metadata document and the directory it was
    /// read from.
    #[must_use]
    pub fn from_document(doc: PluginJson, location: PathBuf) -> Self {
        Self {
            id: doc.id,
            name: doc.name,
            description: doc.description,
            version: doc.version,
            tags: doc.tags,
            source: doc.source,
            imported_entries: doc.imported_entries,
            location,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }

    /// Projects the record back onto its on-disk document.
    #[must_use]
    pub fn to_document(&self) -> PluginJson {
        PluginJson {
            format_version: FORMAT_VERSION.to_string(),
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            version: self.version.clone(),
            tags: self.tags.clone(),
            source: self.source,
            imported_entries: self.imported_entries.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Returns `true` if the plugin carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Validates a semantic-version-like string: `MAJOR.MINOR.PATCH` with an
/// optional `-pre` or `+build` suffix.
///
/// # Errors
///
/// Returns [`Error::ValidationError`] for any other shape.
///
/// # Examples
///
/// ```
/// use plugin_core::validate_version;
///
/// assert!(validate_version("1.1.0").is_ok());
/// assert!(validate_version("2.0.0-beta.1+build.5").is_ok());
/// assert!(validate_version("1.0").is_err());
/// assert!(validate_version("v1.0.0").is_err());
/// ```
pub fn validate_version(version: &str) -> Result<()> {
    let split_at = version.find(['-', '+']).unwrap_or(version.len());
    let (core, suffix) = version.split_at(split_at);

    let parts: Vec<&str> = core.split('.').collect();
    let core_ok = parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if !core_ok {
        return Err(Error::validation(
            "version",
            format!("'{version}' is not of the form MAJOR.MINOR.PATCH"),
        ));
    }

    if let Some(rest) = suffix.get(1..) {
        let suffix_ok = !rest.is_empty()
            && rest
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+'));
        if !suffix_ok {
            return Err(Error::validation(
                "version",
                format!("'{version}' has an invalid pre-release or build suffix"),
            ));
        }
    }

    Ok(())
}

/// Validates that `value` is safe to use as a single path component.
///
/// Rejects names that:
/// - Are empty or longer than 128 bytes
/// - Are `.` or `..`, or start with `.` (reserved for temp artifacts)
/// - Contain path separators (/ or \)
/// - Contain control characters
fn validate_path_component(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::validation(field, "cannot be empty"));
    }

    if value.len() > MAX_NAME_LEN {
        return Err(Error::validation(
            field,
            format!("cannot exceed {MAX_NAME_LEN} bytes"),
        ));
    }

    if value.starts_with('.') {
        return Err(Error::validation(
            field,
            format!("'{value}' cannot start with '.'"),
        ));
    }

    if value.contains('/') || value.contains('\\') {
        return Err(Error::validation(
            field,
            format!("'{value}' cannot contain path separators"),
        ));
    }

    if value.chars().any(char::is_control) {
        return Err(Error::validation(
            field,
            "cannot contain control characters",
        ));
    }

    Ok(())
}
