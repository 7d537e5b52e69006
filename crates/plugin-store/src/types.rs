//! Input and query types for plugin store operations.

use plugin_core::{PluginMeta, PluginSource, ResourceKind};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Name of the metadata file inside each plugin directory.
pub const METADATA_FILE: &str = "plugin.json";

/// Name of the directory under the root holding one sub-directory per plugin.
pub const PLUGINS_DIR: &str = "plugins";

/// Alternative manifest location used by packaged plugins.
pub const PACKAGED_MANIFEST: &str = ".claude-plugin/plugin.json";

/// One sub-resource supplied at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInput {
    /// File name within the collection directory.
    #[serde(alias = "id")]
    pub name: String,
    /// File content.
    pub content: String,
}

impl ResourceInput {
    /// Creates a resource input.
    #[must_use]
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Input for [`PluginManager::create`](crate::PluginManager::create).
///
/// # Examples
///
/// ```
/// use plugin_store::CreatePluginInput;
///
/// let input = CreatePluginInput::new("Example Plugin")
///     .with_description("Greets people")
///     .with_tags(["demo", "greeting"])
///     .with_skill("greeting.md", "# Greeting\n\nSay hello.");
///
/// assert_eq!(input.skills.len(), 1);
/// assert!(input.id.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreatePluginInput {
    /// Explicit id. Derived from `name` when absent.
    pub id: Option<String>,
    /// Human-readable name (required, non-blank).
    pub name: String,
    /// Description, defaults to empty.
    pub description: Option<String>,
    /// Version, defaults to `0.0.0`.
    pub version: Option<String>,
    /// Tags; blank entries are dropped and the rest trimmed.
    pub tags: Vec<String>,
    /// Skill documents.
    pub skills: Vec<ResourceInput>,
    /// Agent definitions.
    pub agents: Vec<ResourceInput>,
    /// Command definitions.
    pub commands: Vec<ResourceInput>,
    /// MCP server definitions (JSON text).
    pub mcp_servers: Vec<ResourceInput>,
    /// Replace an existing plugin with the same id.
    pub force: bool,
}

impl CreatePluginInput {
    /// Creates an input with just a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets an explicit id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a skill document.
    #[must_use]
    pub fn with_skill(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.skills.push(ResourceInput::new(name, content));
        self
    }

    /// Adds an agent definition.
    #[must_use]
    pub fn with_agent(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.agents.push(ResourceInput::new(name, content));
        self
    }

    /// Adds a command definition.
    #[must_use]
    pub fn with_command(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.commands.push(ResourceInput::new(name, content));
        self
    }

    /// Adds an MCP server definition.
    #[must_use]
    pub fn with_mcp_server(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.mcp_servers.push(ResourceInput::new(name, content));
        self
    }

    /// Replaces an existing plugin with the same id.
    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Resources grouped by collection kind.
    pub(crate) fn resources(&self) -> [(ResourceKind, &[ResourceInput]); 4] {
        [
            (ResourceKind::Skill, self.skills.as_slice()),
            (ResourceKind::Agent, self.agents.as_slice()),
            (ResourceKind::Command, self.commands.as_slice()),
            (ResourceKind::McpServer, self.mcp_servers.as_slice()),
        ]
    }
}

/// Partial metadata update for [`PluginManager::update`](crate::PluginManager::update).
///
/// `id` and `location` are immutable and therefore absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginPatch {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New version.
    pub version: Option<String>,
    /// Replacement tag list.
    pub tags: Option<Vec<String>>,
}

impl PluginPatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Replaces the tag list.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Returns `true` if the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.version.is_none()
            && self.tags.is_none()
    }
}

/// Options for [`PluginManager::delete`](crate::PluginManager::delete).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Remove the directory even if it holds unmanaged entries.
    pub force: bool,
}

impl DeleteOptions {
    /// Options that remove unmanaged entries too.
    #[must_use]
    pub const fn forced() -> Self {
        Self { force: true }
    }
}

/// Input for [`PluginManager::import_from_path`](crate::PluginManager::import_from_path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportPathInput {
    /// Source directory to copy from.
    pub path: PathBuf,
    /// Explicit id. Derived from the manifest or directory name when absent.
    pub id: Option<String>,
    /// Replace an existing plugin with the same id.
    pub force: bool,
}

impl ImportPathInput {
    /// Creates an input importing `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            id: None,
            force: false,
        }
    }

    /// Sets an explicit id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Replaces an existing plugin with the same id.
    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Input for [`PluginManager::import_from_url`](crate::PluginManager::import_from_url).
#[derive(Debug)]
pub struct ImportUrlInput {
    /// Marketplace base URL.
    pub market_url: String,
    /// Plugin id within the marketplace.
    pub plugin_id: String,
    /// Bearer token for the marketplace.
    pub token: Option<SecretString>,
    /// Requested version; latest when absent.
    pub version: Option<String>,
    /// Local id. Defaults to `plugin_id`.
    pub id: Option<String>,
    /// Replace an existing plugin with the same id.
    pub force: bool,
}

impl ImportUrlInput {
    /// Creates an input importing `plugin_id` from `market_url`.
    #[must_use]
    pub fn new(market_url: impl Into<String>, plugin_id: impl Into<String>) -> Self {
        Self {
            market_url: market_url.into(),
            plugin_id: plugin_id.into(),
            token: None,
            version: None,
            id: None,
            force: false,
        }
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(SecretString::from(token.into()));
        self
    }

    /// Requests a specific version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Sets the local id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Replaces an existing plugin with the same id.
    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Registry query. Empty fields match everything.
///
/// # Examples
///
/// ```
/// use plugin_store::PluginFilter;
/// use plugin_core::PluginSource;
///
/// let filter = PluginFilter::new()
///     .with_tag("demo")
///     .with_source(PluginSource::LocalCreated)
///     .with_query("greet");
/// assert!(!filter.is_empty());
/// assert!(PluginFilter::new().is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginFilter {
    /// Tags that must all be present.
    pub tags: Vec<String>,
    /// Required source.
    pub source: Option<PluginSource>,
    /// Case-insensitive substring of name or description.
    pub query: Option<String>,
}

impl PluginFilter {
    /// Creates a filter matching every plugin.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `tag`.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Requires `source`.
    #[must_use]
    pub const fn with_source(mut self, source: PluginSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Requires `query` in the name or description.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Returns `true` if the filter matches everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
            && self.source.is_none()
            && self.query.as_deref().is_none_or(|q| q.trim().is_empty())
    }

    /// Returns `true` if `meta` satisfies every criterion.
    #[must_use]
    pub fn matches(&self, meta: &PluginMeta) -> bool {
        if self.source.is_some_and(|source| source != meta.source) {
            return false;
        }

        if !self.tags.iter().all(|tag| meta.has_tag(tag)) {
            return false;
        }

        match self.query.as_deref().map(str::trim) {
            Some(query) if !query.is_empty() => {
                let needle = query.to_lowercase();
                meta.name.to_lowercase().contains(&needle)
                    || meta.description.to_lowercase().contains(&needle)
            }
            _ => true,
        }
    }
}

/// Metadata discovered in an imported directory.
///
/// Read leniently: fields of the wrong type are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SourceManifest {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub tags: Vec<String>,
}

impl SourceManifest {
    pub(crate) fn from_value(value: &Value) -> Self {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
        };
        let list = |key: &str| -> Vec<String> {
            value
                .get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut tags = list("tags");
        if tags.is_empty() {
            tags = list("keywords");
        }

        Self {
            id: text("id"),
            name: text("name"),
            description: text("description"),
            version: text("version"),
            tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use plugin_core::PluginId;
    use serde_json::json;

    fn meta(name: &str, description: &str, tags: &[&str], source: PluginSource) -> PluginMeta {
        PluginMeta {
            id: PluginId::from_name(name).unwrap(),
            name: name.to_string(),
            description: description.to_string(),
            version: "1.0.0".to_string(),
            tags: tags.iter().map(ToString::to_string).collect(),
            source,
            imported_entries: Vec::new(),
            location: PathBuf::from("/plugins").join(name),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_resource_input_accepts_id_alias() {
        let input: ResourceInput =
            serde_json::from_str(r#"{"id": "deploy.md", "content": "ship it"}"#).unwrap();
        assert_eq!(input.name, "deploy.md");
    }

    #[test]
    fn test_create_input_deserializes_with_defaults() {
        let input: CreatePluginInput = serde_json::from_value(json!({
            "name": "Example",
            "skills": [{"name": "a.md", "content": "A"}]
        }))
        .unwrap();

        assert_eq!(input.name, "Example");
        assert_eq!(input.skills.len(), 1);
        assert!(input.agents.is_empty());
        assert!(!input.force);
    }

    #[test]
    fn test_create_input_resources_grouping() {
        let input = CreatePluginInput::new("x")
            .with_skill("s", "")
            .with_agent("a", "")
            .with_command("c", "")
            .with_mcp_server("m", "{}");

        let groups = input.resources();
        assert_eq!(groups[0].0, ResourceKind::Skill);
        assert_eq!(groups[3].0, ResourceKind::McpServer);
        assert!(groups.iter().all(|(_, items)| items.len() == 1));
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(PluginPatch::new().is_empty());
        assert!(!PluginPatch::new().with_version("1.0.0").is_empty());
    }

    #[test]
    fn test_filter_tags_all_required() {
        let m = meta("Alpha", "", &["a", "b"], PluginSource::LocalCreated);

        assert!(PluginFilter::new().with_tag("a").matches(&m));
        assert!(PluginFilter::new().with_tag("a").with_tag("b").matches(&m));
        assert!(!PluginFilter::new().with_tag("a").with_tag("c").matches(&m));
    }

    #[test]
    fn test_filter_source_and_query() {
        let m = meta(
            "Greeter",
            "Says Hello politely",
            &[],
            PluginSource::ImportedPath,
        );

        assert!(PluginFilter::new().with_query("hello").matches(&m));
        assert!(PluginFilter::new().with_query("GREET").matches(&m));
        assert!(!PluginFilter::new().with_query("farewell").matches(&m));
        assert!(PluginFilter::new().with_query("   ").matches(&m));

        assert!(
            PluginFilter::new()
                .with_source(PluginSource::ImportedPath)
                .matches(&m)
        );
        assert!(
            !PluginFilter::new()
                .with_source(PluginSource::ImportedUrl)
                .matches(&m)
        );
    }

    #[test]
    fn test_source_manifest_is_lenient() {
        let manifest = SourceManifest::from_value(&json!({
            "name": "  Packaged  ",
            "description": 42,
            "version": "2.0.0",
            "keywords": ["x", 1, "y"]
        }));

        assert_eq!(manifest.name.as_deref(), Some("Packaged"));
        assert_eq!(manifest.description, None);
        assert_eq!(manifest.version.as_deref(), Some("2.0.0"));
        assert_eq!(manifest.tags, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_source_manifest_prefers_tags_over_keywords() {
        let manifest = SourceManifest::from_value(&json!({
            "tags": ["t"],
            "keywords": ["k"]
        }));
        assert_eq!(manifest.tags, vec!["t".to_string()]);
    }

    #[test]
    fn test_import_url_input_debug_redacts_token() {
        let input = ImportUrlInput::new("http://market", "demo").with_token("super-secret");
        let debug = format!("{input:?}");
        assert!(!debug.contains("super-secret"));
    }
}
