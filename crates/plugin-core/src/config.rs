//! Plugin root resolution.
//!
//! The store keeps everything under a single root directory. The root is
//! chosen from, in order of precedence:
//!
//! 1. An explicit override passed by the caller
//! 2. The `PLUGIN_STORE_ROOT` environment variable
//! 3. `plugin_root` in the persisted config file
//!    (`~/.config/plugin-store/config.toml` on Linux)
//! 4. `~/.plugin-store`
//!
//! ```toml
//! # ~/.config/plugin-store/config.toml
//! plugin_root = "~/work/plugins"
//! ```
//!
//! # Examples
//!
//! ```
//! use plugin_core::{ConfigResolver, RootOrigin};
//!
//! let resolved = ConfigResolver::new()
//!     .with_override("/srv/plugins")
//!     .resolve()
//!     .unwrap();
//!
//! assert_eq!(resolved.origin, RootOrigin::Override);
//! assert!(resolved.path.is_absolute());
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable that overrides the persisted plugin root.
pub const ROOT_ENV_VAR: &str = "PLUGIN_STORE_ROOT";

const CONFIG_DIR_NAME: &str = "plugin-store";
const CONFIG_FILE_NAME: &str = "config.toml";
const DEFAULT_ROOT_DIR: &str = ".plugin-store";

/// Persisted store configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Plugin root directory. `~/` is expanded and relative paths resolve
    /// against the directory holding the config file.
    #[serde(default, alias = "pluginRoot", skip_serializing_if = "Option::is_none")]
    pub plugin_root: Option<String>,
}

impl StoreConfig {
    /// Parses a config document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if `text` is not valid TOML of the
    /// expected shape.
    ///
    /// # Examples
    ///
    /// ```
    /// use plugin_core::StoreConfig;
    ///
    /// let config = StoreConfig::from_toml("pluginRoot = \"/data/plugins\"").unwrap();
    /// assert_eq!(config.plugin_root.as_deref(), Some("/data/plugins"));
    /// ```
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::ConfigError {
            message: "malformed config file".to_string(),
            source: Some(Box::new(e)),
        })
    }

    /// Loads the config file at `path`.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the file exists but cannot be read
    /// or parsed.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config file at {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::ConfigError {
                    message: format!("cannot read config file {}", path.display()),
                    source: Some(Box::new(e)),
                });
            }
        };

        Self::from_toml(&text)
            .map(Some)
            .map_err(|e| match e {
                Error::ConfigError { source, .. } => Error::ConfigError {
                    message: format!("malformed config file {}", path.display()),
                    source,
                },
                other => other,
            })
    }

    /// Default location of the config file for the current user.
    ///
    /// Returns `None` if the platform config directory cannot be determined.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }
}

/// Which source determined the plugin root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootOrigin {
    /// Explicit override from the caller.
    Override,
    /// The `PLUGIN_STORE_ROOT` environment variable.
    Env,
    /// The persisted config file.
    ConfigFile,
    /// The built-in default under the home directory.
    Default,
}

impl fmt::Display for RootOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Override => "override",
            Self::Env => "environment",
            Self::ConfigFile => "config file",
            Self::Default => "default",
        };
        f.write_str(label)
    }
}

/// Result of root resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoot {
    /// Absolute plugin root.
    pub path: PathBuf,
    /// Source that won.
    pub origin: RootOrigin,
}

/// Resolves the plugin root directory.
///
/// Every input is injectable so resolution can be tested without touching
/// the process environment. [`ConfigResolver::from_env`] fills them from
/// the current user's environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    explicit: Option<PathBuf>,
    env_root: Option<String>,
    config_path: Option<PathBuf>,
    home: Option<PathBuf>,
}

impl ConfigResolver {
    /// Creates a resolver with no inputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a resolver reading `PLUGIN_STORE_ROOT`, the default config
    /// file location and the user's home directory.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            explicit: None,
            env_root: std::env::var(ROOT_ENV_VAR).ok(),
            config_path: StoreConfig::default_path(),
            home: dirs::home_dir(),
        }
    }

    /// Sets an explicit root that takes precedence over everything else.
    #[must_use]
    pub fn with_override(mut self, root: impl Into<PathBuf>) -> Self {
        self.explicit = Some(root.into());
        self
    }

    /// Sets the value seen for the `PLUGIN_STORE_ROOT` variable.
    #[must_use]
    pub fn with_env_root(mut self, value: impl Into<String>) -> Self {
        self.env_root = Some(value.into());
        self
    }

    /// Sets the config file location.
    #[must_use]
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Sets the home directory used for `~` expansion and the default root.
    #[must_use]
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Resolves the plugin root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the config file is malformed, if a
    /// path needs `~` expansion but no home directory is known, or if no
    /// source yields a root at all.
    pub fn resolve(&self) -> Result<ResolvedRoot> {
        if let Some(explicit) = &self.explicit {
            return Ok(ResolvedRoot {
                path: Self::absolutize(explicit.clone(), None)?,
                origin: RootOrigin::Override,
            });
        }

        if let Some(raw) = self.env_root.as_deref().map(str::trim)
            && !raw.is_empty()
        {
            return Ok(ResolvedRoot {
                path: self.expand(raw, None)?,
                origin: RootOrigin::Env,
            });
        }

        if let Some(config_path) = &self.config_path
            && let Some(config) = StoreConfig::load(config_path)?
            && let Some(raw) = config.plugin_root.as_deref().map(str::trim)
            && !raw.is_empty()
        {
            let base = config_path.parent();
            return Ok(ResolvedRoot {
                path: self.expand(raw, base)?,
                origin: RootOrigin::ConfigFile,
            });
        }

        let home = self.home.as_ref().ok_or_else(|| Error::ConfigError {
            message: "cannot determine home directory for the default plugin root".to_string(),
            source: None,
        })?;

        Ok(ResolvedRoot {
            path: Self::absolutize(home.join(DEFAULT_ROOT_DIR), None)?,
            origin: RootOrigin::Default,
        })
    }

    fn expand(&self, raw: &str, base: Option<&Path>) -> Result<PathBuf> {
        let path = if raw == "~" || raw.starts_with("~/") {
            let home = self.home.as_ref().ok_or_else(|| Error::ConfigError {
                message: format!("cannot expand '{raw}': home directory unknown"),
                source: None,
            })?;
            match raw.strip_prefix("~/") {
                Some(rest) => home.join(rest),
                None => home.clone(),
            }
        } else {
            PathBuf::from(raw)
        };

        Self::absolutize(path, base)
    }

    fn absolutize(path: PathBuf, base: Option<&Path>) -> Result<PathBuf> {
        let path = match base {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        };

        std::path::absolute(&path).map_err(|e| Error::ConfigError {
            message: format!("cannot make {} absolute", path.display()),
            source: Some(Box::new(e)),
        })
    }
}
