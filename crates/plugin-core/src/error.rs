//! Error types for the plugin store core.
//!
//! # Examples
//!
//! ```
//! use plugin_core::{Error, PluginId};
//!
//! let err = PluginId::new("../escape").unwrap_err();
//! assert!(err.is_validation_error());
//! ```

use thiserror::Error;

/// Main error type for core plugin operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Validation error for domain types.
    ///
    /// Raised when creating or validating identifiers, resource names, or
    /// version strings that have specific format requirements.
    #[error("Validation error in {field}: {reason}")]
    ValidationError {
        /// The field that failed validation
        field: String,
        /// Detailed reason for the validation failure
        reason: String,
    },

    /// Configuration error.
    ///
    /// Raised when the persisted configuration cannot be parsed or when no
    /// plugin root can be determined.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the configuration problem
        message: String,
        /// Underlying error cause
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a validation error for `field`.
    pub(crate) fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if this is a validation error.
    ///
    /// # Examples
    ///
    /// ```
    /// use plugin_core::Error;
    ///
    /// let err = Error::ValidationError {
    ///     field: "id".to_string(),
    ///     reason: "Invalid characters".to_string(),
    /// };
    /// assert!(err.is_validation_error());
    /// ```
    #[must_use]
    pub const fn is_validation_error(&self) -> bool {
        matches!(self, Self::ValidationError { .. })
    }

    /// Returns `true` if this is a configuration error.
    ///
    /// # Examples
    ///
    /// ```
    /// use plugin_core::Error;
    ///
    /// let err = Error::ConfigError {
    ///     message: "bad root".to_string(),
    ///     source: None,
    /// };
    /// assert!(err.is_config_error());
    /// ```
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigError { .. })
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
