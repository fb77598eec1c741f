//! Error types for tbsim-core.

use thiserror::Error;

/// Result type alias for tbsim operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for tbsim operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration value is outside its valid domain.
    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Configuration document could not be parsed.
    #[error("configuration parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates an [`Error::InvalidConfig`] for the named field.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
