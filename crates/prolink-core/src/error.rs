//! Error types shared across the prolink crates.
//!
//! Each protocol crate carries its own error enum for the failures it can
//! produce; this module holds the top-level error and the configuration
//! errors every crate can hit while loading settings.

use thiserror::Error;

/// Result type alias using ProlinkError as the error type.
pub type Result<T> = std::result::Result<T, ProlinkError>;

/// Top-level error type for prolink operations that are not tied to one
/// protocol layer.
#[derive(Debug, Error)]
pub enum ProlinkError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration source could not be read
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Configuration could not be parsed
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// A field holds a value outside its allowed range
    #[error("Invalid value for field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
