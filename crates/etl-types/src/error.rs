//! Error types shared across the sync workspace.

use thiserror::Error;

/// Settings could not be loaded or failed validation.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("Configuration error: {0}")]
    Config(String),
}

/// A document that failed validation before being sent to the index.
///
/// Validation failures are reported per document and never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A required field is absent or NULL
    #[error("missing required field `{field}`")]
    MissingField { field: String },

    /// A field is present but has the wrong shape
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
}

impl ValidationError {
    pub fn missing(field: impl Into<String>) -> Self {
        ValidationError::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
