//! Validation errors for inbound backup reports.

use thiserror::Error;

/// Result type alias for payload validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Reasons a webhook payload is rejected.
///
/// The `Display` text is returned verbatim to the reporting client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid json. No backup name found")]
    MissingBackupName,

    #[error("Invalid json. No result found")]
    MissingResult,

    #[error("Invalid json. {field} is not a non-negative integer")]
    BadStat { field: &'static str },

    #[error("Invalid json. {0}")]
    Malformed(String),
}
