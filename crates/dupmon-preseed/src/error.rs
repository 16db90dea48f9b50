//! Error types for the preseed client.

use thiserror::Error;

/// Result type alias for preseed client operations.
pub type PreseedResult<T> = Result<T, PreseedError>;

/// Errors fetching backup names from the external API.
#[derive(Debug, Error)]
pub enum PreseedError {
    #[error("invalid base url: {0}")]
    InvalidUrl(String),

    #[error("unsupported url scheme '{0}' (only http is supported)")]
    UnsupportedScheme(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("unexpected status {status} from {url}")]
    Status { status: http::StatusCode, url: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}
