//! Error types for DevSync

use thiserror::Error;

/// Result type alias for DevSync operations
pub type Result<T> = std::result::Result<T, DevsyncError>;

/// Main error type shared across DevSync crates
#[derive(Error, Debug)]
pub enum DevsyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Malformed payload: missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid filename '{0}': must be a relative path inside the sync directory")]
    InvalidFilename(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DevsyncError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error means the payload could not be turned into a job
    pub fn is_payload_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedPayload(_) | Self::MissingField(_) | Self::InvalidFilename(_)
        )
    }
}

impl From<serde_json::Error> for DevsyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedPayload(err.to_string())
    }
}
