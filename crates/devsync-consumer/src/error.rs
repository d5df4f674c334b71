//! Error types for the sync consumer
//!
//! Job errors never leave a worker: they decide how a delivery is disposed of
//! and get logged. Startup errors are the only fatal ones.

use devsync_common::DevsyncError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for consumer startup
pub type Result<T> = std::result::Result<T, StartupError>;

/// Failure while processing a single job
#[derive(Error, Debug)]
pub enum JobError {
    #[error("{0}")]
    MalformedPayload(#[from] DevsyncError),

    #[error("Unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("Failed to fetch '{url}': {reason}")]
    Fetch { url: String, reason: String },

    #[error("Failed to write '{}': {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to rename '{}' to '{}': {source}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found: '{}'", .0.display())]
    FileNotFound(PathBuf),

    #[error("Failed to remove '{}': {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl JobError {
    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-friendly name used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::MalformedPayload(_) => "malformed_payload",
            JobError::UnknownOperation(_) => "unknown_operation",
            JobError::Fetch { .. } => "fetch_failure",
            JobError::Write { .. } => "write_failure",
            JobError::Rename { .. } => "rename_failure",
            JobError::FileNotFound(_) => "file_not_found",
            JobError::Remove { .. } => "remove_failure",
        }
    }
}

/// Failure talking to the message broker
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Queue '{0}' is already consuming")]
    AlreadyConsuming(String),

    #[error("Queue '{0}' is not consuming; call start_consuming first")]
    NotConsuming(String),

    #[error("Invalid consume settings: {0}")]
    InvalidSettings(String),

    #[error("Delivery no longer in the unacked list of '{0}'")]
    DeliveryNotFound(String),
}

/// Failure writing a status message to the parent process
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Parent channel IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode status message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid parent channel descriptor '{0}'")]
    InvalidDescriptor(String),
}

/// Fatal error while bringing the consumer up
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] DevsyncError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to open parent channel: {0}")]
    Notifier(#[from] NotifyError),

    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_kinds() {
        let err = JobError::from(DevsyncError::MissingField("filename"));
        assert_eq!(err.kind(), "malformed_payload");
        assert!(err.to_string().contains("filename"));

        let err = JobError::fetch("http://cdn/a.jpeg", "HTTP 404 Not Found");
        assert_eq!(err.kind(), "fetch_failure");
        assert_eq!(
            err.to_string(),
            "Failed to fetch 'http://cdn/a.jpeg': HTTP 404 Not Found"
        );

        let err = JobError::FileNotFound(PathBuf::from("/sync/a.jpeg"));
        assert_eq!(err.to_string(), "File not found: '/sync/a.jpeg'");
    }
}
