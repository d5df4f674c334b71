//! Sync job payloads
//!
//! A job is the JSON body of one message on a device's sync queue:
//!
//! ```json
//! { "operation": "append", "imageUrl": "https://cdn.example/a.jpeg", "filename": "a.jpeg" }
//! ```
//!
//! Decoding validates the fields a consumer needs to act on the job.
//! Operations other than `append` and `delete` are kept as
//! [`Operation::Unknown`] so the consumer decides how to dispose of them.

use crate::error::{DevsyncError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

/// Operation requested by a sync job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    /// Download the source and place it under the filename
    Append,
    /// Remove the file with the given filename
    Delete,
    /// Any operation this version does not know how to run
    Unknown(String),
}

impl Operation {
    pub fn as_str(&self) -> &str {
        match self {
            Operation::Append => "append",
            Operation::Delete => "delete",
            Operation::Unknown(other) => other,
        }
    }
}

impl From<String> for Operation {
    fn from(value: String) -> Self {
        match value.as_str() {
            "append" => Operation::Append,
            "delete" => Operation::Delete,
            _ => Operation::Unknown(value),
        }
    }
}

impl From<Operation> for String {
    fn from(op: Operation) -> Self {
        op.as_str().to_string()
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire representation, every field optional so missing ones get a precise error
#[derive(Debug, Deserialize)]
struct RawJob {
    operation: Option<Operation>,
    #[serde(rename = "imageUrl")]
    image_url: Option<String>,
    filename: Option<String>,
}

/// A decoded sync job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub operation: Operation,

    /// Where to fetch the content from; empty for jobs that never fetch
    #[serde(rename = "imageUrl")]
    pub source_url: String,

    /// Target path, relative to the consumer's sync directory
    pub filename: String,
}

impl Job {
    pub fn append(source_url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            operation: Operation::Append,
            source_url: source_url.into(),
            filename: filename.into(),
        }
    }

    pub fn delete(filename: impl Into<String>) -> Self {
        Self {
            operation: Operation::Delete,
            source_url: String::new(),
            filename: filename.into(),
        }
    }

    /// Decode a message body into a job.
    ///
    /// Fails with [`DevsyncError::MalformedPayload`] for bodies that are not a
    /// JSON object of the expected shape, [`DevsyncError::MissingField`] when
    /// `operation`, `filename` or (for `append`) `imageUrl` is absent, and
    /// [`DevsyncError::InvalidFilename`] when the filename could escape the
    /// sync directory.
    pub fn decode(body: &str) -> Result<Self> {
        let raw: RawJob = serde_json::from_str(body)?;

        let operation = raw.operation.ok_or(DevsyncError::MissingField("operation"))?;
        let filename = raw
            .filename
            .filter(|f| !f.is_empty())
            .ok_or(DevsyncError::MissingField("filename"))?;
        validate_filename(&filename)?;

        let source_url = match (&operation, raw.image_url) {
            (Operation::Append, Some(url)) if !url.is_empty() => url,
            (Operation::Append, _) => return Err(DevsyncError::MissingField("imageUrl")),
            (_, url) => url.unwrap_or_default(),
        };

        Ok(Self {
            operation,
            source_url,
            filename,
        })
    }

    /// Encode the job in its wire form
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| DevsyncError::MalformedPayload(e.to_string()))
    }
}

fn validate_filename(filename: &str) -> Result<()> {
    let safe = Path::new(filename)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

    if safe {
        Ok(())
    } else {
        Err(DevsyncError::InvalidFilename(filename.to_string()))
    }
}
