//! DevSync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging and error handling for the DevSync workspace.
//!
//! # Overview
//!
//! - **Jobs**: the sync job payload exchanged between producers and consumers
//! - **Error Handling**: the shared error type and result alias
//! - **Logging**: tracing subscriber setup used by every binary
//!
//! # Example
//!
//! ```
//! use devsync_common::job::{Job, Operation};
//!
//! let job = Job::decode(r#"{"operation":"delete","filename":"a.jpeg"}"#).unwrap();
//! assert_eq!(job.operation, Operation::Delete);
//! ```

pub mod error;
pub mod job;
pub mod logging;

// Re-export commonly used types
pub use error::{DevsyncError, Result};
pub use job::{Job, Operation};
