//! DevSync Consumer
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Drains a device's sync queue and applies each job to a local directory.
//!
//! # Overview
//!
//! - **Broker**: Redis-backed reliable queue with ack/reject semantics
//! - **Materializer**: atomic download-and-rename and file removal
//! - **Disposition**: ack/reject decisions and per-worker throughput reports
//! - **Worker / Pool**: N sequential workers sharing one delivery buffer
//! - **Notifier**: status messages to the supervising parent process
//! - **Error Sink**: logging of asynchronous connection errors

pub mod broker;
pub mod config;
pub mod disposition;
pub mod error;
pub mod error_sink;
pub mod materializer;
pub mod notifier;
pub mod pool;
pub mod shutdown;
pub mod worker;

// Re-export commonly used types
pub use config::ConsumerConfig;
pub use error::{JobError, Result, StartupError};
pub use pool::ConsumerPool;
pub use shutdown::ShutdownOutcome;

use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// DevSync consumer - applies queued sync jobs to a local directory
#[derive(Parser, Debug)]
#[command(name = "devsync-consumer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Local directory files are synced into
    #[arg(long, env = "DEVSYNC_PATH")]
    pub path: Option<PathBuf>,

    /// Redis queue address (host:port)
    #[arg(long, env = "DEVSYNC_REDIS")]
    pub redis: Option<String>,

    /// Device whose queue is consumed
    #[arg(long, env = "DEVSYNC_DEVICE_ID", default_value_t = config::DEFAULT_DEVICE_ID)]
    pub device_id: u32,

    /// Number of concurrent workers
    #[arg(long, env = "DEVSYNC_WORKERS", default_value_t = config::DEFAULT_WORKER_COUNT)]
    pub workers: usize,

    /// Maximum deliveries fetched but not yet settled
    #[arg(long, env = "DEVSYNC_PREFETCH_LIMIT", default_value_t = config::DEFAULT_PREFETCH_LIMIT)]
    pub prefetch_limit: usize,

    /// Delay before polling an empty queue again
    #[arg(long, env = "DEVSYNC_POLL_INTERVAL_MS", default_value_t = config::DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Deliveries per worker between throughput reports
    #[arg(long, env = "DEVSYNC_REPORT_BATCH_SIZE", default_value_t = config::DEFAULT_REPORT_BATCH_SIZE)]
    pub report_batch_size: u64,

    /// Reject the delivery that completes each report batch
    #[arg(
        long,
        env = "DEVSYNC_REJECT_AT_BATCH_BOUNDARY",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub reject_at_batch_boundary: bool,

    /// Download timeout in seconds
    #[arg(long, env = "DEVSYNC_FETCH_TIMEOUT_SECS", default_value_t = config::DEFAULT_FETCH_TIMEOUT_SECS)]
    pub fetch_timeout_secs: u64,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}
