//! Consumer configuration
//!
//! Built from the parsed command line and validated before anything connects.

use crate::disposition::BatchBoundaryPolicy;
use crate::Cli;
use devsync_common::{DevsyncError, Result};
use std::num::NonZeroU64;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Consumer Configuration Constants
// ============================================================================

pub const DEFAULT_DEVICE_ID: u32 = 1;

/// Maximum deliveries fetched but not yet settled
pub const DEFAULT_PREFETCH_LIMIT: usize = 1000;

/// Wait before polling an empty queue again
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Deliveries per worker between throughput reports
pub const DEFAULT_REPORT_BATCH_SIZE: u64 = 10_000;

pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 300;

/// Capacity of the connection error channel
pub const DEFAULT_ERROR_CHANNEL_CAPACITY: usize = 10;

/// Name of the queue a device's jobs are published to
pub fn queue_name(device_id: u32) -> String {
    format!("sync-device-{device_id}")
}

/// Validated consumer settings
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Root directory files are synced into
    pub path: PathBuf,
    /// Broker address, `host:port` or a `redis://` URL
    pub redis_addr: String,
    pub device_id: u32,
    pub worker_count: usize,
    pub prefetch_limit: usize,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub batch_policy: BatchBoundaryPolicy,
    pub error_channel_capacity: usize,
}

impl ConsumerConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let path = cli
            .path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| DevsyncError::config("local image path is empty"))?;

        let redis_addr = cli
            .redis
            .clone()
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| DevsyncError::config("redis queue addr is empty"))?;

        let batch_size = NonZeroU64::new(cli.report_batch_size)
            .ok_or_else(|| DevsyncError::config("report batch size must be greater than 0"))?;

        let config = Self {
            path,
            redis_addr,
            device_id: cli.device_id,
            worker_count: cli.workers,
            prefetch_limit: cli.prefetch_limit,
            poll_interval: Duration::from_millis(cli.poll_interval_ms),
            fetch_timeout: Duration::from_secs(cli.fetch_timeout_secs),
            batch_policy: BatchBoundaryPolicy::new(batch_size)
                .with_reject_at_boundary(cli.reject_at_batch_boundary),
            error_channel_capacity: DEFAULT_ERROR_CHANNEL_CAPACITY,
        };
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(DevsyncError::config("worker count must be greater than 0"));
        }
        if self.prefetch_limit == 0 {
            return Err(DevsyncError::config("prefetch limit must be greater than 0"));
        }
        if self.poll_interval.is_zero() {
            return Err(DevsyncError::config("poll interval must be greater than 0"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(DevsyncError::config("fetch timeout must be greater than 0"));
        }
        Ok(())
    }

    pub fn queue_name(&self) -> String {
        queue_name(self.device_id)
    }
}
