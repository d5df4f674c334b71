//! Delivery disposition
//!
//! After every attempt a worker asks its [`DispositionState`] what to do
//! with the delivery. Failed jobs are rejected. Successful jobs are acked,
//! except that every `batch_size`-th delivery lands on a batch boundary where
//! [`BatchBoundaryPolicy`] forces a reject and a throughput report is taken.
//!
//! The forced reject returns the job to the broker's rejected list even though
//! it was applied. It is inherited behavior of the sync pipeline and can be
//! switched off with `BatchBoundaryPolicy::reject_at_boundary`.

use std::num::NonZeroU64;
use std::time::Duration;
use tokio::time::Instant;

/// What to tell the broker about a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Reject,
}

/// Position of a delivery relative to the report batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Normal,
    BatchBoundary,
}

/// Forced reject and reporting cadence at batch boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchBoundaryPolicy {
    pub batch_size: NonZeroU64,
    pub reject_at_boundary: bool,
}

impl BatchBoundaryPolicy {
    pub fn new(batch_size: NonZeroU64) -> Self {
        Self {
            batch_size,
            reject_at_boundary: true,
        }
    }

    pub fn with_reject_at_boundary(mut self, reject: bool) -> Self {
        self.reject_at_boundary = reject;
        self
    }

    pub fn state_for(&self, processed: u64) -> BatchState {
        if processed % self.batch_size.get() == 0 {
            BatchState::BatchBoundary
        } else {
            BatchState::Normal
        }
    }
}

/// Throughput over the last batch of a worker
#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputReport {
    /// Running total for the worker, including this delivery
    pub jobs_processed: u64,
    pub elapsed: Duration,
    /// Deliveries per second over `elapsed`
    pub rate: f64,
}

/// Decision for one delivery
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub disposition: Disposition,
    pub state: BatchState,
    pub report: Option<ThroughputReport>,
}

/// Per-worker counters; owned and mutated only by its worker
#[derive(Debug)]
pub struct DispositionState {
    policy: BatchBoundaryPolicy,
    processed: u64,
    window_start: Instant,
}

impl DispositionState {
    pub fn new(policy: BatchBoundaryPolicy) -> Self {
        Self {
            policy,
            processed: 0,
            window_start: Instant::now(),
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn policy(&self) -> &BatchBoundaryPolicy {
        &self.policy
    }

    /// Count one processed delivery and decide its disposition
    pub fn record(&mut self, succeeded: bool) -> Decision {
        self.processed += 1;
        let state = self.policy.state_for(self.processed);

        match state {
            BatchState::BatchBoundary => {
                let now = Instant::now();
                let elapsed = now.duration_since(self.window_start);
                self.window_start = now;

                let report = ThroughputReport {
                    jobs_processed: self.processed,
                    elapsed,
                    rate: rate(self.policy.batch_size.get(), elapsed),
                };

                let disposition = if self.policy.reject_at_boundary || !succeeded {
                    Disposition::Reject
                } else {
                    Disposition::Ack
                };

                Decision {
                    disposition,
                    state,
                    report: Some(report),
                }
            },
            BatchState::Normal => Decision {
                disposition: if succeeded {
                    Disposition::Ack
                } else {
                    Disposition::Reject
                },
                state,
                report: None,
            },
        }
    }
}

fn rate(jobs: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        jobs as f64 / secs
    } else {
        f64::INFINITY
    }
}
