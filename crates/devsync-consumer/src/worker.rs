//! Per-slot job worker
//!
//! A worker takes one delivery at a time: decode the payload, apply it to the
//! sync directory, tell the parent on success, then settle the delivery as
//! the [`DispositionState`] decides.

use crate::broker::{Consumer, Delivery};
use crate::disposition::{BatchBoundaryPolicy, BatchState, Disposition, DispositionState};
use crate::error::JobError;
use crate::materializer::FileMaterializer;
use crate::notifier::{Notifier, StatusMessage};
use async_trait::async_trait;
use devsync_common::{Job, Operation};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct Worker {
    identity: String,
    materializer: FileMaterializer,
    notifier: Arc<dyn Notifier>,
    disposition: DispositionState,
}

impl Worker {
    pub fn new(
        index: usize,
        materializer: FileMaterializer,
        notifier: Arc<dyn Notifier>,
        policy: BatchBoundaryPolicy,
    ) -> Self {
        Self {
            identity: format!("consumer{index}"),
            materializer,
            notifier,
            disposition: DispositionState::new(policy),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn processed(&self) -> u64 {
        self.disposition.processed()
    }

    /// Decode and apply one job payload
    pub async fn process(&self, payload: &str) -> Result<Job, JobError> {
        let job = Job::decode(payload)?;

        match &job.operation {
            Operation::Append => {
                let bytes = self
                    .materializer
                    .materialize(&job.source_url, &job.filename)
                    .await?;
                debug!(worker = %self.identity, filename = %job.filename, bytes, "Appended file");
            },
            Operation::Delete => {
                self.materializer.remove(&job.filename).await?;
                debug!(worker = %self.identity, filename = %job.filename, "Deleted file");
            },
            Operation::Unknown(op) => return Err(JobError::UnknownOperation(op.clone())),
        }

        Ok(job)
    }

    /// Process a delivery and settle it; returns how it was settled
    pub async fn handle<D: Delivery>(&mut self, delivery: D) -> Disposition {
        let outcome = self.process(delivery.payload()).await;

        let succeeded = match &outcome {
            Ok(_) => {
                if let Err(e) = self.notifier.notify(&StatusMessage::success()).await {
                    warn!(worker = %self.identity, error = %e, "Failed to notify parent");
                }
                true
            },
            Err(e) => {
                error!(
                    worker = %self.identity,
                    kind = e.kind(),
                    error = %e,
                    payload = %delivery.payload(),
                    "Job failed"
                );
                false
            },
        };

        let decision = self.disposition.record(succeeded);

        if let Some(report) = &decision.report {
            info!(
                worker = %self.identity,
                jobs_processed = report.jobs_processed,
                elapsed = ?report.elapsed,
                rate = report.rate,
                "Batch throughput"
            );
        }

        if decision.state == BatchState::BatchBoundary
            && succeeded
            && decision.disposition == Disposition::Reject
        {
            debug!(worker = %self.identity, "Rejecting delivery at batch boundary");
        }

        let settled = match decision.disposition {
            Disposition::Ack => delivery.ack().await,
            Disposition::Reject => delivery.reject().await,
        };
        if let Err(e) = settled {
            error!(
                worker = %self.identity,
                disposition = ?decision.disposition,
                error = %e,
                "Failed to settle delivery"
            );
        }

        decision.disposition
    }
}

#[async_trait]
impl<D: Delivery> Consumer<D> for Worker {
    async fn consume(&mut self, delivery: D) {
        self.handle(delivery).await;
    }
}
