//! Redis-backed reliable job queue
//!
//! A [`Connection`] registers itself with the broker and keeps a heartbeat
//! alive. Each [`Queue`] it opens moves messages atomically from the queue's
//! ready list into the connection's unacked list, and hands them out as
//! deliveries to the consumers attached to it. A delivery is settled exactly
//! once: acked (dropped from the unacked list) or rejected (moved to the
//! queue's rejected list).
//!
//! Connection-level failures are not returned to callers; they are pushed to
//! the error channel given to [`Connection::open`].

mod connection;
mod delivery;
mod errors;
pub mod keys;
mod queue;

pub use connection::{Connection, HEARTBEAT_INTERVAL, HEARTBEAT_TTL};
pub use delivery::RedisDelivery;
pub use errors::{ConnectionError, ErrorReporter, HEARTBEAT_ERROR_LIMIT};
pub use queue::Queue;

use crate::error::BrokerError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One message handed to a consumer
#[async_trait]
pub trait Delivery: Send + Sync + 'static {
    fn payload(&self) -> &str;

    /// Settle the delivery as done
    async fn ack(self) -> Result<(), BrokerError>;

    /// Settle the delivery as failed
    async fn reject(self) -> Result<(), BrokerError>;
}

/// Something that processes deliveries one at a time
#[async_trait]
pub trait Consumer<D: Delivery>: Send + 'static {
    async fn consume(&mut self, delivery: D);
}

/// Buffer of fetched deliveries shared by every consumer of a queue
pub type SharedDeliveries<D> = Arc<Mutex<mpsc::Receiver<D>>>;

/// Feed deliveries to `consumer` until the buffer closes or `shutdown` fires.
///
/// Whichever consumer is idle takes the next delivery. Shutdown is only
/// observed between deliveries, so a delivery being consumed always finishes.
pub async fn run_consumer<D, C>(
    tag: String,
    mut consumer: C,
    deliveries: SharedDeliveries<D>,
    shutdown: CancellationToken,
) where
    D: Delivery,
    C: Consumer<D>,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            delivery = async { deliveries.lock().await.recv().await } => delivery,
        };

        let Some(delivery) = next else {
            break;
        };

        consumer.consume(delivery).await;
    }

    debug!(consumer = %tag, "Consumer stopped");
}
