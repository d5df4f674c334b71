//! Consumer pool
//!
//! One broker connection, one device queue and a fixed number of workers
//! sharing its delivery buffer.

use crate::broker::{Connection, ConnectionError, Queue};
use crate::config::ConsumerConfig;
use crate::error::Result;
use crate::materializer::FileMaterializer;
use crate::notifier::Notifier;
use crate::shutdown::{Shutdown, ShutdownOutcome};
use crate::worker::Worker;
use futures::Stream;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

pub struct ConsumerPool {
    connection: Connection,
    queue: Queue,
    workers: Vec<String>,
}

impl ConsumerPool {
    /// Connect, start consuming the device queue and attach the workers
    pub async fn start(
        config: &ConsumerConfig,
        notifier: Arc<dyn Notifier>,
        errors: mpsc::Sender<ConnectionError>,
    ) -> Result<Self> {
        let connection = Connection::open("consumer", &config.redis_addr, errors).await?;
        let queue = connection.open_queue(&config.queue_name()).await?;
        queue.start_consuming(config.prefetch_limit, config.poll_interval)?;

        let materializer = FileMaterializer::new(&config.path, config.fetch_timeout)?;

        let mut workers = Vec::with_capacity(config.worker_count);
        for index in 0..config.worker_count {
            let worker = Worker::new(
                index,
                materializer.clone(),
                Arc::clone(&notifier),
                config.batch_policy,
            );
            let tag = worker.identity().to_string();
            workers.push(queue.add_consumer(&tag, worker).await?);
        }

        info!(
            connection = %connection.name(),
            queue = %queue.name(),
            workers = workers.len(),
            path = %config.path.display(),
            "Consumer pool started"
        );

        Ok(Self {
            connection,
            queue,
            workers,
        })
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn workers(&self) -> &[String] {
        &self.workers
    }

    /// Consume until interrupted, then drain
    pub async fn run_until_shutdown<S>(self, signals: S) -> ShutdownOutcome
    where
        S: Stream<Item = ()> + Unpin,
    {
        let shutdown = Shutdown::new();
        shutdown
            .run(signals, self.connection.stop_all_consuming())
            .await
    }
}
