use super::delivery::RedisDelivery;
use super::errors::{ConnectionError, ErrorReporter};
use super::{keys, run_consumer, Consumer, SharedDeliveries};
use crate::error::BrokerError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Handle to one named queue of a connection; cheap to clone
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    name: String,
    ready_key: String,
    rejected_key: String,
    unacked_key: String,
    consumers_key: String,
    redis: ConnectionManager,
    errors: ErrorReporter,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    deliveries: OnceLock<SharedDeliveries<RedisDelivery>>,
}

impl Queue {
    pub(super) fn new(
        name: &str,
        connection: &str,
        redis: ConnectionManager,
        errors: ErrorReporter,
        shutdown: CancellationToken,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.to_string(),
                ready_key: keys::ready(name),
                rejected_key: keys::rejected(name),
                unacked_key: keys::unacked(connection, name),
                consumers_key: keys::consumers(connection, name),
                redis,
                errors,
                shutdown,
                tasks,
                deliveries: OnceLock::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Add a message to the ready list
    pub async fn publish(&self, payload: &str) -> Result<(), BrokerError> {
        let mut redis = self.inner.redis.clone();
        redis
            .lpush::<_, _, ()>(&self.inner.ready_key, payload)
            .await?;
        Ok(())
    }

    pub async fn ready_count(&self) -> Result<u64, BrokerError> {
        let mut redis = self.inner.redis.clone();
        Ok(redis.llen(&self.inner.ready_key).await?)
    }

    pub async fn rejected_count(&self) -> Result<u64, BrokerError> {
        let mut redis = self.inner.redis.clone();
        Ok(redis.llen(&self.inner.rejected_key).await?)
    }

    pub async fn unacked_count(&self) -> Result<u64, BrokerError> {
        let mut redis = self.inner.redis.clone();
        Ok(redis.llen(&self.inner.unacked_key).await?)
    }

    /// Start fetching deliveries.
    ///
    /// At most `prefetch_limit` deliveries are outstanding at any time
    /// (fetched and not yet settled). An empty ready list is polled again
    /// after `poll_interval`.
    pub fn start_consuming(
        &self,
        prefetch_limit: usize,
        poll_interval: Duration,
    ) -> Result<(), BrokerError> {
        if prefetch_limit == 0 {
            return Err(BrokerError::InvalidSettings(
                "prefetch limit must be greater than 0".to_string(),
            ));
        }
        if poll_interval.is_zero() {
            return Err(BrokerError::InvalidSettings(
                "poll interval must be greater than 0".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(prefetch_limit);
        self.inner
            .deliveries
            .set(Arc::new(Mutex::new(rx)))
            .map_err(|_| BrokerError::AlreadyConsuming(self.inner.name.clone()))?;

        let permits = Arc::new(Semaphore::new(prefetch_limit));
        self.inner
            .tasks
            .spawn(fetch_loop(self.clone(), tx, permits, poll_interval));

        info!(
            queue = %self.inner.name,
            prefetch_limit,
            poll_interval = ?poll_interval,
            "Started consuming"
        );
        Ok(())
    }

    /// Attach a consumer; returns its tag
    pub async fn add_consumer<C>(&self, tag: &str, consumer: C) -> Result<String, BrokerError>
    where
        C: Consumer<RedisDelivery>,
    {
        let deliveries = self
            .inner
            .deliveries
            .get()
            .cloned()
            .ok_or_else(|| BrokerError::NotConsuming(self.inner.name.clone()))?;

        let mut redis = self.inner.redis.clone();
        redis
            .sadd::<_, _, ()>(&self.inner.consumers_key, tag)
            .await?;

        self.inner.tasks.spawn(run_consumer(
            tag.to_string(),
            consumer,
            deliveries,
            self.inner.shutdown.clone(),
        ));

        debug!(queue = %self.inner.name, consumer = %tag, "Added consumer");
        Ok(tag.to_string())
    }

    /// Return every buffered delivery to the ready list; called once the
    /// fetcher and all consumers have stopped.
    pub(super) async fn return_buffered(&self) -> usize {
        let Some(deliveries) = self.inner.deliveries.get() else {
            return 0;
        };

        let mut rx = deliveries.lock().await;
        rx.close();

        let mut returned = 0;
        while let Ok(delivery) = rx.try_recv() {
            match delivery.return_to_ready().await {
                Ok(()) => returned += 1,
                Err(e) => warn!(queue = %self.inner.name, error = %e, "Failed to return delivery"),
            }
        }

        let mut redis = self.inner.redis.clone();
        if let Err(e) = redis.del::<_, ()>(&self.inner.consumers_key).await {
            warn!(queue = %self.inner.name, error = %e, "Failed to clear consumer registry");
        }

        returned
    }

    fn delivery(&self, payload: String, permit: tokio::sync::OwnedSemaphorePermit) -> RedisDelivery {
        RedisDelivery::new(
            payload,
            self.inner.unacked_key.clone(),
            self.inner.rejected_key.clone(),
            self.inner.ready_key.clone(),
            self.inner.redis.clone(),
            self.inner.errors.clone(),
            permit,
        )
    }
}

async fn fetch_loop(
    queue: Queue,
    tx: mpsc::Sender<RedisDelivery>,
    permits: Arc<Semaphore>,
    poll_interval: Duration,
) {
    let inner = &queue.inner;
    let mut redis = inner.redis.clone();

    loop {
        let permit = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let fetched: redis::RedisResult<Option<String>> =
            redis.rpoplpush(&inner.ready_key, &inner.unacked_key).await;

        match fetched {
            Ok(Some(payload)) => {
                if let Err(mpsc::error::SendError(delivery)) =
                    tx.send(queue.delivery(payload, permit)).await
                {
                    if let Err(e) = delivery.return_to_ready().await {
                        warn!(queue = %inner.name, error = %e, "Failed to return delivery");
                    }
                    break;
                }
                continue;
            },
            Ok(None) => drop(permit),
            Err(e) => {
                drop(permit);
                inner.errors.report(ConnectionError::Consume {
                    queue: inner.name.clone(),
                    source: e.into(),
                });
            },
        }

        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {},
        }
    }

    debug!(queue = %inner.name, "Fetcher stopped");
}
