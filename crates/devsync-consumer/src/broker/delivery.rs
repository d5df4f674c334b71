use super::errors::{ConnectionError, ErrorReporter};
use super::Delivery;
use crate::error::BrokerError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OwnedSemaphorePermit;

/// A message fetched into a connection's unacked list
///
/// Holds one prefetch permit of its queue until it is settled.
pub struct RedisDelivery {
    payload: String,
    unacked_key: String,
    rejected_key: String,
    ready_key: String,
    redis: ConnectionManager,
    errors: ErrorReporter,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for RedisDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDelivery")
            .field("payload", &self.payload)
            .field("unacked_key", &self.unacked_key)
            .finish()
    }
}

impl RedisDelivery {
    pub(super) fn new(
        payload: String,
        unacked_key: String,
        rejected_key: String,
        ready_key: String,
        redis: ConnectionManager,
        errors: ErrorReporter,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            payload,
            unacked_key,
            rejected_key,
            ready_key,
            redis,
            errors,
            _permit: permit,
        }
    }

    /// Put a delivery that was never handed to a consumer back on the ready
    /// list, at the end that is popped next.
    pub(super) async fn return_to_ready(mut self) -> Result<(), BrokerError> {
        let result: redis::RedisResult<()> = redis::pipe()
            .atomic()
            .lrem(&self.unacked_key, 1, &self.payload)
            .ignore()
            .rpush(&self.ready_key, &self.payload)
            .ignore()
            .query_async(&mut self.redis)
            .await;

        self.settle(result.map_err(BrokerError::from))
    }

    fn settle(&self, result: Result<(), BrokerError>) -> Result<(), BrokerError> {
        result.map_err(|e| {
            self.errors.report(ConnectionError::Delivery {
                payload: self.payload.clone(),
                reason: e.to_string(),
            });
            e
        })
    }
}

#[async_trait]
impl Delivery for RedisDelivery {
    fn payload(&self) -> &str {
        &self.payload
    }

    async fn ack(mut self) -> Result<(), BrokerError> {
        let result = self
            .redis
            .lrem::<_, _, i64>(&self.unacked_key, 1, &self.payload)
            .await
            .map_err(BrokerError::from)
            .and_then(|removed| {
                if removed == 1 {
                    Ok(())
                } else {
                    Err(BrokerError::DeliveryNotFound(self.unacked_key.clone()))
                }
            });

        self.settle(result)
    }

    async fn reject(mut self) -> Result<(), BrokerError> {
        let result: redis::RedisResult<()> = redis::pipe()
            .atomic()
            .lrem(&self.unacked_key, 1, &self.payload)
            .ignore()
            .lpush(&self.rejected_key, &self.payload)
            .ignore()
            .query_async(&mut self.redis)
            .await;

        self.settle(result.map_err(BrokerError::from))
    }
}
