//! Asynchronous connection errors

use crate::error::BrokerError;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

/// Consecutive heartbeat failures after which the heartbeat is considered lost
pub const HEARTBEAT_ERROR_LIMIT: u32 = 45;

/// Error raised by the connection's background activity
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Refreshing the heartbeat failed; `count` saturates at the limit
    #[error("heartbeat failed ({count}/{limit}): {source}", limit = HEARTBEAT_ERROR_LIMIT)]
    Heartbeat {
        count: u32,
        #[source]
        source: BrokerError,
    },

    /// Fetching from a queue failed
    #[error("consume from '{queue}' failed: {source}")]
    Consume {
        queue: String,
        #[source]
        source: BrokerError,
    },

    /// Settling a delivery failed
    #[error("delivery '{payload}' failed: {reason}")]
    Delivery { payload: String, reason: String },

    #[error("{0}")]
    Other(String),
}

impl ConnectionError {
    pub fn is_heartbeat_limit(&self) -> bool {
        matches!(self, ConnectionError::Heartbeat { count, .. } if *count >= HEARTBEAT_ERROR_LIMIT)
    }
}

/// Non-blocking sender side of the error channel
///
/// A full channel drops the error with a warning instead of stalling the
/// connection's background tasks.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<ConnectionError>,
}

impl ErrorReporter {
    pub fn new(tx: mpsc::Sender<ConnectionError>) -> Self {
        Self { tx }
    }

    pub fn report(&self, err: ConnectionError) {
        match self.tx.try_send(err) {
            Ok(()) => {},
            Err(TrySendError::Full(err)) => {
                warn!(error = %err, "Error channel full, dropping connection error");
            },
            Err(TrySendError::Closed(_)) => {},
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn redis_error() -> BrokerError {
        BrokerError::Redis(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "connection refused",
        )))
    }

    #[test]
    fn test_heartbeat_limit() {
        let below = ConnectionError::Heartbeat {
            count: 3,
            source: redis_error(),
        };
        let at = ConnectionError::Heartbeat {
            count: HEARTBEAT_ERROR_LIMIT,
            source: redis_error(),
        };

        assert!(!below.is_heartbeat_limit());
        assert!(at.is_heartbeat_limit());
        assert!(below.to_string().starts_with("heartbeat failed (3/45)"));
    }

    #[tokio::test]
    async fn test_reporter_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let reporter = ErrorReporter::new(tx);

        reporter.report(ConnectionError::Other("first".into()));
        reporter.report(ConnectionError::Other("second".into()));

        assert_eq!(rx.recv().await.unwrap().to_string(), "first");
        assert!(rx.try_recv().is_err());
    }
}
