//! Consumer of the connection's asynchronous error channel

use crate::broker::ConnectionError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Coarse class of a connection error, used as a log field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Heartbeat failures reached the limit; the broker will soon treat this
    /// connection as dead
    HeartbeatLimit,
    Heartbeat,
    Consume,
    Delivery,
    Other,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::HeartbeatLimit => "heartbeat_limit",
            ErrorClass::Heartbeat => "heartbeat",
            ErrorClass::Consume => "consume",
            ErrorClass::Delivery => "delivery",
            ErrorClass::Other => "other",
        }
    }
}

pub fn classify(err: &ConnectionError) -> ErrorClass {
    match err {
        e if e.is_heartbeat_limit() => ErrorClass::HeartbeatLimit,
        ConnectionError::Heartbeat { .. } => ErrorClass::Heartbeat,
        ConnectionError::Consume { .. } => ErrorClass::Consume,
        ConnectionError::Delivery { .. } => ErrorClass::Delivery,
        ConnectionError::Other(_) => ErrorClass::Other,
    }
}

/// Log every error received until all senders are gone.
///
/// The task resolves to the number of errors seen.
pub fn spawn(mut errors: mpsc::Receiver<ConnectionError>) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut seen = 0u64;

        while let Some(err) = errors.recv().await {
            seen += 1;
            let class = classify(&err);

            match (&err, class) {
                (_, ErrorClass::HeartbeatLimit) => {
                    error!(class = class.as_str(), error = %err, "Heartbeat error limit reached");
                },
                (ConnectionError::Heartbeat { count, .. }, _) => {
                    warn!(class = class.as_str(), count, error = %err, "Heartbeat error");
                },
                (ConnectionError::Delivery { payload, .. }, _) => {
                    error!(class = class.as_str(), payload = %payload, error = %err, "Delivery error");
                },
                _ => {
                    error!(class = class.as_str(), error = %err, "Connection error");
                },
            }
        }

        seen
    })
}
