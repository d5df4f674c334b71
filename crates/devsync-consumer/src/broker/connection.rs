use super::errors::{ConnectionError, ErrorReporter, HEARTBEAT_ERROR_LIMIT};
use super::keys;
use super::queue::Queue;
use crate::error::BrokerError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How often the heartbeat key is refreshed
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Expiry of the heartbeat key; a connection silent for this long is dead
pub const HEARTBEAT_TTL: Duration = Duration::from_secs(60);

/// A registered broker session
///
/// Owns the heartbeat task and every queue opened through it. Dropping the
/// connection without calling [`Connection::stop_all_consuming`] leaves its
/// fetched deliveries in the unacked list for the broker's cleaner.
pub struct Connection {
    name: String,
    redis: ConnectionManager,
    errors: ErrorReporter,
    consuming: CancellationToken,
    tasks: TaskTracker,
    queues: Mutex<Vec<Queue>>,
    heartbeat_stop: CancellationToken,
    heartbeat: JoinHandle<()>,
}

impl Connection {
    /// Connect to the broker at `address` (`host:port` or a `redis://` URL)
    /// and start the heartbeat.
    ///
    /// Errors raised later by background activity go to `errors`.
    pub async fn open(
        tag: &str,
        address: &str,
        errors: mpsc::Sender<ConnectionError>,
    ) -> Result<Self, BrokerError> {
        let url = if address.contains("://") {
            address.to_string()
        } else {
            format!("redis://{address}")
        };

        let client = redis::Client::open(url)?;
        let mut redis = client.get_connection_manager().await?;

        let suffix = Uuid::new_v4().simple().to_string();
        let name = format!("{tag}-{}", &suffix[..6]);

        redis.sadd::<_, _, ()>(keys::CONNECTIONS, &name).await?;
        refresh_heartbeat(&mut redis, &name).await?;

        let errors = ErrorReporter::new(errors);
        let heartbeat_stop = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat_loop(
            redis.clone(),
            name.clone(),
            errors.clone(),
            heartbeat_stop.clone(),
        ));

        info!(connection = %name, "Connected to broker");

        Ok(Self {
            name,
            redis,
            errors,
            consuming: CancellationToken::new(),
            tasks: TaskTracker::new(),
            queues: Mutex::new(Vec::new()),
            heartbeat_stop,
            heartbeat,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open (and register) a queue for consuming and publishing
    pub async fn open_queue(&self, name: &str) -> Result<Queue, BrokerError> {
        let mut redis = self.redis.clone();
        redis.sadd::<_, _, ()>(keys::QUEUES, name).await?;
        redis
            .sadd::<_, _, ()>(keys::connection_queues(&self.name), name)
            .await?;

        let queue = Queue::new(
            name,
            &self.name,
            self.redis.clone(),
            self.errors.clone(),
            self.consuming.child_token(),
            self.tasks.clone(),
        );
        self.queues.lock().await.push(queue.clone());

        debug!(connection = %self.name, queue = %name, "Opened queue");
        Ok(queue)
    }

    /// Stop fetching on every queue and wait for all consumers to finish
    /// their current delivery.
    ///
    /// Deliveries fetched but never handed to a consumer go back to their
    /// ready list. Afterwards the heartbeat stops and the connection is
    /// unregistered.
    pub async fn stop_all_consuming(self) {
        info!(connection = %self.name, "Stopping all consumers");

        self.consuming.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        for queue in self.queues.lock().await.drain(..) {
            let returned = queue.return_buffered().await;
            if returned > 0 {
                info!(queue = %queue.name(), returned, "Returned buffered deliveries");
            }
        }

        self.heartbeat_stop.cancel();
        if let Err(e) = self.heartbeat.await {
            warn!(error = %e, "Heartbeat task ended abnormally");
        }

        let mut redis = self.redis;
        let cleanup: redis::RedisResult<()> = redis::pipe()
            .del(keys::heartbeat(&self.name))
            .ignore()
            .del(keys::connection_queues(&self.name))
            .ignore()
            .srem(keys::CONNECTIONS, &self.name)
            .ignore()
            .query_async(&mut redis)
            .await;

        match cleanup {
            Ok(()) => info!(connection = %self.name, "All consumers stopped"),
            Err(e) => warn!(connection = %self.name, error = %e, "Failed to unregister connection"),
        }
    }
}

async fn refresh_heartbeat(redis: &mut ConnectionManager, name: &str) -> Result<(), BrokerError> {
    let _: () = redis::cmd("SET")
        .arg(keys::heartbeat(name))
        .arg(1)
        .arg("EX")
        .arg(HEARTBEAT_TTL.as_secs())
        .query_async(redis)
        .await?;
    Ok(())
}

/// Consecutive heartbeat failures after one more refresh; resets on success
/// and saturates at [`HEARTBEAT_ERROR_LIMIT`]
fn next_failure_count(previous: u32, refreshed: bool) -> u32 {
    if refreshed {
        0
    } else {
        previous.saturating_add(1).min(HEARTBEAT_ERROR_LIMIT)
    }
}

async fn heartbeat_loop(
    mut redis: ConnectionManager,
    name: String,
    errors: ErrorReporter,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let refreshed = refresh_heartbeat(&mut redis, &name).await;
        failures = next_failure_count(failures, refreshed.is_ok());
        if let Err(source) = refreshed {
            errors.report(ConnectionError::Heartbeat {
                count: failures,
                source,
            });
        }
    }

    debug!(connection = %name, "Heartbeat stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_count_saturates_at_limit() {
        let mut failures = 0;
        for expected in 1..=HEARTBEAT_ERROR_LIMIT {
            failures = next_failure_count(failures, false);
            assert_eq!(failures, expected);
        }

        for _ in 0..10 {
            failures = next_failure_count(failures, false);
        }
        assert_eq!(failures, HEARTBEAT_ERROR_LIMIT);
    }

    #[test]
    fn test_failure_count_resets_on_success() {
        let failures = (0..HEARTBEAT_ERROR_LIMIT + 5).fold(0, |n, _| next_failure_count(n, false));
        assert_eq!(failures, HEARTBEAT_ERROR_LIMIT);

        assert_eq!(next_failure_count(failures, true), 0);
        assert_eq!(next_failure_count(0, true), 0);
        assert_eq!(next_failure_count(7, false), 8);
    }
}
