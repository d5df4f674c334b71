//! Redis key layout
//!
//! Compatible with the layout used by the job producers' queue library.

/// Set of live connection names
pub const CONNECTIONS: &str = "rmq::connections";

/// Set of known queue names
pub const QUEUES: &str = "rmq::queues";

pub fn heartbeat(connection: &str) -> String {
    format!("rmq::connection::{connection}::heartbeat")
}

/// Set of queues a connection consumes from
pub fn connection_queues(connection: &str) -> String {
    format!("rmq::connection::{connection}::queues")
}

/// Set of consumer tags a connection runs on a queue
pub fn consumers(connection: &str, queue: &str) -> String {
    format!("rmq::connection::{connection}::queue::[{queue}]::consumers")
}

/// Deliveries a connection has fetched but not yet settled
pub fn unacked(connection: &str, queue: &str) -> String {
    format!("rmq::connection::{connection}::queue::[{queue}]::unacked")
}

pub fn ready(queue: &str) -> String {
    format!("rmq::queue::[{queue}]::ready")
}

pub fn rejected(queue: &str) -> String {
    format!("rmq::queue::[{queue}]::rejected")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_keys() {
        assert_eq!(ready("sync-device-1"), "rmq::queue::[sync-device-1]::ready");
        assert_eq!(rejected("sync-device-1"), "rmq::queue::[sync-device-1]::rejected");
        assert_eq!(
            unacked("consumer-ab12", "sync-device-1"),
            "rmq::connection::consumer-ab12::queue::[sync-device-1]::unacked"
        );
        assert_eq!(heartbeat("consumer-ab12"), "rmq::connection::consumer-ab12::heartbeat");
    }
}
