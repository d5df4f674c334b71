//! End-to-end tests against a real Redis broker
//!
//! Run with: `cargo test -p devsync-consumer --test queue_e2e_tests -- --ignored`

use anyhow::Result;
use devsync_common::Job;
use devsync_consumer::broker::{keys, Connection};
use devsync_consumer::config::queue_name;
use devsync_consumer::disposition::BatchBoundaryPolicy;
use devsync_consumer::notifier::{Notifier, ParentChannel};
use devsync_consumer::{ConsumerConfig, ConsumerPool, ShutdownOutcome};
use redis::AsyncCommands;
use std::num::NonZeroU64;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::redis::Redis;
use tokio::sync::mpsc;
use tracing::info;

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,devsync_consumer=debug")),
        )
        .with_test_writer()
        .try_init();
}

async fn start_redis() -> Result<(ContainerAsync<Redis>, String)> {
    let container = Redis::default().start().await?;
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(6379).await?;
    Ok((container, format!("{host}:{port}")))
}

fn config(path: &Path, redis_addr: &str, device_id: u32, batch_size: u64) -> ConsumerConfig {
    ConsumerConfig {
        path: path.to_path_buf(),
        redis_addr: redis_addr.to_string(),
        device_id,
        worker_count: 2,
        prefetch_limit: 10,
        poll_interval: Duration::from_millis(20),
        fetch_timeout: Duration::from_secs(5),
        batch_policy: BatchBoundaryPolicy::new(NonZeroU64::new(batch_size).unwrap_or(NonZeroU64::MIN)),
        error_channel_capacity: 10,
    }
}

fn quiet_notifier() -> Arc<dyn Notifier> {
    Arc::new(ParentChannel::new(tokio::io::sink()))
}

async fn wait_until_settled(redis_addr: &str, queue: &str) -> Result<()> {
    let client = redis::Client::open(format!("redis://{redis_addr}"))?;
    let mut conn = client.get_multiplexed_async_connection().await?;

    for _ in 0..200 {
        let ready: u64 = conn.llen(keys::ready(queue)).await?;
        let connections: Vec<String> = conn.smembers(keys::CONNECTIONS).await?;
        let mut unacked = 0u64;
        for name in &connections {
            let len: u64 = conn.llen(keys::unacked(name, queue)).await?;
            unacked += len;
        }
        if ready == 0 && unacked == 0 {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    anyhow::bail!("queue '{queue}' did not drain")
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_pool_acks_and_rejects() -> Result<()> {
    init_tracing();
    let (_container, redis_addr) = start_redis().await?;
    let dir = TempDir::new()?;
    let config = config(dir.path(), &redis_addr, 1, 10_000);

    std::fs::write(dir.path().join("a.jpeg"), b"a")?;
    std::fs::write(dir.path().join("b.jpeg"), b"b")?;

    let (errors_tx, _errors_rx) = mpsc::channel(10);
    let pool = ConsumerPool::start(&config, quiet_notifier(), errors_tx).await?;
    assert_eq!(pool.workers(), ["consumer0", "consumer1"]);

    pool.queue().publish(&Job::delete("a.jpeg").encode()?).await?;
    pool.queue().publish(&Job::delete("b.jpeg").encode()?).await?;
    pool.queue().publish("not json").await?;
    pool.queue().publish(&Job::delete("missing.jpeg").encode()?).await?;

    wait_until_settled(&redis_addr, &queue_name(1)).await?;

    assert!(!dir.path().join("a.jpeg").exists());
    assert!(!dir.path().join("b.jpeg").exists());
    assert_eq!(pool.queue().rejected_count().await?, 2);
    info!("Deliveries settled");

    let outcome = pool.run_until_shutdown(futures::stream::iter([()])).await;
    assert_eq!(outcome, ShutdownOutcome::Graceful);

    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_batch_boundary_rejects_applied_job() -> Result<()> {
    init_tracing();
    let (_container, redis_addr) = start_redis().await?;
    let dir = TempDir::new()?;
    let mut config = config(dir.path(), &redis_addr, 2, 3);
    config.worker_count = 1;

    for i in 0..3 {
        std::fs::write(dir.path().join(format!("{i}.jpeg")), b"x")?;
    }

    let (errors_tx, _errors_rx) = mpsc::channel(10);
    let pool = ConsumerPool::start(&config, quiet_notifier(), errors_tx).await?;
    for i in 0..3 {
        pool.queue()
            .publish(&Job::delete(format!("{i}.jpeg")).encode()?)
            .await?;
    }

    wait_until_settled(&redis_addr, &queue_name(2)).await?;

    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    assert_eq!(pool.queue().rejected_count().await?, 1);

    pool.run_until_shutdown(futures::stream::iter([()])).await;
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_stop_returns_buffered_deliveries() -> Result<()> {
    init_tracing();
    let (_container, redis_addr) = start_redis().await?;
    let (errors_tx, _errors_rx) = mpsc::channel(10);

    let connection = Connection::open("test", &redis_addr, errors_tx).await?;
    let queue = connection.open_queue("sync-device-9").await?;
    for i in 0..5 {
        queue.publish(&format!("job-{i}")).await?;
    }

    // No consumers: everything fetched stays in the buffer
    queue.start_consuming(3, Duration::from_millis(20))?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(queue.unacked_count().await?, 3);
    assert_eq!(queue.ready_count().await?, 2);

    connection.stop_all_consuming().await;

    assert_eq!(queue.unacked_count().await?, 0);
    assert_eq!(queue.ready_count().await?, 5);

    let client = redis::Client::open(format!("redis://{redis_addr}"))?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let connections: Vec<String> = conn.smembers(keys::CONNECTIONS).await?;
    assert!(connections.is_empty());

    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_start_consuming_twice_fails() -> Result<()> {
    let (_container, redis_addr) = start_redis().await?;
    let (errors_tx, _errors_rx) = mpsc::channel(10);

    let connection = Connection::open("test", &redis_addr, errors_tx).await?;
    let queue = connection.open_queue("sync-device-3").await?;

    assert!(queue.start_consuming(0, Duration::from_millis(20)).is_err());
    queue.start_consuming(1, Duration::from_millis(20))?;
    assert!(queue.start_consuming(1, Duration::from_millis(20)).is_err());

    connection.stop_all_consuming().await;
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
#[ignore] // Requires Docker
async fn test_interrupt_on_empty_queue_exits_cleanly() -> Result<()> {
    use std::process::Stdio;
    use tokio::process::Command;

    let (_container, redis_addr) = start_redis().await?;
    let dir = TempDir::new()?;

    let child = Command::new(assert_cmd::cargo::cargo_bin("devsync-consumer"))
        .arg("--path")
        .arg(dir.path())
        .args(["--redis", &redis_addr])
        .env_remove("NODE_CHANNEL_FD")
        .stdout(Stdio::piped())
        .spawn()?;
    let pid = child.id().ok_or_else(|| anyhow::anyhow!("consumer exited early"))?;

    tokio::time::sleep(Duration::from_secs(2)).await;
    let status = Command::new("kill")
        .args(["-INT", &pid.to_string()])
        .status()
        .await?;
    assert!(status.success());

    let output = child.wait_with_output().await?;
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains(r#"{"status":"success"}"#));
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);

    Ok(())
}
