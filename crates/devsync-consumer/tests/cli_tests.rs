//! Command-line flag handling of the consumer binary

use assert_cmd::Command;
use predicates::prelude::*;

fn consumer() -> Command {
    let mut cmd = Command::cargo_bin("devsync-consumer").unwrap();
    cmd.env_remove("DEVSYNC_PATH").env_remove("DEVSYNC_REDIS");
    cmd
}

#[test]
fn test_missing_path_exits_with_error() {
    consumer()
        .args(["--redis", "127.0.0.1:6379"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::starts_with("err: "))
        .stdout(predicate::str::contains("local image path is empty"));
}

#[test]
fn test_missing_redis_exits_with_error() {
    consumer()
        .args(["--path", "/tmp/devsync"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("redis queue addr is empty"));
}

#[test]
fn test_zero_workers_rejected() {
    consumer()
        .args(["--path", "/tmp/devsync", "--redis", "127.0.0.1:6379", "--workers", "0"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("worker count must be greater than 0"));
}

#[test]
fn test_unreachable_broker_fails_startup() {
    let dir = tempfile::tempdir().unwrap();

    consumer()
        .env_remove("NODE_CHANNEL_FD")
        .args(["--path", dir.path().to_str().unwrap(), "--redis", "127.0.0.1:1"])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("err: "));
}

#[test]
fn test_help_lists_flags() {
    consumer()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--path"))
        .stdout(predicate::str::contains("--redis"))
        .stdout(predicate::str::contains("--reject-at-batch-boundary"));
}
