//! DevSync Consumer - Main entry point

use anyhow::Result;
use clap::Parser;
use devsync_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use devsync_consumer::{
    error_sink,
    notifier::{Notifier, ParentChannel},
    shutdown::interrupt_signals,
    Cli, ConsumerConfig, ConsumerPool, ShutdownOutcome, StartupError,
};
use std::process;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match ConsumerConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            println!("err: {e}");
            process::exit(1);
        },
    };

    if let Err(e) = setup_logging(cli.verbose) {
        eprintln!("Failed to initialize logging: {e:#}");
    }

    match run(config).await {
        Ok(ShutdownOutcome::Graceful) => info!("Consumer stopped"),
        Ok(ShutdownOutcome::Forced) => process::exit(ShutdownOutcome::Forced.exit_code()),
        Err(e) => {
            error!(error = %e, "Consumer failed to start");
            println!("err: {e}");
            process::exit(1);
        },
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { LogLevel::Debug } else { LogLevel::Info };

    let log_config = LogConfig::builder()
        .level(level)
        .output(LogOutput::Console)
        .log_file_prefix("devsync-consumer")
        .build()
        .with_env()?;

    init_logging(&log_config)
}

async fn run(config: ConsumerConfig) -> devsync_consumer::Result<ShutdownOutcome> {
    let parent = Arc::new(ParentChannel::from_env()?);
    if let Err(e) = parent.handshake().await {
        warn!(error = %e, "Parent handshake failed");
    }

    let signals = interrupt_signals().map_err(StartupError::Signal)?;

    let (errors_tx, errors_rx) = mpsc::channel(config.error_channel_capacity);
    let sink = error_sink::spawn(errors_rx);

    let notifier: Arc<dyn Notifier> = parent;
    let pool = ConsumerPool::start(&config, notifier, errors_tx).await?;
    info!(
        queue = %pool.queue().name(),
        workers = pool.workers().len(),
        "Waiting for jobs"
    );

    let outcome = pool.run_until_shutdown(signals).await;

    if outcome == ShutdownOutcome::Graceful {
        match sink.await {
            Ok(seen) if seen > 0 => info!(errors = seen, "Connection errors during run"),
            Ok(_) => {},
            Err(e) => warn!(error = %e, "Error sink ended abnormally"),
        }
    }

    Ok(outcome)
}
