//! Graceful and forced shutdown
//!
//! The first interrupt starts draining: fetching stops and workers finish the
//! job they hold. A second interrupt while draining gives up on the drain.

use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::future::Future;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Drain completed
    Graceful,
    /// Interrupted again while draining
    Forced,
}

impl ShutdownOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownOutcome::Graceful => 0,
            ShutdownOutcome::Forced => 1,
        }
    }
}

/// Shutdown state machine
#[derive(Debug)]
pub struct Shutdown {
    state: watch::Sender<ShutdownState>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self { state }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Wait for an interrupt, then run `drain` until it completes or another
    /// interrupt arrives.
    ///
    /// An exhausted signal stream counts as an interrupt.
    pub async fn run<S, D>(&self, mut signals: S, drain: D) -> ShutdownOutcome
    where
        S: Stream<Item = ()> + Unpin,
        D: Future<Output = ()>,
    {
        signals.next().await;
        self.state.send_replace(ShutdownState::Draining);
        info!("Interrupt received, draining workers");

        tokio::pin!(drain);
        tokio::select! {
            _ = &mut drain => {
                self.state.send_replace(ShutdownState::Stopped);
                info!("Drain complete");
                ShutdownOutcome::Graceful
            },
            Some(()) = signals.next() => {
                warn!("Second interrupt received, forcing exit");
                ShutdownOutcome::Forced
            },
        }
    }
}

/// Stream yielding once per SIGINT or SIGTERM
#[cfg(unix)]
pub fn interrupt_signals() -> std::io::Result<BoxStream<'static, ()>> {
    use tokio::signal::unix::{signal, Signal, SignalKind};

    fn each(sig: Signal) -> impl Stream<Item = ()> {
        stream::unfold(sig, |mut sig| async move { sig.recv().await.map(|()| ((), sig)) })
    }

    let interrupt = each(signal(SignalKind::interrupt())?);
    let terminate = each(signal(SignalKind::terminate())?);

    Ok(stream::select(interrupt, terminate).boxed())
}

/// Stream yielding once per Ctrl+C
#[cfg(not(unix))]
pub fn interrupt_signals() -> std::io::Result<BoxStream<'static, ()>> {
    Ok(stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
    })
    .boxed())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_graceful_drain() {
        let shutdown = Shutdown::new();
        let mut state = shutdown.subscribe();
        let (tx, rx) = mpsc::unbounded();
        tx.unbounded_send(()).unwrap();

        let drain = async move {
            assert_eq!(*state.borrow_and_update(), ShutdownState::Draining);
            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        let outcome = shutdown.run(rx, drain).await;

        assert_eq!(outcome, ShutdownOutcome::Graceful);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(shutdown.state(), ShutdownState::Stopped);
    }

    #[tokio::test]
    async fn test_second_interrupt_forces_exit() {
        let shutdown = Shutdown::new();
        let (tx, rx) = mpsc::unbounded();
        tx.unbounded_send(()).unwrap();
        tx.unbounded_send(()).unwrap();

        let outcome = shutdown.run(rx, std::future::pending::<()>()).await;

        assert_eq!(outcome, ShutdownOutcome::Forced);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(shutdown.state(), ShutdownState::Draining);
    }

    #[tokio::test]
    async fn test_waits_for_first_interrupt() {
        let shutdown = Shutdown::new();
        let (tx, rx) = mpsc::unbounded();

        let run = shutdown.run(rx, async {});
        tokio::pin!(run);

        let early = tokio::time::timeout(Duration::from_millis(20), &mut run).await;
        assert!(early.is_err());
        assert_eq!(shutdown.state(), ShutdownState::Running);

        tx.unbounded_send(()).unwrap();
        assert_eq!(run.await, ShutdownOutcome::Graceful);
    }
}
