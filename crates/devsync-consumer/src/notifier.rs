//! Status messages to the supervising process
//!
//! A Node.js parent that spawns the consumer with an IPC channel exports the
//! channel's descriptor as `NODE_CHANNEL_FD`. Messages on that channel are
//! newline-delimited JSON. Without a channel the messages go to standard
//! output instead.

use crate::error::NotifyError;
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

/// Environment variable holding the parent's IPC descriptor
pub const NODE_CHANNEL_FD: &str = "NODE_CHANNEL_FD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
}

/// Message sent to the parent after each completed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub status: Status,
}

impl StatusMessage {
    pub fn success() -> Self {
        Self {
            status: Status::Success,
        }
    }
}

/// Sink for status messages
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &StatusMessage) -> Result<(), NotifyError>;
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Duplex channel to the parent process (write side only)
pub struct ParentChannel {
    writer: Mutex<Writer>,
}

impl ParentChannel {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    /// Open the channel announced by `NODE_CHANNEL_FD`, or fall back to
    /// standard output when the variable is unset.
    pub fn from_env() -> Result<Self, NotifyError> {
        match std::env::var(NODE_CHANNEL_FD) {
            Ok(fd) => {
                debug!(fd = %fd, "Using parent IPC channel");
                Self::from_descriptor(&fd)
            },
            Err(_) => {
                debug!("No parent IPC channel, writing status to stdout");
                Ok(Self::new(tokio::io::stdout()))
            },
        }
    }

    #[cfg(unix)]
    fn from_descriptor(fd: &str) -> Result<Self, NotifyError> {
        use std::os::fd::{FromRawFd, OwnedFd, RawFd};

        let raw: RawFd = fd
            .trim()
            .parse()
            .map_err(|_| NotifyError::InvalidDescriptor(fd.to_string()))?;
        if raw < 0 {
            return Err(NotifyError::InvalidDescriptor(fd.to_string()));
        }

        // SAFETY: the parent hands us ownership of this descriptor through
        // NODE_CHANNEL_FD and nothing else in the process uses it.
        let owned = unsafe { OwnedFd::from_raw_fd(raw) };
        let stream = std::os::unix::net::UnixStream::from(owned);
        stream.set_nonblocking(true)?;
        let stream = tokio::net::UnixStream::from_std(stream)?;

        Ok(Self::new(stream))
    }

    #[cfg(not(unix))]
    fn from_descriptor(fd: &str) -> Result<Self, NotifyError> {
        Err(NotifyError::InvalidDescriptor(fd.to_string()))
    }

    /// Readiness message sent once at startup
    pub async fn handshake(&self) -> Result<(), NotifyError> {
        self.notify(&StatusMessage::success()).await
    }
}

#[async_trait]
impl Notifier for ParentChannel {
    async fn notify(&self, message: &StatusMessage) -> Result<(), NotifyError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[test]
    fn test_status_message_json() {
        let json = serde_json::to_string(&StatusMessage::success()).unwrap();
        assert_eq!(json, r#"{"status":"success"}"#);
    }

    #[tokio::test]
    async fn test_messages_are_newline_delimited() {
        let (client, server) = tokio::io::duplex(1024);
        let channel = ParentChannel::new(client);

        channel.handshake().await.unwrap();
        channel.notify(&StatusMessage::success()).await.unwrap();

        let mut lines = BufReader::new(server).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), r#"{"status":"success"}"#);
        assert_eq!(lines.next_line().await.unwrap().unwrap(), r#"{"status":"success"}"#);
    }

    #[tokio::test]
    async fn test_closed_channel_fails() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let channel = ParentChannel::new(client);

        let err = channel.handshake().await.unwrap_err();
        assert!(matches!(err, NotifyError::Io(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_descriptor_channel_writes_to_peer() {
        use std::io::Read;
        use std::os::fd::IntoRawFd;

        let (ours, mut peer) = std::os::unix::net::UnixStream::pair().unwrap();
        let fd = ours.into_raw_fd();

        let channel = ParentChannel::from_descriptor(&fd.to_string()).unwrap();
        channel.handshake().await.unwrap();
        drop(channel);

        let mut received = String::new();
        peer.read_to_string(&mut received).unwrap();
        assert_eq!(received, "{\"status\":\"success\"}\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_invalid_descriptor() {
        assert!(matches!(
            ParentChannel::from_descriptor("not-a-fd"),
            Err(NotifyError::InvalidDescriptor(_))
        ));
        assert!(matches!(
            ParentChannel::from_descriptor("-3"),
            Err(NotifyError::InvalidDescriptor(_))
        ));
    }
}
