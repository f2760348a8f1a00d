//! The established link: connect, loss signalling and the framed writer.

use std::sync::Arc;
use std::time::Duration;

use sockline_core::logging::targets;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::watch;
use tokio::time::timeout;

use super::config::ClientConfig;
use crate::codec::Frame;
use crate::error::{ClientError, Result};

/// Open a TCP connection to the configured server.
pub(crate) async fn connect(config: &ClientConfig) -> Result<TcpStream> {
    let addr = config.address();
    let attempt = TcpStream::connect(addr.as_str());
    let connected = match config.socket.connect_timeout {
        Some(limit) => timeout(limit, attempt)
            .await
            .map_err(|_| ClientError::Timeout)?,
        None => attempt.await,
    };
    let stream = connected.map_err(|e| ClientError::Connect(format!("{addr}: {e}")))?;

    if let Err(e) = stream.set_nodelay(config.socket.no_delay) {
        tracing::warn!(target: targets::CLIENT, error = %e, "failed to set TCP_NODELAY");
    }
    Ok(stream)
}

/// Shared "this connection is finished" flag.
///
/// Tripped by whichever side notices first: the read loop on EOF, a writer on
/// an I/O failure, a `close` send, or shutdown. The first reason wins.
#[derive(Clone, Debug)]
pub(crate) struct LinkSignal {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl LinkSignal {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Mark the link as lost. Later reasons are ignored.
    pub(crate) fn trip(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    pub(crate) fn is_tripped(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Resolves once the link has been tripped, with the first reason.
    pub(crate) async fn tripped(&self) -> String {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or_default(),
            Err(_) => String::from("link dropped"),
        }
    }
}

/// Trips the link if a frame write is abandoned half way.
struct PartialWriteGuard<'a> {
    link: &'a LinkSignal,
    armed: bool,
}

impl Drop for PartialWriteGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.link.trip("send cancelled mid-frame");
        }
    }
}

/// Trips the link if a multi-frame send is dropped before its last frame.
///
/// The peer has no way to resume a half-sent file, so the stream is only
/// usable again once the whole sequence has gone out.
#[derive(Debug)]
pub(crate) struct TransferGuard {
    link: LinkSignal,
    armed: bool,
}

impl TransferGuard {
    pub(crate) fn new(link: LinkSignal) -> Self {
        Self { link, armed: true }
    }

    /// Every frame of the sequence has been written.
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        if self.armed {
            self.link.trip("file send cancelled mid-transfer");
        }
    }
}

/// The outbound half of an established connection.
///
/// Lives behind the client's writer lock; whoever holds the lock owns the
/// wire until they release it, so frames from concurrent sends never
/// interleave.
#[derive(Debug)]
pub(crate) struct Writer {
    half: OwnedWriteHalf,
    link: LinkSignal,
    write_timeout: Option<Duration>,
}

impl Writer {
    pub(crate) fn new(half: OwnedWriteHalf, link: LinkSignal, write_timeout: Option<Duration>) -> Self {
        Self {
            half,
            link,
            write_timeout,
        }
    }

    /// Write one frame.
    ///
    /// Any failure trips the link: a partially written frame leaves the
    /// stream unrecoverable.
    pub(crate) async fn send(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.to_bytes();
        let Self {
            half,
            link,
            write_timeout,
        } = self;
        let link = &*link;

        if link.is_tripped() {
            return Err(ClientError::NotConnected);
        }

        let mut guard = PartialWriteGuard { link, armed: true };
        let result = tokio::select! {
            biased;
            reason = link.tripped() => Err(ClientError::ConnectionLost(reason)),
            written = write_with_timeout(half, &bytes, *write_timeout) => written,
        };
        guard.armed = false;

        if let Err(err) = &result {
            link.trip(err.to_string());
            tracing::debug!(target: targets::CLIENT, error = %err, "frame write failed");
        } else {
            tracing::trace!(target: targets::CLIENT, kind = %frame.kind(), bytes = bytes.len(), "frame written");
        }
        result
    }

    /// Flush anything buffered below the frame layer.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        if let Err(e) = self.half.flush().await {
            self.link.trip(e.to_string());
            return Err(ClientError::ConnectionLost(e.to_string()));
        }
        Ok(())
    }

    /// Close the link after a completed write.
    pub(crate) async fn close(&mut self, reason: &str) {
        if let Err(e) = self.half.shutdown().await {
            tracing::debug!(target: targets::CLIENT, error = %e, "socket shutdown failed");
        }
        self.link.trip(reason);
    }

    /// Guard a sequence of frames that must reach the peer as a whole.
    pub(crate) fn transfer_guard(&self) -> TransferGuard {
        TransferGuard::new(self.link.clone())
    }

    /// Mark the link lost without writing anything further.
    pub(crate) fn abandon(&self, reason: impl Into<String>) {
        self.link.trip(reason);
    }
}

async fn write_with_timeout(
    half: &mut OwnedWriteHalf,
    bytes: &[u8],
    limit: Option<Duration>,
) -> Result<()> {
    let write = half.write_all(bytes);
    let written = match limit {
        Some(limit) => timeout(limit, write)
            .await
            .map_err(|_| ClientError::Timeout)?,
        None => write.await,
    };
    written.map_err(|e| ClientError::ConnectionLost(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_link_signal_keeps_first_reason() {
        let link = LinkSignal::new();
        assert!(!link.is_tripped());

        let waiter = {
            let link = link.clone();
            tokio::spawn(async move { link.tripped().await })
        };
        link.trip("remote closed");
        link.trip("second");

        assert!(link.is_tripped());
        assert_eq!(waiter.await.unwrap(), "remote closed");
        assert_eq!(link.tripped().await, "remote closed");
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ClientConfig::new("127.0.0.1", port);
        let err = connect(&config).await.unwrap_err();
        assert!(matches!(err, ClientError::Connect(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_writer_fails_after_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ClientConfig::new("127.0.0.1", port);

        let (stream, _peer) = tokio::join!(connect(&config), listener.accept());
        let (_read, write) = stream.unwrap().into_split();
        let link = LinkSignal::new();
        let mut writer = Writer::new(write, link.clone(), None);

        let frame = Frame::message("message", "hi").unwrap();
        writer.send(&frame).await.unwrap();

        writer.abandon("test");
        assert_eq!(writer.send(&frame).await, Err(ClientError::NotConnected));
    }

    #[test]
    fn test_transfer_guard_trips_unless_disarmed() {
        let link = LinkSignal::new();
        TransferGuard::new(link.clone()).disarm();
        assert!(!link.is_tripped());

        drop(TransferGuard::new(link.clone()));
        assert!(link.is_tripped());
    }
}
