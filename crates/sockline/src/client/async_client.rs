//! The public client handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use sockline_core::logging::{span_names, targets};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::config::ClientConfig;
use super::connection::Writer;
use super::state::ConnectionState;
use super::supervisor::{self, Shared};
use crate::codec::Frame;
use crate::error::{ClientError, Result};
use crate::events::{
    ClientEvent, ClientEvents, EventDispatcher, MessageKind, ReceivedMessage, Submission,
    SubmissionKind,
};
use crate::serialization::to_xml;
use crate::transfer::FileSource;

/// Header used by [`AsyncClient::send_message`].
pub const DEFAULT_MESSAGE_HEADER: &str = "message";

#[derive(Debug, Default)]
enum Lifecycle {
    #[default]
    Idle,
    Running {
        shared: Arc<Shared>,
        supervisor: Option<JoinHandle<()>>,
    },
    Disposed,
}

/// An asynchronous TCP client for messages, objects and files.
///
/// The client keeps one connection to one server. Once started it connects
/// in the background, reconnects on a fixed interval after any loss, and
/// reports everything that happens through the signals on
/// [`events`](Self::events).
///
/// Sends are `async` and return once their bytes have been written; any
/// number of tasks may send at once and their frames never interleave.
///
/// # Example
///
/// ```ignore
/// use sockline::AsyncClient;
///
/// let client = AsyncClient::new();
/// client.events().message_received.connect(|msg| {
///     println!("{}: {}", msg.header, msg.text);
/// });
///
/// client.start_client("127.0.0.1", 9000)?;
/// client.send_message("hello", false).await?;
/// client.send_file("report.pdf", "inbox/report.pdf", false).await?;
/// client.dispose().await;
/// ```
pub struct AsyncClient {
    events: Arc<ClientEvents>,
    lifecycle: Mutex<Lifecycle>,
}

impl AsyncClient {
    /// Create a client. Nothing happens until it is started.
    pub fn new() -> Self {
        Self {
            events: Arc::new(ClientEvents::new()),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    /// Signals raised by this client.
    pub fn events(&self) -> &ClientEvents {
        &self.events
    }

    /// Start connecting to `host:port`, reconnecting every 5 seconds.
    pub fn start_client(&self, host: impl Into<String>, port: u16) -> Result<()> {
        self.start_with_config(ClientConfig::new(host, port))
    }

    /// Start connecting to `host:port`, reconnecting every
    /// `reconnect_secs` seconds.
    pub fn start_client_with_interval(
        &self,
        host: impl Into<String>,
        port: u16,
        reconnect_secs: u64,
    ) -> Result<()> {
        self.start_with_config(
            ClientConfig::new(host, port).reconnect_interval(Duration::from_secs(reconnect_secs)),
        )
    }

    /// Start with a full configuration.
    ///
    /// Must be called from within a Tokio runtime. A client can be started
    /// once.
    pub fn start_with_config(&self, config: ClientConfig) -> Result<()> {
        config.validate()?;
        let handle = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let mut lifecycle = self.lifecycle.lock();
        match &*lifecycle {
            Lifecycle::Idle => {}
            Lifecycle::Running { .. } => return Err(ClientError::AlreadyStarted),
            Lifecycle::Disposed => return Err(ClientError::Disposed),
        }

        tracing::info!(target: targets::CLIENT, addr = %config.address(), "starting client");
        let (dispatcher, _dispatcher_task) = EventDispatcher::spawn(&handle, self.events.clone());
        let shared = Arc::new(Shared::new(config, dispatcher));
        // Connecting is reported before the supervisor can produce anything.
        shared.set_state(ConnectionState::Connecting);
        let supervisor = handle.spawn(supervisor::run(shared.clone()));

        *lifecycle = Lifecycle::Running {
            shared,
            supervisor: Some(supervisor),
        };
        Ok(())
    }

    fn shared(&self) -> Result<Arc<Shared>> {
        match &*self.lifecycle.lock() {
            Lifecycle::Running { shared, .. } => Ok(shared.clone()),
            Lifecycle::Idle => Err(ClientError::NotConnected),
            Lifecycle::Disposed => Err(ClientError::Disposed),
        }
    }

    /// The active configuration, once started.
    pub fn config(&self) -> Option<ClientConfig> {
        self.shared().ok().map(|shared| shared.config.clone())
    }

    /// Configured server host.
    pub fn host(&self) -> Option<String> {
        self.config().map(|config| config.host)
    }

    /// Configured server port.
    pub fn port(&self) -> Option<u16> {
        self.config().map(|config| config.port)
    }

    /// Configured `host:port`.
    pub fn address(&self) -> Option<String> {
        self.config().map(|config| config.address())
    }

    /// Delay between reconnect attempts, if reconnecting is enabled.
    pub fn reconnect_interval(&self) -> Option<Duration> {
        self.config()
            .and_then(|config| config.reconnect.map(|policy| policy.interval))
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared()
            .map(|shared| shared.state())
            .unwrap_or_default()
    }

    /// Whether a connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Start consuming inbound frames.
    ///
    /// Only needed when the client was configured with
    /// `auto_receive(false)`. Once enabled, reading continues across
    /// reconnects.
    pub fn receive(&self) -> Result<()> {
        self.shared()?.enable_receive();
        Ok(())
    }

    /// Send a text message with the default header.
    ///
    /// With `close`, the connection is shut down once the message has been
    /// flushed.
    pub async fn send_message(&self, text: &str, close: bool) -> Result<()> {
        self.send_message_with_header(DEFAULT_MESSAGE_HEADER, text, close)
            .await
    }

    /// Send a text message with a caller-chosen header.
    pub async fn send_message_with_header(
        &self,
        header: &str,
        text: &str,
        close: bool,
    ) -> Result<()> {
        let frame = Frame::message(header, text)?;
        self.submit(frame, SubmissionKind::Message, close).await
    }

    /// Serialize `value` to XML and send it.
    ///
    /// The frame header is the XML root element name.
    pub async fn send_object<T: Serialize + ?Sized>(&self, value: &T, close: bool) -> Result<()> {
        let payload = to_xml(value)?;
        let frame = Frame::object(payload.root, payload.xml)?;
        self.submit(frame, SubmissionKind::Object, close).await
    }

    async fn submit(&self, frame: Frame, kind: SubmissionKind, close: bool) -> Result<()> {
        let shared = self.shared()?;
        let mut guard = shared.writer.lock().await;
        let writer = guard.as_mut().ok_or(ClientError::NotConnected)?;

        writer.send(&frame).await?;
        writer.flush().await?;
        shared
            .dispatcher
            .send(ClientEvent::MessageSubmitted(Submission {
                kind,
                header: frame.header().to_string(),
                bytes: frame.len() as u64,
                close,
            }));
        if close {
            close_after_send(&mut guard).await;
        }
        Ok(())
    }

    /// Stream a local file to `remote_path` on the server.
    ///
    /// The source must be a regular file. The writer is held for the whole
    /// transfer, so other sends wait until the file is done. Dropping the
    /// returned future part way through closes the connection.
    pub async fn send_file(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        close: bool,
    ) -> Result<()> {
        let shared = self.shared()?;
        let mut source =
            FileSource::open(local_path, remote_path, shared.config.chunk_size).await?;
        let span = tracing::debug_span!(
            target: targets::TRANSFER,
            span_names::FILE_SEND,
            source = %source.path().display(),
            remote = remote_path,
            total = source.total()
        );

        async {
            let mut guard = shared.writer.lock().await;
            let writer = guard.as_mut().ok_or(ClientError::NotConnected)?;

            let header = source.header()?;
            // From the header on, dropping this future ends the link so the
            // peer aborts its session instead of waiting on it.
            let transfer = writer.transfer_guard();
            writer.send(&header).await?;
            loop {
                match source.next_chunk().await {
                    Ok(Some(chunk)) => writer.send(&chunk).await?,
                    Ok(None) => break,
                    Err(err) => {
                        writer.abandon(err.to_string());
                        return Err(err);
                    }
                }
            }
            transfer.disarm();
            writer.flush().await?;
            tracing::debug!(target: targets::TRANSFER, bytes = source.sent(), "file sent");

            shared
                .dispatcher
                .send(ClientEvent::MessageSubmitted(Submission {
                    kind: SubmissionKind::File,
                    header: source.remote().to_string(),
                    bytes: source.total(),
                    close,
                }));
            if close {
                close_after_send(&mut guard).await;
            }
            Ok::<(), ClientError>(())
        }
        .instrument(span)
        .await
    }

    /// Raise `message_received` locally without touching the network.
    pub fn invoke_message(&self, header: &str, text: &str) {
        self.invoke(ClientEvent::MessageReceived(ReceivedMessage::new(
            MessageKind::Text,
            header,
            text,
        )));
    }

    /// Raise `file_received` locally without touching the network.
    pub fn invoke_file_received(&self, path: impl Into<PathBuf>) {
        self.invoke(ClientEvent::FileReceived(path.into()));
    }

    fn invoke(&self, event: ClientEvent) {
        match self.shared() {
            Ok(shared) => shared.dispatcher.send(event),
            Err(_) => crate::events::deliver(&self.events, event),
        }
    }

    /// Stop the client.
    ///
    /// Ends the connection, stops reconnecting, waits for the supervisor to
    /// finish and for every queued event to be delivered. In-flight sends
    /// fail with [`ClientError::ConnectionLost`]. Later calls do nothing.
    pub async fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Disposed);
        let Lifecycle::Running { shared, supervisor } = previous else {
            return;
        };

        tracing::info!(target: targets::CLIENT, "disposing client");
        shared.request_stop();
        if let Some(task) = supervisor
            && let Err(e) = task.await
        {
            tracing::warn!(target: targets::CLIENT, error = %e, "supervisor task failed");
            shared.set_state(ConnectionState::Disconnected);
        }
        shared.dispatcher.flush().await;
    }
}

async fn close_after_send(slot: &mut Option<Writer>) {
    if let Some(mut writer) = slot.take() {
        writer.close("closed after send").await;
    }
}

impl Default for AsyncClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AsyncClient {
    fn drop(&mut self) {
        if let Lifecycle::Running { shared, .. } = &*self.lifecycle.lock() {
            shared.request_stop();
        }
    }
}

impl std::fmt::Debug for AsyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncClient")
            .field("address", &self.address())
            .field("state", &self.state())
            .finish()
    }
}
