//! Event delivery.
//!
//! The I/O tasks never call user handlers directly. They push a
//! [`ClientEvent`] onto an unbounded queue, and a single dispatcher task
//! drains it and emits the matching [`Signal`] on [`ClientEvents`]. Events of
//! every kind therefore reach handlers in the order they were produced, and a
//! slow handler delays later events but never a socket read or write.
//!
//! Handlers run on the dispatcher task. A handler that panics does not stop
//! delivery: the panic is caught and reported on [`ClientEvents::error`].

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use sockline_core::logging::targets;
use sockline_core::{Signal, SignalError};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::client::ConnectionState;
use crate::error::{ClientError, SerializationError};
use crate::serialization::from_xml;

/// What kind of frame a received message came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// A plain text message.
    Text,
    /// A serialized object; `text` holds the XML document.
    Object,
}

/// A message delivered to [`ClientEvents::message_received`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Text or object.
    pub kind: MessageKind,
    /// Frame header: the sender's tag, or the object's type tag.
    pub header: String,
    /// Message text or XML document.
    pub text: String,
}

impl ReceivedMessage {
    /// Create a message.
    pub fn new(kind: MessageKind, header: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind,
            header: header.into(),
            text: text.into(),
        }
    }

    /// Deserialize the XML carried by an object message.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, SerializationError> {
        from_xml(&self.text)
    }
}

/// What an outbound call put on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubmissionKind {
    /// `send_message`.
    Message,
    /// `send_object`.
    Object,
    /// `send_file`.
    File,
}

/// Delivered to [`ClientEvents::message_submitted`] once a send has been
/// flushed to the socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    /// Which call produced it.
    pub kind: SubmissionKind,
    /// Frame header: message tag, object type tag or remote file path.
    pub header: String,
    /// Payload bytes written (file contents for a file send).
    pub bytes: u64,
    /// Whether the connection was closed after the write.
    pub close: bool,
}

/// Signals raised by a client.
///
/// Connect handlers before calling `start_client` to observe the first
/// connection.
pub struct ClientEvents {
    /// A connection has been established.
    pub connected: Signal<()>,
    /// An established connection has ended.
    pub disconnected: Signal<()>,
    /// A text message or object arrived.
    pub message_received: Signal<ReceivedMessage>,
    /// An outbound send was flushed.
    pub message_submitted: Signal<Submission>,
    /// A file was fully received; carries the final path.
    pub file_received: Signal<PathBuf>,
    /// The connection state changed.
    pub state_changed: Signal<ConnectionState>,
    /// A background operation failed.
    pub error: Signal<ClientError>,
}

impl ClientEvents {
    /// Create a set of signals with no handlers.
    pub fn new() -> Self {
        Self {
            connected: Signal::new(),
            disconnected: Signal::new(),
            message_received: Signal::new(),
            message_submitted: Signal::new(),
            file_received: Signal::new(),
            state_changed: Signal::new(),
            error: Signal::new(),
        }
    }
}

impl Default for ClientEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClientEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientEvents")
            .field("connected", &self.connected)
            .field("disconnected", &self.disconnected)
            .field("message_received", &self.message_received)
            .field("message_submitted", &self.message_submitted)
            .field("file_received", &self.file_received)
            .field("state_changed", &self.state_changed)
            .field("error", &self.error)
            .finish()
    }
}

/// A queued notification.
#[derive(Debug)]
pub(crate) enum ClientEvent {
    Connected,
    Disconnected,
    MessageReceived(ReceivedMessage),
    MessageSubmitted(Submission),
    FileReceived(PathBuf),
    StateChanged(ConnectionState),
    Error(ClientError),
    /// Completes once every earlier event has been delivered.
    Barrier(oneshot::Sender<()>),
}

/// Producer side of the event queue.
#[derive(Clone, Debug)]
pub(crate) struct EventDispatcher {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl EventDispatcher {
    /// Spawn the dispatcher task on `handle`.
    ///
    /// The task ends once every `EventDispatcher` clone has been dropped and
    /// the queue is empty.
    pub(crate) fn spawn(handle: &Handle, events: Arc<ClientEvents>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = handle.spawn(run(rx, events));
        (Self { tx }, task)
    }

    /// Queue an event. Events sent after the dispatcher has stopped are
    /// dropped.
    pub(crate) fn send(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!(target: targets::EVENTS, "dispatcher stopped, event dropped");
        }
    }

    /// Queue an error event.
    pub(crate) fn error(&self, err: impl Into<ClientError>) {
        self.send(ClientEvent::Error(err.into()));
    }

    /// Wait until everything queued so far has been delivered.
    pub(crate) async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(ClientEvent::Barrier(tx));
        let _ = rx.await;
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<ClientEvent>, events: Arc<ClientEvents>) {
    tracing::trace!(target: targets::EVENTS, "dispatcher started");
    while let Some(event) = rx.recv().await {
        deliver(&events, event);
    }
    tracing::trace!(target: targets::EVENTS, "dispatcher stopped");
}

/// Emit one event on the calling thread.
pub(crate) fn deliver(events: &ClientEvents, event: ClientEvent) {
    let (name, result) = match event {
        ClientEvent::Connected => ("connected", events.connected.try_emit(())),
        ClientEvent::Disconnected => ("disconnected", events.disconnected.try_emit(())),
        ClientEvent::MessageReceived(message) => {
            ("message_received", events.message_received.try_emit(message))
        }
        ClientEvent::MessageSubmitted(submission) => (
            "message_submitted",
            events.message_submitted.try_emit(submission),
        ),
        ClientEvent::FileReceived(path) => ("file_received", events.file_received.try_emit(path)),
        ClientEvent::StateChanged(state) => ("state_changed", events.state_changed.try_emit(state)),
        ClientEvent::Error(err) => {
            tracing::debug!(target: targets::EVENTS, error = %err, "delivering error");
            ("error", events.error.try_emit(err))
        }
        ClientEvent::Barrier(done) => {
            let _ = done.send(());
            return;
        }
    };

    let Err(SignalError::SlotPanicked { failed, message }) = result else {
        return;
    };
    tracing::warn!(target: targets::EVENTS, event = name, failed, %message, "event handler panicked");

    if name == "error" {
        return;
    }
    let report = ClientError::Handler {
        event: name,
        message,
    };
    if let Err(SignalError::SlotPanicked { message, .. }) = events.error.try_emit(report) {
        tracing::warn!(target: targets::EVENTS, %message, "error handler panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_delivers_in_order() {
        let events = Arc::new(ClientEvents::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        events.connected.connect(move |_| l.lock().push("connected".to_string()));
        let l = log.clone();
        events
            .message_received
            .connect(move |m| l.lock().push(format!("msg:{}", m.text)));
        let l = log.clone();
        events
            .disconnected
            .connect(move |_| l.lock().push("disconnected".to_string()));

        let (dispatcher, _task) = EventDispatcher::spawn(&Handle::current(), events.clone());
        dispatcher.send(ClientEvent::Connected);
        for i in 0..5 {
            dispatcher.send(ClientEvent::MessageReceived(ReceivedMessage::new(
                MessageKind::Text,
                "message",
                i.to_string(),
            )));
        }
        dispatcher.send(ClientEvent::Disconnected);
        dispatcher.flush().await;

        assert_eq!(
            *log.lock(),
            vec![
                "connected", "msg:0", "msg:1", "msg:2", "msg:3", "msg:4", "disconnected"
            ]
        );
    }

    #[tokio::test]
    async fn test_handler_panic_reported_on_error() {
        let events = Arc::new(ClientEvents::new());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let delivered = Arc::new(Mutex::new(0));

        events.file_received.connect(|_| panic!("handler exploded"));
        let d = delivered.clone();
        events.file_received.connect(move |_| *d.lock() += 1);
        let e = errors.clone();
        events.error.connect(move |err| e.lock().push(err.clone()));

        let (dispatcher, _task) = EventDispatcher::spawn(&Handle::current(), events.clone());
        dispatcher.send(ClientEvent::FileReceived(PathBuf::from("a.txt")));
        dispatcher.send(ClientEvent::FileReceived(PathBuf::from("b.txt")));
        dispatcher.flush().await;

        assert_eq!(*delivered.lock(), 2);
        let errors = errors.lock();
        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors[0],
            ClientError::Handler {
                event: "file_received",
                message: "handler exploded".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_error_handler_panic_is_contained() {
        let events = Arc::new(ClientEvents::new());
        let reached = Arc::new(Mutex::new(false));

        events.error.connect(|_| panic!("error handler exploded"));
        let r = reached.clone();
        events.connected.connect(move |_| *r.lock() = true);

        let (dispatcher, _task) = EventDispatcher::spawn(&Handle::current(), events.clone());
        dispatcher.error(ClientError::Timeout);
        dispatcher.send(ClientEvent::Connected);
        dispatcher.flush().await;

        assert!(*reached.lock());
    }

    #[test]
    fn test_received_object_deserializes() {
        #[derive(Debug, PartialEq, serde::Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Record {
            name: String,
            value: i32,
        }

        let message = ReceivedMessage::new(
            MessageKind::Object,
            "Record",
            "<Record><Name>a</Name><Value>1</Value></Record>",
        );
        assert_eq!(
            message.deserialize::<Record>().unwrap(),
            Record {
                name: "a".into(),
                value: 1
            }
        );
    }
}
