//! Connection supervision.
//!
//! One supervisor task per client owns the socket's lifecycle:
//!
//! 1. connect (bounded by the connect timeout)
//! 2. install the writer, report `Connected`
//! 3. run the read loop until the link is lost or the client stops
//! 4. tear down: abort any inbound file, drop the writer, report `Disconnected`
//! 5. wait the reconnect interval and go back to 1
//!
//! Because the read loop runs inline, reconnecting and reading can never
//! overlap and only one connect attempt is ever in flight.

use std::sync::Arc;

use parking_lot::Mutex;
use sockline_core::logging::{span_names, targets};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::watch;
use tracing::Instrument;

use super::config::ClientConfig;
use super::connection::{LinkSignal, Writer, connect};
use super::state::ConnectionState;
use crate::codec::{Frame, FrameDecoder, FrameKind};
use crate::error::{ClientError, ProtocolError, SerializationError};
use crate::events::{ClientEvent, EventDispatcher, MessageKind, ReceivedMessage};
use crate::serialization::validate_payload;
use crate::transfer::FileReceiver;

/// State shared between the client handle, the supervisor and senders.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) dispatcher: EventDispatcher,
    state: Mutex<ConnectionState>,
    /// Outbound half of the current connection, if any.
    pub(crate) writer: tokio::sync::Mutex<Option<Writer>>,
    stop: watch::Sender<bool>,
    receiving: watch::Sender<bool>,
}

impl Shared {
    pub(crate) fn new(config: ClientConfig, dispatcher: EventDispatcher) -> Self {
        let auto_receive = config.auto_receive;
        Self {
            config,
            dispatcher,
            state: Mutex::new(ConnectionState::Disconnected),
            writer: tokio::sync::Mutex::new(None),
            stop: watch::channel(false).0,
            receiving: watch::channel(auto_receive).0,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Update the state, queueing `state_changed` when it actually changes.
    pub(crate) fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if *state == next {
            return;
        }
        tracing::debug!(target: targets::CLIENT, from = %*state, to = %next, "state changed");
        *state = next;
        // Queued under the lock so queue order matches transition order.
        self.dispatcher.send(ClientEvent::StateChanged(next));
    }

    /// Ask the supervisor to stop. Idempotent.
    pub(crate) fn request_stop(&self) {
        self.stop.send_replace(true);
    }

    pub(crate) fn is_stopping(&self) -> bool {
        *self.stop.borrow()
    }

    /// Allow the read loop to start consuming the socket.
    pub(crate) fn enable_receive(&self) {
        self.receiving.send_replace(true);
    }

    pub(crate) fn stop_receiver(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }
}

/// Drive connect, read and reconnect until stopped or out of attempts.
pub(crate) async fn run(shared: Arc<Shared>) {
    let span = tracing::info_span!(
        target: targets::CLIENT,
        span_names::SUPERVISOR,
        addr = %shared.config.address()
    );
    supervise(&shared).instrument(span).await;
}

async fn supervise(shared: &Shared) {
    let mut stop = shared.stop_receiver();
    let mut failures: u32 = 0;
    let mut first = true;

    loop {
        if shared.is_stopping() {
            break;
        }
        shared.set_state(if first {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });
        first = false;

        tracing::debug!(target: targets::CLIENT, attempt = failures + 1, "connecting");
        let attempt = tokio::select! {
            biased;
            _ = stop.wait_for(|stopping| *stopping) => break,
            attempt = connect(&shared.config) => attempt,
        };

        match attempt {
            Ok(stream) => {
                failures = 0;
                run_connection(shared, stream, &mut stop).await;
            }
            Err(err) => {
                failures += 1;
                tracing::warn!(target: targets::CLIENT, attempt = failures, error = %err, "connect failed");
                shared.dispatcher.error(err);
            }
        }

        if shared.is_stopping() {
            break;
        }
        let Some(policy) = &shared.config.reconnect else {
            tracing::info!(target: targets::CLIENT, "reconnect disabled, supervisor exiting");
            break;
        };
        if let Some(max) = policy.max_attempts
            && failures >= max
        {
            tracing::warn!(target: targets::CLIENT, attempts = failures, "giving up reconnecting");
            shared
                .dispatcher
                .error(ClientError::ReconnectExhausted { attempts: failures });
            break;
        }

        shared.set_state(ConnectionState::Reconnecting);
        tokio::select! {
            biased;
            _ = stop.wait_for(|stopping| *stopping) => break,
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }

    shared.set_state(ConnectionState::Disconnected);
    tracing::debug!(target: targets::CLIENT, "supervisor stopped");
}

/// Run one established connection to completion.
async fn run_connection(shared: &Shared, stream: TcpStream, stop: &mut watch::Receiver<bool>) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default();
    let (read_half, write_half) = stream.into_split();
    let link = LinkSignal::new();

    *shared.writer.lock().await = Some(Writer::new(
        write_half,
        link.clone(),
        shared.config.socket.write_timeout,
    ));
    shared.set_state(ConnectionState::Connected);
    shared.dispatcher.send(ClientEvent::Connected);
    tracing::info!(target: targets::CLIENT, %peer, "connected");

    let span = tracing::debug_span!(target: targets::CLIENT, span_names::READ_LOOP, %peer);
    let reason = read_loop(shared, read_half, &link, stop).instrument(span).await;
    link.trip(reason.clone());

    // In-flight sends observe the trip and release the lock.
    if let Some(mut writer) = shared.writer.lock().await.take() {
        writer.close(&reason).await;
    }

    shared.set_state(ConnectionState::Disconnected);
    shared.dispatcher.send(ClientEvent::Disconnected);
    tracing::info!(target: targets::CLIENT, %peer, %reason, "disconnected");
}

/// Read and route frames until the connection ends; returns why it ended.
async fn read_loop(
    shared: &Shared,
    mut read_half: OwnedReadHalf,
    link: &LinkSignal,
    stop: &mut watch::Receiver<bool>,
) -> String {
    let mut receiver = FileReceiver::new(shared.config.receive_root.clone());
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; shared.config.socket.read_buffer_size];
    let mut receiving = shared.receiving.subscribe();

    let reason = 'read: loop {
        if !*receiving.borrow_and_update() {
            tokio::select! {
                biased;
                _ = stop.wait_for(|stopping| *stopping) => break 'read "client disposed".to_string(),
                reason = link.tripped() => break 'read reason,
                _ = receiving.changed() => continue 'read,
            }
        }

        let read = tokio::select! {
            biased;
            _ = stop.wait_for(|stopping| *stopping) => break 'read "client disposed".to_string(),
            reason = link.tripped() => break 'read reason,
            read = read_half.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => {
                if decoder.buffered() > 0 {
                    tracing::debug!(target: targets::CLIENT, buffered = decoder.buffered(), "connection closed mid-frame");
                }
                break 'read "connection closed by server".to_string();
            }
            Ok(n) => n,
            Err(e) => {
                shared.dispatcher.error(ClientError::Io(e.to_string()));
                break 'read format!("read failed: {e}");
            }
        };

        decoder.extend(&buf[..n]);
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => route_frame(shared, &mut receiver, frame).await,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(target: targets::CODEC, error = %err, "protocol error, dropping connection");
                    let reason = format!("protocol error: {err}");
                    shared.dispatcher.error(err);
                    break 'read reason;
                }
            }
        }
    };

    if let Some(err) = receiver.abort(&reason).await {
        shared.dispatcher.error(err);
    }
    reason
}

/// Hand a decoded frame to the matching consumer.
async fn route_frame(shared: &Shared, receiver: &mut FileReceiver, frame: Frame) {
    let dispatcher = &shared.dispatcher;
    match frame.kind() {
        FrameKind::Message => {
            let (_, header, payload) = frame.into_parts();
            match String::from_utf8(payload.to_vec()) {
                Ok(text) => dispatcher.send(ClientEvent::MessageReceived(ReceivedMessage::new(
                    MessageKind::Text,
                    header,
                    text,
                ))),
                Err(_) => dispatcher.error(SerializationError::InvalidEncoding),
            }
        }
        FrameKind::Object => match validate_payload(frame.payload()) {
            Ok(xml) => dispatcher.send(ClientEvent::MessageReceived(ReceivedMessage::new(
                MessageKind::Object,
                frame.header(),
                xml,
            ))),
            Err(err) => {
                tracing::debug!(target: targets::CLIENT, header = frame.header(), error = %err, "bad object payload");
                dispatcher.error(err);
            }
        },
        FrameKind::FileHeader => {
            if let Some(err) = receiver.abort("superseded by a new file header").await {
                dispatcher.error(err);
            }
            let Some(total) = frame.file_size() else {
                dispatcher.error(ProtocolError::InvalidFileHeader(frame.len()));
                return;
            };
            match receiver.begin(frame.header(), total).await {
                Ok(Some(path)) => dispatcher.send(ClientEvent::FileReceived(path)),
                Ok(None) => {}
                Err(err) => dispatcher.error(err),
            }
        }
        FrameKind::FileChunk => match receiver.write_chunk(frame.header(), frame.payload()).await {
            Ok(Some(path)) => dispatcher.send(ClientEvent::FileReceived(path)),
            Ok(None) => {}
            Err(err) => dispatcher.error(err),
        },
    }
}
