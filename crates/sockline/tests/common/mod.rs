//! Shared helpers: a scripted in-process server and event recorders.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sockline::{ClientConfig, Frame, FrameDecoder, Signal};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// A listening socket the client under test connects to.
pub struct Peer {
    listener: TcpListener,
    pub port: u16,
}

impl Peer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self { listener, port }
    }

    pub async fn bind_port(port: u16) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        Self { listener, port }
    }

    /// Client configuration pointing at this peer with a short reconnect.
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new("127.0.0.1", self.port).reconnect_interval(Duration::from_millis(200))
    }

    pub async fn accept(&self) -> PeerConn {
        let (stream, _) = tokio::time::timeout(WAIT, self.listener.accept())
            .await
            .expect("timed out waiting for the client to connect")
            .unwrap();
        PeerConn {
            stream,
            decoder: FrameDecoder::new(),
            buf: vec![0u8; 64 * 1024],
        }
    }
}

/// The server side of one accepted connection.
pub struct PeerConn {
    stream: TcpStream,
    decoder: FrameDecoder,
    buf: Vec<u8>,
}

impl PeerConn {
    /// Next frame from the client, or `None` once it has closed the socket.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        let Self {
            stream,
            decoder,
            buf,
        } = self;
        tokio::time::timeout(WAIT, async {
            loop {
                if let Some(frame) = decoder.next_frame().expect("client sent a malformed frame") {
                    return Some(frame);
                }
                match stream.read(buf).await {
                    Ok(0) | Err(_) => return None,
                    Ok(n) => decoder.extend(&buf[..n]),
                }
            }
        })
        .await
        .expect("timed out waiting for a frame")
    }

    pub async fn send(&mut self, frame: &Frame) {
        self.stream.write_all(&frame.to_bytes()).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }
}

/// A port nothing is listening on.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Record every emission of `signal`.
pub fn record<T: Clone + Send + Sync + 'static>(signal: &Signal<T>) -> Arc<Mutex<Vec<T>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    signal.connect(move |value: &T| sink.lock().push(value.clone()));
    log
}

/// Poll `condition` every 10 ms until it holds or `WAIT` passes.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
