//! The socket client: connection management, reconnecting and sends.
//!
//! - **AsyncClient**: the handle callers hold; start, send, dispose
//! - **ClientConfig**: address, socket options, reconnect policy, transfer options
//! - **ConnectionState**: where the connection is in its lifecycle
//!
//! Internally a supervisor task connects, runs the read loop for the life of
//! each connection, and waits out the reconnect interval after a loss. Sends
//! go straight to the socket through a writer lock; nothing is queued.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use sockline::{AsyncClient, ClientConfig};
//!
//! let config = ClientConfig::new("127.0.0.1", 9000)
//!     .reconnect_interval(Duration::from_secs(1))
//!     .receive_root("inbox");
//!
//! let client = AsyncClient::new();
//! client.events().connected.connect(|_| println!("connected"));
//! client.events().file_received.connect(|path| println!("got {}", path.display()));
//!
//! client.start_with_config(config)?;
//! ```

mod async_client;
mod config;
mod connection;
mod state;
mod supervisor;

pub use async_client::{AsyncClient, DEFAULT_MESSAGE_HEADER};
pub use config::{ClientConfig, DEFAULT_RECONNECT_SECS, ReconnectConfig, SocketConfig};
pub use state::ConnectionState;
