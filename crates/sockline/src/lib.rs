//! Asynchronous TCP socket client for sockline.
//!
//! One long-lived connection to one server carries three kinds of payload:
//!
//! - **Messages**: UTF-8 text with a header tag
//! - **Objects**: any `serde` type, sent as an XML document
//! - **Files**: streamed in bounded chunks and rebuilt on the far side
//!
//! The client connects in the background, reconnects on a fixed interval
//! after any loss, and reports what happens through [`Signal`]s so callers
//! never block on socket I/O.
//!
//! # Quick Start
//!
//! ```ignore
//! use serde::Serialize;
//! use sockline::AsyncClient;
//!
//! #[derive(Serialize)]
//! #[serde(rename_all = "PascalCase")]
//! struct Record {
//!     name: String,
//!     value: i32,
//! }
//!
//! #[tokio::main]
//! async fn main() -> sockline::Result<()> {
//!     let client = AsyncClient::new();
//!     client.events().connected.connect(|_| println!("connected"));
//!     client.events().message_received.connect(|msg| {
//!         println!("[{}] {}", msg.header, msg.text);
//!     });
//!
//!     client.start_client_with_interval("127.0.0.1", 9000, 1)?;
//!
//!     client.send_message("hello", false).await?;
//!     client
//!         .send_object(&Record { name: "a".into(), value: 1 }, false)
//!         .await?;
//!     client.send_file("report.pdf", "inbox/report.pdf", false).await?;
//!
//!     client.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! # Events
//!
//! All signals live on [`ClientEvents`], reached through
//! [`AsyncClient::events`]. Handlers run on a dedicated dispatcher task in
//! the order events occurred. A panicking handler is reported on the
//! `error` signal instead of taking the client down.
//!
//! # Wire Format
//!
//! See [`codec`] for the frame layout.
//!
//! [`Signal`]: sockline_core::Signal

pub mod client;
pub mod codec;
mod error;
pub mod events;
pub mod serialization;
pub mod transfer;

pub use client::{AsyncClient, ClientConfig, ConnectionState, ReconnectConfig, SocketConfig};
pub use codec::{Decoded, Frame, FrameDecoder, FrameKind};
pub use error::{ClientError, FileTransferError, ProtocolError, Result, SerializationError};
pub use events::{ClientEvents, MessageKind, ReceivedMessage, Submission, SubmissionKind};
pub use sockline_core::Signal;
