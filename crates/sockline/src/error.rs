//! Error types for the socket client.

use std::path::PathBuf;

/// Malformed wire data.
///
/// The decoder cannot resynchronize inside a byte stream, so every protocol
/// error tears the connection down.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The kind tag is not one of the known frame kinds.
    #[error("unknown frame kind tag {0:#04x}")]
    UnknownKind(u8),
    /// The header length prefix exceeds the allowed maximum.
    #[error("header length {len} exceeds maximum {max}")]
    HeaderTooLong {
        /// Declared length.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },
    /// The payload length prefix exceeds the allowed maximum.
    #[error("payload length {len} exceeds maximum {max}")]
    PayloadTooLong {
        /// Declared length.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },
    /// The header bytes are not valid UTF-8.
    #[error("frame header is not valid UTF-8")]
    InvalidHeaderEncoding,
    /// A file header frame whose payload is not an 8-byte size.
    #[error("file header payload must be 8 bytes, got {0}")]
    InvalidFileHeader(usize),
}

/// A payload could not be decoded as text or converted to or from XML.
///
/// Reported per message; the connection stays up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializationError {
    /// The object graph contains members the XML serializer cannot express.
    #[error("cannot serialize {type_name}: {message}")]
    Serialize {
        /// Rust type being serialized.
        type_name: String,
        /// Serializer diagnostic.
        message: String,
    },
    /// The XML does not describe the requested type.
    #[error("cannot deserialize {expected} from XML: {message}")]
    Deserialize {
        /// Rust type requested by the caller.
        expected: String,
        /// Deserializer diagnostic.
        message: String,
    },
    /// A message or object payload is not UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidEncoding,
    /// The object payload is not a well-formed XML document.
    #[error("object payload is not well-formed XML: {0}")]
    Malformed(String),
}

/// A file send or receive failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileTransferError {
    /// The source path is missing or not a regular file.
    #[error("source {} is not a regular file", path.display())]
    NotAFile {
        /// Source path.
        path: PathBuf,
    },
    /// Local filesystem failure.
    #[error("I/O error on {}: {message}", path.display())]
    Io {
        /// File being read or written.
        path: PathBuf,
        /// Underlying error.
        message: String,
    },
    /// The session ended before the declared size was reached.
    ///
    /// Any partial output has already been removed.
    #[error("transfer of {} aborted after {received} of {total} bytes: {reason}", path.display())]
    Aborted {
        /// Destination path of the session.
        path: PathBuf,
        /// Bytes written before the abort.
        received: u64,
        /// Declared total size.
        total: u64,
        /// Why the session was abandoned.
        reason: String,
    },
    /// A chunk arrived that belongs to no active session.
    #[error("chunk for {path} received without an active transfer")]
    UnexpectedChunk {
        /// Remote path carried by the chunk.
        path: String,
    },
    /// The remote path is not acceptable under the configured receive root.
    #[error("remote path {path} rejected: {reason}")]
    PathRejected {
        /// Remote path as sent by the peer.
        path: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The source file shrank while it was being sent.
    #[error("source {} changed during send: expected {expected} bytes, read {actual}", path.display())]
    SourceTruncated {
        /// Source path.
        path: PathBuf,
        /// Size announced in the file header.
        expected: u64,
        /// Bytes actually read.
        actual: u64,
    },
}

/// Errors surfaced by the client, either returned from calls or emitted on
/// the `error` signal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Connecting to the server failed.
    #[error("Connection error: {0}")]
    Connect(String),
    /// Connecting or writing timed out.
    #[error("Operation timed out")]
    Timeout,
    /// No connection is currently established.
    #[error("Not connected")]
    NotConnected,
    /// `start_client` was called on a client that is already running.
    #[error("Client already started")]
    AlreadyStarted,
    /// The client has been disposed.
    #[error("Client has been disposed")]
    Disposed,
    /// The client was started outside a Tokio runtime.
    #[error("No Tokio runtime available")]
    NoRuntime,
    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(String),
    /// The connection was lost while an operation was in flight.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    /// Malformed wire data.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Object payload failed to convert.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),
    /// File send or receive failed.
    #[error("File transfer error: {0}")]
    FileTransfer(#[from] FileTransferError),
    /// An event handler panicked.
    #[error("Handler for {event} panicked: {message}")]
    Handler {
        /// Event whose handler panicked.
        event: &'static str,
        /// Panic message.
        message: String,
    },
    /// Reconnect attempts were exhausted.
    #[error("Gave up after {attempts} reconnect attempts")]
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// A specialized Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
