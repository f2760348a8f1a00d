//! File transfer engine.
//!
//! A file crosses the wire as one `FileHeader` frame carrying the remote
//! destination and total size, followed by `FileChunk` frames of at most the
//! configured chunk size. The sender side is [`FileSource`]; the receiver
//! side is [`FileReceiver`]. At most one session per direction is active on a
//! connection: the writer lock is held for a whole outbound file, and a new
//! inbound header aborts any unfinished receive.

mod receiver;
mod sender;

pub use receiver::{FileReceiver, resolve_destination};
pub use sender::FileSource;

/// Default chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
