//! Wire protocol: frame layout, encoding and resumable decoding.
//!
//! Every unit on the wire is a self-delimited frame:
//!
//! ```text
//! +------------------+
//! | kind (1)         |  u8 tag: 1 Message, 2 Object, 3 FileHeader, 4 FileChunk
//! +------------------+
//! | header_len (4)   |  u32 big-endian, <= MAX_HEADER_LEN
//! +------------------+
//! | header           |  UTF-8 (header_len bytes)
//! | (variable)       |
//! +------------------+
//! | payload_len (4)  |  u32 big-endian, <= MAX_PAYLOAD_LEN
//! +------------------+
//! | payload          |  raw bytes (payload_len bytes)
//! | (variable)       |
//! +------------------+
//! ```
//!
//! Header and payload per kind:
//!
//! | kind       | header                 | payload                     |
//! |------------|------------------------|-----------------------------|
//! | Message    | caller tag             | UTF-8 text                  |
//! | Object     | XML root element name  | UTF-8 XML document          |
//! | FileHeader | remote destination     | total size, u64 big-endian  |
//! | FileChunk  | remote destination     | next slice of the file      |
//!
//! Because every length is a fixed-width prefix, [`decode`] always knows how
//! many more bytes it needs, and feeding the bytes of a frame in any number
//! of pieces yields the same frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sockline_core::logging::targets;

use crate::error::ProtocolError;

/// Maximum header length (64 KiB).
pub const MAX_HEADER_LEN: usize = 64 * 1024;

/// Maximum payload length (16 MiB).
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Size of the kind tag plus the header length prefix.
const PREFIX_LEN: usize = 1 + 4;

/// Size of the payload length prefix.
const PAYLOAD_PREFIX_LEN: usize = 4;

/// Payload size of a file header frame.
const FILE_SIZE_LEN: usize = 8;

/// The kind of payload a frame carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Plain text message.
    Message,
    /// Serialized object.
    Object,
    /// Start of a file transfer: destination path and total size.
    FileHeader,
    /// One slice of the file announced by the preceding header.
    FileChunk,
}

impl FrameKind {
    /// The wire tag for this kind.
    pub fn tag(self) -> u8 {
        match self {
            Self::Message => 1,
            Self::Object => 2,
            Self::FileHeader => 3,
            Self::FileChunk => 4,
        }
    }
}

impl TryFrom<u8> for FrameKind {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(Self::Message),
            2 => Ok(Self::Object),
            3 => Ok(Self::FileHeader),
            4 => Ok(Self::FileChunk),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message => write!(f, "Message"),
            Self::Object => write!(f, "Object"),
            Self::FileHeader => write!(f, "FileHeader"),
            Self::FileChunk => write!(f, "FileChunk"),
        }
    }
}

/// One decoded or to-be-encoded unit of wire data.
///
/// Frames are immutable; construction validates the length limits so every
/// `Frame` can be encoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    header: String,
    payload: Bytes,
}

impl Frame {
    /// Create a frame, validating header and payload limits.
    pub fn new(
        kind: FrameKind,
        header: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<Self, ProtocolError> {
        let header = header.into();
        let payload = payload.into();
        check_lengths(kind, header.len(), payload.len())?;
        Ok(Self {
            kind,
            header,
            payload,
        })
    }

    /// A text message frame.
    pub fn message(header: impl Into<String>, text: impl Into<String>) -> Result<Self, ProtocolError> {
        Self::new(FrameKind::Message, header, text.into())
    }

    /// A serialized object frame.
    pub fn object(type_tag: impl Into<String>, xml: impl Into<String>) -> Result<Self, ProtocolError> {
        Self::new(FrameKind::Object, type_tag, xml.into())
    }

    /// A file header announcing `total` bytes for `remote_path`.
    pub fn file_header(remote_path: impl Into<String>, total: u64) -> Result<Self, ProtocolError> {
        Self::new(
            FrameKind::FileHeader,
            remote_path,
            total.to_be_bytes().to_vec(),
        )
    }

    /// A file chunk for `remote_path`.
    pub fn file_chunk(
        remote_path: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Result<Self, ProtocolError> {
        Self::new(FrameKind::FileChunk, remote_path, data)
    }

    /// The frame kind.
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// The header string.
    pub fn header(&self) -> &str {
        &self.header
    }

    /// The payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Declared total size, for file header frames.
    pub fn file_size(&self) -> Option<u64> {
        if self.kind != FrameKind::FileHeader {
            return None;
        }
        let bytes: [u8; FILE_SIZE_LEN] = self.payload.as_ref().try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }

    /// Number of bytes this frame occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        PREFIX_LEN + self.header.len() + PAYLOAD_PREFIX_LEN + self.payload.len()
    }

    /// Append the wire encoding of this frame to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(self.kind.tag());
        // Lengths were bounded by `check_lengths`, both fit in u32.
        dst.put_u32(self.header.len() as u32);
        dst.put_slice(self.header.as_bytes());
        dst.put_u32(self.payload.len() as u32);
        dst.put_slice(&self.payload);
    }

    /// Wire encoding of this frame.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Split into header and payload.
    pub fn into_parts(self) -> (FrameKind, String, Bytes) {
        (self.kind, self.header, self.payload)
    }
}

/// Encode a (kind, header, payload) triple into wire bytes.
pub fn encode(kind: FrameKind, header: &str, payload: &[u8]) -> Result<Bytes, ProtocolError> {
    Ok(Frame::new(kind, header, Bytes::copy_from_slice(payload))?.to_bytes())
}

/// Result of a decode attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame was consumed from the buffer.
    Frame(Frame),
    /// The buffer holds a prefix of a frame; at least `missing` more bytes are
    /// needed before decoding can make progress.
    NeedMoreData {
        /// Minimum number of additional bytes required.
        missing: usize,
    },
}

/// Decode one frame from the front of `buf`.
///
/// On [`Decoded::Frame`] the frame's bytes are removed from `buf`. On
/// [`Decoded::NeedMoreData`] the buffer is left untouched so the caller can
/// append more bytes and retry. Length limits are enforced as soon as the
/// corresponding prefix is readable.
pub fn decode(buf: &mut BytesMut) -> Result<Decoded, ProtocolError> {
    let Some(&tag) = buf.first() else {
        return Ok(Decoded::NeedMoreData { missing: PREFIX_LEN });
    };
    let kind = FrameKind::try_from(tag)?;

    if buf.len() < PREFIX_LEN {
        return Ok(Decoded::NeedMoreData {
            missing: PREFIX_LEN - buf.len(),
        });
    }
    let header_len = read_u32(&buf[1..PREFIX_LEN]);
    if header_len > MAX_HEADER_LEN {
        return Err(ProtocolError::HeaderTooLong {
            len: header_len,
            max: MAX_HEADER_LEN,
        });
    }

    let payload_prefix_at = PREFIX_LEN + header_len;
    let payload_at = payload_prefix_at + PAYLOAD_PREFIX_LEN;
    if buf.len() < payload_at {
        return Ok(Decoded::NeedMoreData {
            missing: payload_at - buf.len(),
        });
    }
    let payload_len = read_u32(&buf[payload_prefix_at..payload_at]);
    check_lengths(kind, header_len, payload_len)?;

    let total = payload_at + payload_len;
    if buf.len() < total {
        return Ok(Decoded::NeedMoreData {
            missing: total - buf.len(),
        });
    }

    let mut raw = buf.split_to(total);
    raw.advance(PREFIX_LEN);
    let header_bytes = raw.split_to(header_len);
    let header = String::from_utf8(header_bytes.to_vec())
        .map_err(|_| ProtocolError::InvalidHeaderEncoding)?;
    raw.advance(PAYLOAD_PREFIX_LEN);

    tracing::trace!(target: targets::CODEC, %kind, header_len, payload_len, "decoded frame");

    Ok(Decoded::Frame(Frame {
        kind,
        header,
        payload: raw.freeze(),
    }))
}

fn read_u32(bytes: &[u8]) -> usize {
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(bytes);
    u32::from_be_bytes(prefix) as usize
}

fn check_lengths(kind: FrameKind, header_len: usize, payload_len: usize) -> Result<(), ProtocolError> {
    if header_len > MAX_HEADER_LEN {
        return Err(ProtocolError::HeaderTooLong {
            len: header_len,
            max: MAX_HEADER_LEN,
        });
    }
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLong {
            len: payload_len,
            max: MAX_PAYLOAD_LEN,
        });
    }
    if kind == FrameKind::FileHeader && payload_len != FILE_SIZE_LEN {
        return Err(ProtocolError::InvalidFileHeader(payload_len));
    }
    Ok(())
}

/// Stateful decoder that accumulates socket reads and yields whole frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete frame, if the buffer holds one.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        match decode(&mut self.buf)? {
            Decoded::Frame(frame) => Ok(Some(frame)),
            Decoded::NeedMoreData { .. } => Ok(None),
        }
    }

    /// Number of buffered bytes not yet consumed as frames.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop any buffered partial frame.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frames() -> Vec<Frame> {
        vec![
            Frame::message("message", "hello server").unwrap(),
            Frame::object("Record", "<Record><Name>a</Name><Value>1</Value></Record>").unwrap(),
            Frame::file_header("out/data.bin", 70_000).unwrap(),
            Frame::file_chunk("out/data.bin", vec![0xAB; 300]).unwrap(),
            Frame::message("", "").unwrap(),
            Frame::message("ünïcødé", "naïve café").unwrap(),
        ]
    }

    #[test]
    fn test_roundtrip_preserves_triple() {
        for frame in sample_frames() {
            let bytes = encode(frame.kind(), frame.header(), frame.payload()).unwrap();
            let mut buf = BytesMut::from(&bytes[..]);
            match decode(&mut buf).unwrap() {
                Decoded::Frame(decoded) => assert_eq!(decoded, frame),
                other => panic!("expected frame, got {other:?}"),
            }
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_layout_is_big_endian() {
        let bytes = encode(FrameKind::Object, "T", b"xy").unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[2, 0, 0, 0, 1, b'T', 0, 0, 0, 2, b'x', b'y']
        );
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let frames = sample_frames();
        let mut wire = BytesMut::new();
        for frame in &frames {
            frame.encode_into(&mut wire);
        }

        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        for byte in wire.iter() {
            decoder.extend(&[*byte]);
            while let Some(frame) = decoder.next_frame().unwrap() {
                decoded.push(frame);
            }
        }

        assert_eq!(decoded, frames);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_uneven_segments() {
        let frames = sample_frames();
        let mut wire = BytesMut::new();
        for frame in &frames {
            frame.encode_into(&mut wire);
        }

        // Segment sizes cycle through awkward values that straddle prefixes.
        let sizes = [3usize, 1, 7, 2, 64, 5, 1000];
        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        let mut offset = 0;
        let mut i = 0;
        while offset < wire.len() {
            let end = (offset + sizes[i % sizes.len()]).min(wire.len());
            decoder.extend(&wire[offset..end]);
            while let Some(frame) = decoder.next_frame().unwrap() {
                decoded.push(frame);
            }
            offset = end;
            i += 1;
        }

        assert_eq!(decoded, frames);
    }

    #[test]
    fn test_need_more_data_reports_missing() {
        let bytes = encode(FrameKind::Message, "abc", b"hello").unwrap();

        let mut buf = BytesMut::new();
        assert_eq!(
            decode(&mut buf).unwrap(),
            Decoded::NeedMoreData { missing: 5 }
        );

        buf.extend_from_slice(&bytes[..3]);
        assert_eq!(
            decode(&mut buf).unwrap(),
            Decoded::NeedMoreData { missing: 2 }
        );

        buf.extend_from_slice(&bytes[3..5]);
        // header (3) + payload prefix (4)
        assert_eq!(
            decode(&mut buf).unwrap(),
            Decoded::NeedMoreData { missing: 7 }
        );

        buf.extend_from_slice(&bytes[5..12]);
        assert_eq!(
            decode(&mut buf).unwrap(),
            Decoded::NeedMoreData { missing: 5 }
        );
        assert_eq!(buf.len(), 12, "partial data must not be consumed");
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let mut buf = BytesMut::from(&[9u8, 0, 0][..]);
        assert_eq!(decode(&mut buf), Err(ProtocolError::UnknownKind(9)));
    }

    #[test]
    fn test_rejects_oversized_header_before_body_arrives() {
        let mut buf = BytesMut::new();
        buf.put_u8(FrameKind::Message.tag());
        buf.put_u32((MAX_HEADER_LEN + 1) as u32);
        assert_eq!(
            decode(&mut buf),
            Err(ProtocolError::HeaderTooLong {
                len: MAX_HEADER_LEN + 1,
                max: MAX_HEADER_LEN,
            })
        );
    }

    #[test]
    fn test_rejects_oversized_payload() {
        let mut buf = BytesMut::new();
        buf.put_u8(FrameKind::FileChunk.tag());
        buf.put_u32(1);
        buf.put_u8(b'p');
        buf.put_u32(u32::MAX);
        assert!(matches!(
            decode(&mut buf),
            Err(ProtocolError::PayloadTooLong { .. })
        ));
    }

    #[test]
    fn test_rejects_invalid_header_utf8() {
        let mut buf = BytesMut::new();
        buf.put_u8(FrameKind::Message.tag());
        buf.put_u32(2);
        buf.put_slice(&[0xC3, 0x28]);
        buf.put_u32(0);
        assert_eq!(decode(&mut buf), Err(ProtocolError::InvalidHeaderEncoding));
    }

    #[test]
    fn test_file_header_size() {
        let frame = Frame::file_header("a/b.txt", 123_456_789_000).unwrap();
        assert_eq!(frame.file_size(), Some(123_456_789_000));
        assert_eq!(Frame::message("h", "t").unwrap().file_size(), None);

        assert_eq!(
            Frame::new(FrameKind::FileHeader, "x", vec![1, 2, 3]),
            Err(ProtocolError::InvalidFileHeader(3))
        );
    }

    #[test]
    fn test_frame_limits_enforced_on_construction() {
        let long_header = "h".repeat(MAX_HEADER_LEN + 1);
        assert!(matches!(
            Frame::message(long_header, "x"),
            Err(ProtocolError::HeaderTooLong { .. })
        ));
    }

    #[test]
    fn test_kind_tags_roundtrip() {
        for kind in [
            FrameKind::Message,
            FrameKind::Object,
            FrameKind::FileHeader,
            FrameKind::FileChunk,
        ] {
            assert_eq!(FrameKind::try_from(kind.tag()), Ok(kind));
        }
        assert_eq!(FrameKind::try_from(0), Err(ProtocolError::UnknownKind(0)));
    }
}
