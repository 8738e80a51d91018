//! Binary wire framing for units sent to the endpoint.
//!
//! Layout (big-endian):
//!
//! ```text
//! magic "LVIN" (4) | version (1) | kind (1) | session_id len (2) + utf8
//! | sequence (8) | timestamp_ms (8) | format len (2) + utf8 | payload len (4) + bytes
//! ```

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::format::ContainerFormat;
use crate::identity::SessionId;
use crate::segment::{Segment, SegmentKind};

/// Frame magic.
pub const MAGIC: &[u8; 4] = b"LVIN";

/// Current wire version.
pub const VERSION: u8 = 1;

/// Bytes before the first variable-length field (magic, version, kind).
const PREFIX_SIZE: usize = 6;

const KIND_INIT: u8 = 0x00;
const KIND_DATA: u8 = 0x01;

/// Error type for wire encoding and decoding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    /// Insufficient data to decode
    #[error("Insufficient data")]
    InsufficientData,

    /// The frame does not start with the expected magic.
    #[error("Bad magic")]
    BadMagic,

    /// Unsupported version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),

    /// Invalid unit kind
    #[error("Invalid kind: {0}")]
    InvalidKind(u8),

    /// A string field is not valid UTF-8.
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// A field exceeds the size its length prefix can express.
    #[error("Field too long: {0}")]
    FieldTooLong(&'static str),
}

/// One unit as seen by the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    /// Session this unit belongs to.
    pub session_id: SessionId,
    /// Initialization or data segment.
    pub kind: SegmentKind,
    /// 0 for the initialization segment, then 1, 2, 3...
    pub sequence: u64,
    /// Capture time relative to session start (millisecond precision on the wire).
    pub timestamp: Duration,
    /// Negotiated container/codec format.
    pub format: ContainerFormat,
    /// Encoded media.
    pub payload: Bytes,
}

impl WireMessage {
    /// Wraps a segment for the given session and format.
    pub fn from_segment(
        session_id: &SessionId,
        format: &ContainerFormat,
        segment: &Segment,
    ) -> Self {
        Self {
            session_id: session_id.clone(),
            kind: segment.kind,
            sequence: segment.sequence,
            timestamp: segment.timestamp,
            format: format.clone(),
            payload: segment.payload.clone(),
        }
    }

    /// Returns `true` for the initialization segment.
    pub fn is_init(&self) -> bool {
        self.kind == SegmentKind::Init
    }

    /// Encodes the message into a single frame.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::FieldTooLong`] if a string exceeds 65535 bytes or
    /// the payload exceeds 4 GiB.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let session_id = self.session_id.as_str().as_bytes();
        let format = self.format.as_str().as_bytes();
        let session_len =
            u16::try_from(session_id.len()).map_err(|_| WireError::FieldTooLong("session_id"))?;
        let format_len =
            u16::try_from(format.len()).map_err(|_| WireError::FieldTooLong("format"))?;
        let payload_len =
            u32::try_from(self.payload.len()).map_err(|_| WireError::FieldTooLong("payload"))?;

        let total = PREFIX_SIZE + 2 + session_id.len() + 8 + 8 + 2 + format.len() + 4
            + self.payload.len();
        let mut buf = BytesMut::with_capacity(total);

        buf.put_slice(MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(match self.kind {
            SegmentKind::Init => KIND_INIT,
            SegmentKind::Data => KIND_DATA,
        });

        buf.put_u16(session_len);
        buf.put_slice(session_id);

        buf.put_u64(self.sequence);
        buf.put_u64(u64::try_from(self.timestamp.as_millis()).unwrap_or(u64::MAX));

        buf.put_u16(format_len);
        buf.put_slice(format);

        buf.put_u32(payload_len);
        buf.extend_from_slice(&self.payload);

        Ok(buf.freeze())
    }

    /// Decodes one frame from the front of `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is truncated or malformed.
    pub fn decode(data: &mut impl Buf) -> Result<Self, WireError> {
        if data.remaining() < PREFIX_SIZE {
            return Err(WireError::InsufficientData);
        }

        let mut magic = [0u8; 4];
        data.copy_to_slice(&mut magic);
        if &magic != MAGIC {
            return Err(WireError::BadMagic);
        }

        let version = data.get_u8();
        if version != VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }

        let kind = match data.get_u8() {
            KIND_INIT => SegmentKind::Init,
            KIND_DATA => SegmentKind::Data,
            other => return Err(WireError::InvalidKind(other)),
        };

        let session_id = read_string(data, "session_id")?;

        if data.remaining() < 16 {
            return Err(WireError::InsufficientData);
        }
        let sequence = data.get_u64();
        let timestamp = Duration::from_millis(data.get_u64());

        let format = read_string(data, "format")?;

        if data.remaining() < 4 {
            return Err(WireError::InsufficientData);
        }
        let payload_len = data.get_u32() as usize;
        if data.remaining() < payload_len {
            return Err(WireError::InsufficientData);
        }
        let payload = data.copy_to_bytes(payload_len);

        Ok(Self {
            session_id: SessionId::new(session_id),
            kind,
            sequence,
            timestamp,
            format: ContainerFormat::new(format),
            payload,
        })
    }
}

fn read_string(data: &mut impl Buf, field: &'static str) -> Result<String, WireError> {
    if data.remaining() < 2 {
        return Err(WireError::InsufficientData);
    }
    let len = data.get_u16() as usize;
    if data.remaining() < len {
        return Err(WireError::InsufficientData);
    }
    let raw = data.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: SegmentKind, sequence: u64) -> WireMessage {
        WireMessage {
            session_id: SessionId::new("room-7"),
            kind,
            sequence,
            timestamp: Duration::from_millis(12_345),
            format: ContainerFormat::new("video/mp4;codecs=avc1"),
            payload: Bytes::from_static(b"moof-mdat"),
        }
    }

    #[test]
    fn test_encode_decode_data() {
        let message = sample(SegmentKind::Data, 42);
        let encoded = message.encode().unwrap();
        let decoded = WireMessage::decode(&mut encoded.clone()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_init_kind_byte() {
        let encoded = sample(SegmentKind::Init, 0).encode().unwrap();
        assert_eq!(&encoded[0..4], b"LVIN");
        assert_eq!(encoded[4], VERSION);
        assert_eq!(encoded[5], KIND_INIT);
    }

    #[test]
    fn test_decode_consecutive_frames() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&sample(SegmentKind::Init, 0).encode().unwrap());
        buf.extend_from_slice(&sample(SegmentKind::Data, 1).encode().unwrap());
        let mut frozen = buf.freeze();

        let first = WireMessage::decode(&mut frozen).unwrap();
        let second = WireMessage::decode(&mut frozen).unwrap();
        assert!(first.is_init());
        assert_eq!(second.sequence, 1);
        assert!(!frozen.has_remaining());
    }

    #[test]
    fn test_decode_truncated() {
        let encoded = sample(SegmentKind::Data, 3).encode().unwrap();
        let mut truncated = encoded.slice(..encoded.len() - 1);
        assert_eq!(
            WireMessage::decode(&mut truncated),
            Err(WireError::InsufficientData)
        );
    }

    #[test]
    fn test_decode_bad_magic() {
        let mut data = Bytes::from_static(b"RIFF\x01\x01\x00\x00");
        assert_eq!(WireMessage::decode(&mut data), Err(WireError::BadMagic));
    }

    #[test]
    fn test_decode_invalid_kind() {
        let mut data = Bytes::from_static(b"LVIN\x01\x07\x00\x00");
        assert_eq!(WireMessage::decode(&mut data), Err(WireError::InvalidKind(7)));
    }

    #[test]
    fn test_decode_unsupported_version() {
        let mut data = Bytes::from_static(b"LVIN\x02\x01");
        assert_eq!(
            WireMessage::decode(&mut data),
            Err(WireError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn test_from_segment() {
        let segment = Segment::data(9, vec![1, 2, 3], Duration::from_secs(45));
        let message = WireMessage::from_segment(
            &SessionId::new("s"),
            &ContainerFormat::new("video/webm"),
            &segment,
        );
        assert_eq!(message.sequence, 9);
        assert_eq!(message.kind, SegmentKind::Data);
        assert_eq!(message.payload.as_ref(), &[1, 2, 3]);
    }
}
