//! Encoded media segment with metadata.

use std::time::Duration;

use bytes::Bytes;

/// Distinguishes the one-time initialization segment from ordinary data segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Container header that must reach the endpoint before any data segment.
    Init,
    /// An ordinary unit of encoded media.
    Data,
}

impl SegmentKind {
    /// Returns the wire discriminator name (`init-segment` or `data-segment`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init-segment",
            Self::Data => "data-segment",
        }
    }
}

impl std::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of encoded media flowing through the pipeline.
///
/// Payloads are [`Bytes`], so cloning a segment never copies media data.
///
/// # Example
///
/// ```
/// use live_ingest::{Segment, SegmentKind};
/// use std::time::Duration;
///
/// let init = Segment::init(vec![0u8; 32], Duration::ZERO);
/// assert_eq!(init.sequence, 0);
/// assert_eq!(init.kind, SegmentKind::Init);
///
/// let data = Segment::data(1, vec![1u8; 1024], Duration::from_secs(5));
/// assert_eq!(data.len(), 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Encoded media bytes, opaque to the pipeline.
    pub payload: Bytes,

    /// Position in the session: 0 for the initialization segment, then 1, 2, 3...
    pub sequence: u64,

    /// Capture time relative to the start of the session.
    pub timestamp: Duration,

    /// Initialization or data segment.
    pub kind: SegmentKind,
}

impl Segment {
    /// Creates the initialization segment (sequence 0).
    pub fn init(payload: impl Into<Bytes>, timestamp: Duration) -> Self {
        Self {
            payload: payload.into(),
            sequence: 0,
            timestamp,
            kind: SegmentKind::Init,
        }
    }

    /// Creates a data segment with the given sequence number.
    pub fn data(sequence: u64, payload: impl Into<Bytes>, timestamp: Duration) -> Self {
        Self {
            payload: payload.into(),
            sequence,
            timestamp,
            kind: SegmentKind::Data,
        }
    }

    /// Returns `true` for the initialization segment.
    pub fn is_init(&self) -> bool {
        self.kind == SegmentKind::Init
    }

    /// Returns the payload size in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
