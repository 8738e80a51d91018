//! Container/codec formats and capability negotiation.
//!
//! This module provides:
//! - [`ContainerFormat`]: a MIME-style container/codec identifier
//! - [`negotiate`]: picks the first preferred format the device can encode
//! - PCM and WAV helpers used by audio capture devices

mod negotiate;
mod pcm;
mod wav;

pub use negotiate::{default_preferences, negotiate, FALLBACK_FORMAT};
pub use pcm::{downmix_to_mono, f32_to_i16, samples_to_le_bytes};
pub use wav::{streaming_wav_header, WAV_HEADER_SIZE};

use std::sync::Arc;

/// Container types whose first encoded unit is a header the endpoint must
/// receive before any media.
const INIT_SEGMENT_CONTAINERS: &[&str] = &[
    "video/mp4",
    "audio/mp4",
    "video/webm",
    "audio/webm",
    "audio/wav",
    "audio/wave",
    "audio/x-wav",
];

/// A container/codec identifier such as `video/mp4;codecs=avc1.42E01E,mp4a.40.2`.
///
/// The same string is used for capability queries against the capture device
/// and for the format field of every wire message.
///
/// # Example
///
/// ```
/// use live_ingest::format::ContainerFormat;
///
/// let format = ContainerFormat::new("video/mp4;codecs=avc1.42E01E,mp4a.40.2");
/// assert_eq!(format.mime_type(), "video/mp4");
/// assert!(format.has_init_segment());
///
/// assert!(!ContainerFormat::new("audio/ogg;codecs=opus").has_init_segment());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerFormat(Arc<str>);

impl ContainerFormat {
    /// Creates a format from its identifier string.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Returns the full identifier, including codec parameters.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the container MIME type without codec parameters.
    pub fn mime_type(&self) -> &str {
        self.0.split(';').next().unwrap_or_default().trim()
    }

    /// Returns `true` if the container starts with an initialization segment.
    pub fn has_init_segment(&self) -> bool {
        let mime = self.mime_type();
        INIT_SEGMENT_CONTAINERS
            .iter()
            .any(|c| c.eq_ignore_ascii_case(mime))
    }

    /// File extension for the initialization segment.
    pub fn init_extension(&self) -> &'static str {
        match self.container_family() {
            Family::Mp4 => "mp4",
            Family::Webm => "webm",
            Family::Wav => "wav",
            Family::Ogg => "ogg",
            Family::Other => "bin",
        }
    }

    /// File extension for data segments.
    pub fn segment_extension(&self) -> &'static str {
        match self.container_family() {
            Family::Mp4 => "m4s",
            Family::Webm => "webm",
            Family::Wav => "pcm",
            Family::Ogg => "ogg",
            Family::Other => "bin",
        }
    }

    fn container_family(&self) -> Family {
        let mime = self.mime_type().to_ascii_lowercase();
        match mime.as_str() {
            "video/mp4" | "audio/mp4" => Family::Mp4,
            "video/webm" | "audio/webm" => Family::Webm,
            "audio/wav" | "audio/wave" | "audio/x-wav" => Family::Wav,
            "audio/ogg" | "video/ogg" => Family::Ogg,
            _ => Family::Other,
        }
    }
}

enum Family {
    Mp4,
    Webm,
    Wav,
    Ogg,
    Other,
}

impl std::fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerFormat {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContainerFormat {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for ContainerFormat {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
