//! Capture device abstraction.
//!
//! A [`CaptureDevice`] is anything that can be acquired for capture and
//! encode media into a container format: a camera and microphone, a screen
//! grabber, a synthetic source. Acquiring it yields a [`CaptureHandle`] whose
//! encoder produces a stream of encoded units.
//!
//! Built-in devices:
//!
//! - [`MockDevice`]: Synthetic units at the requested cadence, with scripted faults
//! - `MicrophoneDevice` (feature `cpal`): Default input device as `audio/wav`

mod mock;
#[cfg(feature = "cpal")]
mod microphone;

#[cfg(feature = "cpal")]
pub use microphone::MicrophoneDevice;
pub use mock::MockDevice;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::format::ContainerFormat;
use crate::{DeviceError, EncoderFault};

/// Stream of encoded units from one encoder run.
///
/// For formats with an initialization segment, the first unit of every run is
/// the container header. The stream ends (`None`) or yields an
/// [`EncoderFault`] when the run stops.
pub type EncodedStream = mpsc::Receiver<Result<Bytes, EncoderFault>>;

/// A media track on a capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Microphone / audio input.
    Audio,
    /// Camera / screen video input.
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Which tracks to request when acquiring a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Request an audio track.
    pub audio: bool,
    /// Request a video track.
    pub video: bool,
}

impl CaptureConstraints {
    /// Audio only.
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// A source of capturable media.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Returns `true` if the device can encode `format`.
    fn supports(&self, format: &ContainerFormat) -> bool;

    /// Acquires the device for exclusive capture.
    ///
    /// Errors are fatal for the session and never retried.
    async fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn CaptureHandle>, DeviceError>;
}

/// An acquired capture device.
///
/// Held by exactly one session. Methods take `&self` and may be called from
/// any task.
pub trait CaptureHandle: Send + Sync {
    /// Enables or disables a track without stopping the encoder.
    ///
    /// A disabled track keeps producing units (black frames or silence).
    fn set_enabled(&self, kind: TrackKind, enabled: bool);

    /// Returns `false` once the device has been unplugged, revoked or released.
    fn is_active(&self) -> bool;

    /// Starts an encoder run, stopping any previous run.
    ///
    /// Must be called from within a tokio runtime.
    fn start_encoder(
        &self,
        format: &ContainerFormat,
        cadence: Duration,
    ) -> Result<EncodedStream, EncoderFault>;

    /// Stops encoding and releases the device. Idempotent.
    fn release(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_default_constraints() {
        let constraints = CaptureConstraints::default();
        assert!(constraints.audio);
        assert!(constraints.video);
        assert!(!CaptureConstraints::audio_only().video);
    }

    #[test]
    fn test_track_kind_display() {
        assert_eq!(TrackKind::Video.to_string(), "video");
        assert_eq!(TrackKind::Audio.to_string(), "audio");
    }

    #[test]
    fn test_traits_are_object_safe() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<Arc<dyn CaptureDevice>>();
        assert_send_sync::<Arc<dyn CaptureHandle>>();
    }
}
