//! Mock capture device for testing without hardware.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::device::{CaptureConstraints, CaptureDevice, CaptureHandle, EncodedStream, TrackKind};
use crate::format::{streaming_wav_header, ContainerFormat};
use crate::{DeviceError, EncoderFault};

/// Units buffered between the synthetic encoder and its consumer.
const ENCODER_CHANNEL_CAPACITY: usize = 16;

/// Sample rate used for `audio/wav` mock output.
const MOCK_SAMPLE_RATE: u32 = 16000;

/// A capture device that produces synthetic encoded units.
///
/// This allows testing the full pipeline without a camera or microphone,
/// making it suitable for CI environments. Each encoder run emits the
/// container header immediately (for formats that have one), then one unit per
/// cadence tick. Data payloads are text of the form
/// `unit:<n>;audio=<on|off>;video=<on|off>`, where `n` counts units within
/// the current run.
///
/// Clones share state, so keep one clone to script faults and inspect the
/// device while the session owns another.
///
/// # Example
///
/// ```
/// use live_ingest::MockDevice;
/// use live_ingest::format::ContainerFormat;
/// use live_ingest::device::CaptureDevice;
///
/// let device = MockDevice::new().with_formats(["video/webm;codecs=vp8,opus", "video/webm"]);
/// assert!(device.supports(&ContainerFormat::new("video/webm")));
/// assert!(!device.supports(&ContainerFormat::new("video/mp4")));
/// ```
#[derive(Clone)]
pub struct MockDevice {
    inner: Arc<MockDeviceInner>,
}

struct MockDeviceInner {
    name: String,
    supported: Mutex<Option<Vec<ContainerFormat>>>,
    unavailable: Mutex<Option<DeviceError>>,
    active: AtomicBool,
    released: AtomicBool,
    audio_enabled: AtomicBool,
    video_enabled: AtomicBool,
    acquisitions: AtomicU32,
    encoder_starts: AtomicU32,
    run: Mutex<Option<EncoderRun>>,
}

struct EncoderRun {
    cancel: CancellationToken,
    units: mpsc::Sender<Result<Bytes, EncoderFault>>,
}

impl MockDevice {
    /// Creates a device that supports every format.
    pub fn new() -> Self {
        Self::with_name("mock")
    }

    /// Creates a device with a custom name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(MockDeviceInner {
                name: name.into(),
                supported: Mutex::new(None),
                unavailable: Mutex::new(None),
                active: AtomicBool::new(false),
                released: AtomicBool::new(false),
                audio_enabled: AtomicBool::new(false),
                video_enabled: AtomicBool::new(false),
                acquisitions: AtomicU32::new(0),
                encoder_starts: AtomicU32::new(0),
                run: Mutex::new(None),
            }),
        }
    }

    /// Restricts the formats the device reports as supported.
    pub fn with_formats<I, F>(self, formats: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<ContainerFormat>,
    {
        *self.inner.supported.lock() = Some(formats.into_iter().map(Into::into).collect());
        self
    }

    /// Makes every acquisition fail with `error`.
    pub fn unavailable(self, error: DeviceError) -> Self {
        *self.inner.unavailable.lock() = Some(error);
        self
    }

    /// Makes the current encoder run fail with an [`EncoderFault`].
    ///
    /// The device stays active, so the session restarts encoding.
    pub fn fail_encoder(&self, reason: impl Into<String>) {
        let run = self.inner.run.lock().take();
        if let Some(run) = run {
            let _ = run.units.try_send(Err(EncoderFault::new(reason)));
            run.cancel.cancel();
        }
    }

    /// Simulates the device being unplugged mid-capture.
    pub fn unplug(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        self.fail_encoder("device disconnected");
    }

    /// Returns `true` while the device is acquired and usable.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Returns `true` once a handle has been released.
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Returns whether a track is currently enabled.
    pub fn track_enabled(&self, kind: TrackKind) -> bool {
        self.inner.track(kind).load(Ordering::SeqCst)
    }

    /// Returns how many times the device was acquired.
    pub fn acquisitions(&self) -> u32 {
        self.inner.acquisitions.load(Ordering::SeqCst)
    }

    /// Returns how many encoder runs were started.
    pub fn encoder_starts(&self) -> u32 {
        self.inner.encoder_starts.load(Ordering::SeqCst)
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDeviceInner {
    fn track(&self, kind: TrackKind) -> &AtomicBool {
        match kind {
            TrackKind::Audio => &self.audio_enabled,
            TrackKind::Video => &self.video_enabled,
        }
    }

    fn stop_run(&self) {
        if let Some(run) = self.run.lock().take() {
            run.cancel.cancel();
        }
    }
}

#[async_trait]
impl CaptureDevice for MockDevice {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn supports(&self, format: &ContainerFormat) -> bool {
        match &*self.inner.supported.lock() {
            Some(formats) => formats.contains(format),
            None => true,
        }
    }

    async fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn CaptureHandle>, DeviceError> {
        if let Some(error) = self.inner.unavailable.lock().clone() {
            return Err(error);
        }
        self.inner.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.inner
            .audio_enabled
            .store(constraints.audio, Ordering::SeqCst);
        self.inner
            .video_enabled
            .store(constraints.video, Ordering::SeqCst);
        self.inner.released.store(false, Ordering::SeqCst);
        self.inner.active.store(true, Ordering::SeqCst);
        Ok(Box::new(MockHandle {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockHandle {
    inner: Arc<MockDeviceInner>,
}

impl CaptureHandle for MockHandle {
    fn set_enabled(&self, kind: TrackKind, enabled: bool) {
        self.inner.track(kind).store(enabled, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    fn start_encoder(
        &self,
        format: &ContainerFormat,
        cadence: Duration,
    ) -> Result<EncodedStream, EncoderFault> {
        if !self.is_active() {
            return Err(EncoderFault::new("device is not active"));
        }
        self.inner.stop_run();
        self.inner.encoder_starts.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(ENCODER_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        *self.inner.run.lock() = Some(EncoderRun {
            cancel: cancel.clone(),
            units: tx.clone(),
        });

        let inner = Arc::clone(&self.inner);
        let format = format.clone();
        tokio::spawn(async move {
            if format.has_init_segment() && tx.send(Ok(init_payload(&format))).await.is_err() {
                return;
            }

            let mut ticker = interval_at(Instant::now() + cadence, cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut unit = 0u64;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        unit += 1;
                        let payload = format!(
                            "unit:{unit};audio={};video={}",
                            on_off(inner.audio_enabled.load(Ordering::SeqCst)),
                            on_off(inner.video_enabled.load(Ordering::SeqCst)),
                        );
                        if tx.send(Ok(Bytes::from(payload))).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    fn release(&self) {
        self.inner.stop_run();
        self.inner.active.store(false, Ordering::SeqCst);
        self.inner.released.store(true, Ordering::SeqCst);
    }
}

fn init_payload(format: &ContainerFormat) -> Bytes {
    match format.init_extension() {
        "wav" => streaming_wav_header(MOCK_SAMPLE_RATE, 1),
        _ => Bytes::from(format!("init:{format}")),
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn acquire(device: &MockDevice) -> Box<dyn CaptureHandle> {
        device
            .acquire(&CaptureConstraints::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unavailable_device() {
        let device = MockDevice::new().unavailable(DeviceError::PermissionDenied);
        let result = device.acquire(&CaptureConstraints::default()).await;
        assert!(matches!(result, Err(DeviceError::PermissionDenied)));
        assert_eq!(device.acquisitions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_header_then_units() {
        let device = MockDevice::new();
        let handle = acquire(&device).await;
        let format = ContainerFormat::new("video/mp4");

        let mut units = handle
            .start_encoder(&format, Duration::from_secs(5))
            .unwrap();

        let header = units.recv().await.unwrap().unwrap();
        assert_eq!(header.as_ref(), b"init:video/mp4");

        let first = units.recv().await.unwrap().unwrap();
        assert_eq!(first.as_ref(), b"unit:1;audio=on;video=on");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_header_for_plain_formats() {
        let device = MockDevice::new();
        let handle = acquire(&device).await;

        let mut units = handle
            .start_encoder(&ContainerFormat::new("audio/ogg"), Duration::from_secs(1))
            .unwrap();
        let first = units.recv().await.unwrap().unwrap();
        assert!(first.starts_with(b"unit:1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wav_header_for_wav_format() {
        let device = MockDevice::new();
        let handle = acquire(&device).await;

        let mut units = handle
            .start_encoder(&ContainerFormat::new("audio/wav"), Duration::from_secs(1))
            .unwrap();
        let header = units.recv().await.unwrap().unwrap();
        assert_eq!(&header[0..4], b"RIFF");
    }

    #[tokio::test(start_paused = true)]
    async fn test_muted_track_reflected_in_units() {
        let device = MockDevice::new();
        let handle = acquire(&device).await;
        handle.set_enabled(TrackKind::Video, false);

        let mut units = handle
            .start_encoder(&ContainerFormat::new("audio/ogg"), Duration::from_secs(1))
            .unwrap();
        let first = units.recv().await.unwrap().unwrap();
        assert_eq!(first.as_ref(), b"unit:1;audio=on;video=off");
        assert!(!device.track_enabled(TrackKind::Video));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_encoder_yields_fault_then_ends() {
        let device = MockDevice::new();
        let handle = acquire(&device).await;
        let mut units = handle
            .start_encoder(&ContainerFormat::new("audio/ogg"), Duration::from_secs(1))
            .unwrap();

        device.fail_encoder("muxer stalled");

        let fault = units.recv().await.unwrap();
        assert_eq!(fault, Err(EncoderFault::new("muxer stalled")));
        assert!(units.recv().await.is_none());
        assert!(device.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unplug_deactivates() {
        let device = MockDevice::new();
        let handle = acquire(&device).await;
        let _units = handle
            .start_encoder(&ContainerFormat::new("video/webm"), Duration::from_secs(1))
            .unwrap();

        device.unplug();
        assert!(!handle.is_active());
        assert!(handle
            .start_encoder(&ContainerFormat::new("video/webm"), Duration::from_secs(1))
            .is_err());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let device = MockDevice::new();
        let handle = acquire(&device).await;
        handle.release();
        handle.release();
        assert!(device.is_released());
        assert!(!device.is_active());
    }
}
