//! Segment encoder: turns a capture device into numbered segments.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::device::{CaptureConstraints, CaptureDevice, CaptureHandle, EncodedStream, TrackKind};
use crate::error::{DeviceError, EncoderFault, FatalReason};
use crate::format::ContainerFormat;
use crate::pipeline::DeliveryQueue;
use crate::segment::Segment;

/// Timing for a [`SegmentEncoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSettings {
    /// How much media each data segment covers.
    pub cadence: Duration,
    /// Wait before restarting a faulted encoder.
    pub restart_delay: Duration,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            cadence: Duration::from_secs(5),
            restart_delay: Duration::from_secs(2),
        }
    }
}

/// Owns the acquired capture device and feeds the delivery queue.
///
/// For formats with an initialization segment, the first unit the encoder
/// produces is handed out once through the receiver returned by
/// [`start()`](Self::start); it is never queued. Every later unit becomes a
/// data segment numbered 1, 2, 3... Encoder faults restart encoding after
/// [`EncoderSettings::restart_delay`] without resetting the numbering or
/// producing a second initialization segment. A fault while the device is no
/// longer active ends the session with [`FatalReason::DeviceLost`].
pub struct SegmentEncoder {
    handle: Arc<dyn CaptureHandle>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SegmentEncoder {
    /// Acquires `device` and starts encoding `format`.
    ///
    /// Returns the encoder and the one-shot receiver for the initialization
    /// segment. For formats without one the receiver's sender is dropped
    /// unused.
    ///
    /// # Errors
    ///
    /// Returns the [`DeviceError`] if the device cannot be acquired. This is
    /// never retried.
    pub async fn start(
        device: &dyn CaptureDevice,
        constraints: &CaptureConstraints,
        format: ContainerFormat,
        queue: Arc<DeliveryQueue>,
        settings: EncoderSettings,
        fatal: mpsc::UnboundedSender<FatalReason>,
        parent: &CancellationToken,
    ) -> Result<(Self, oneshot::Receiver<Segment>), DeviceError> {
        let handle: Arc<dyn CaptureHandle> = Arc::from(device.acquire(constraints).await?);
        info!(device = device.name(), format = %format, "capture device acquired");

        let (init_tx, init_rx) = oneshot::channel();
        let cancel = parent.child_token();
        let encoder_loop = EncoderLoop {
            handle: Arc::clone(&handle),
            expects_header: format.has_init_segment(),
            init_tx: format.has_init_segment().then_some(init_tx),
            format,
            queue,
            settings,
            fatal,
            next_sequence: 1,
            started: Instant::now(),
        };
        let task = tokio::spawn(encoder_loop.run(cancel.clone()));

        Ok((
            Self {
                handle,
                cancel,
                task: Mutex::new(Some(task)),
            },
            init_rx,
        ))
    }

    /// Enables or disables a track without restarting the encoder.
    pub fn set_device_enabled(&self, kind: TrackKind, enabled: bool) {
        info!(track = %kind, enabled, "track toggled");
        self.handle.set_enabled(kind, enabled);
    }

    /// Returns `true` while the encoding task is running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stops encoding and releases the capture device. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "encoder task failed");
            }
        }
        self.handle.release();
    }
}

struct EncoderLoop {
    handle: Arc<dyn CaptureHandle>,
    format: ContainerFormat,
    queue: Arc<DeliveryQueue>,
    settings: EncoderSettings,
    fatal: mpsc::UnboundedSender<FatalReason>,
    expects_header: bool,
    init_tx: Option<oneshot::Sender<Segment>>,
    next_sequence: u64,
    started: Instant,
}

impl EncoderLoop {
    async fn run(mut self, cancel: CancellationToken) {
        let mut runs = 0u32;

        loop {
            runs += 1;
            let fault = match self.handle.start_encoder(&self.format, self.settings.cadence) {
                Ok(units) => {
                    debug!(run = runs, "encoder run started");
                    match self.pump(units, &cancel).await {
                        Some(fault) => fault,
                        None => break,
                    }
                }
                Err(fault) => fault,
            };

            if !self.handle.is_active() {
                error!(error = %fault, "capture device is no longer active");
                let _ = self.fatal.send(FatalReason::DeviceLost {
                    reason: fault.reason,
                });
                break;
            }

            warn!(
                error = %fault,
                next_sequence = self.next_sequence,
                restart_in_ms = self.settings.restart_delay.as_millis(),
                "encoder fault, restarting"
            );
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.settings.restart_delay) => {}
            }
        }

        self.handle.release();
        info!(segments = self.next_sequence - 1, "encoder stopped");
    }

    /// Consumes one encoder run. Returns the fault that ended it, or `None` if cancelled.
    async fn pump(
        &mut self,
        mut units: EncodedStream,
        cancel: &CancellationToken,
    ) -> Option<EncoderFault> {
        let mut header_pending = self.expects_header;

        loop {
            let unit = tokio::select! {
                () = cancel.cancelled() => return None,
                unit = units.recv() => unit,
            };

            let payload = match unit {
                Some(Ok(payload)) => payload,
                Some(Err(fault)) => return Some(fault),
                None => return Some(EncoderFault::new("encoder stream ended")),
            };

            if header_pending {
                header_pending = false;
                match self.init_tx.take() {
                    Some(init_tx) => {
                        info!(bytes = payload.len(), "initialization segment ready");
                        let _ = init_tx.send(Segment::init(payload, self.started.elapsed()));
                    }
                    None => debug!("discarding header from restarted encoder"),
                }
                continue;
            }

            let segment = Segment::data(self.next_sequence, payload, self.started.elapsed());
            self.next_sequence += 1;
            self.queue.enqueue(segment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthCounters;
    use crate::device::MockDevice;

    struct Harness {
        device: MockDevice,
        queue: Arc<DeliveryQueue>,
        fatal_rx: mpsc::UnboundedReceiver<FatalReason>,
        encoder: SegmentEncoder,
        init_rx: oneshot::Receiver<Segment>,
    }

    async fn start(format: &str) -> Harness {
        let device = MockDevice::new();
        let queue = Arc::new(DeliveryQueue::new(100, Arc::new(HealthCounters::new())));
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let (encoder, init_rx) = SegmentEncoder::start(
            &device,
            &CaptureConstraints::default(),
            ContainerFormat::new(format),
            Arc::clone(&queue),
            EncoderSettings::default(),
            fatal_tx,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        Harness {
            device,
            queue,
            fatal_rx,
            encoder,
            init_rx,
        }
    }

    fn drain(queue: &DeliveryQueue) -> Vec<u64> {
        std::iter::from_fn(|| queue.dequeue())
            .map(|s| s.sequence)
            .collect()
    }

    #[tokio::test]
    async fn test_unavailable_device_is_an_error() {
        let device = MockDevice::new().unavailable(DeviceError::Busy {
            name: "cam0".to_string(),
        });
        let queue = Arc::new(DeliveryQueue::new(10, Arc::new(HealthCounters::new())));
        let (fatal_tx, _fatal_rx) = mpsc::unbounded_channel();

        let result = SegmentEncoder::start(
            &device,
            &CaptureConstraints::default(),
            ContainerFormat::new("video/webm"),
            queue,
            EncoderSettings::default(),
            fatal_tx,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(DeviceError::Busy { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_handed_out_then_numbered_data() {
        let h = start("video/mp4").await;

        let init = h.init_rx.await.unwrap();
        assert!(init.is_init());
        assert_eq!(init.sequence, 0);

        tokio::time::sleep(Duration::from_millis(15_100)).await;
        assert_eq!(drain(&h.queue), vec![1, 2, 3]);
        h.encoder.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_format_without_header_has_no_init() {
        let h = start("audio/ogg").await;
        tokio::time::sleep(Duration::from_millis(5_100)).await;

        assert!(h.init_rx.await.is_err());
        assert_eq!(drain(&h.queue), vec![1]);
        h.encoder.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_keeps_numbering_and_skips_header() {
        let mut h = start("video/webm").await;
        tokio::time::sleep(Duration::from_millis(10_100)).await;

        h.device.fail_encoder("muxer stalled");
        // 2 s restart delay, then a fresh run with a 5 s cadence.
        tokio::time::sleep(Duration::from_millis(7_100)).await;

        assert_eq!(h.device.encoder_starts(), 2);
        assert_eq!(drain(&h.queue), vec![1, 2, 3]);
        assert!(h.fatal_rx.try_recv().is_err());
        assert!(h.queue.is_empty());
        h.encoder.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_track_does_not_restart() {
        let h = start("video/webm").await;
        tokio::time::sleep(Duration::from_millis(5_100)).await;

        h.encoder.set_device_enabled(TrackKind::Video, false);
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        let segments: Vec<Segment> = std::iter::from_fn(|| h.queue.dequeue()).collect();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].sequence, 2);
        assert!(segments[1].payload.ends_with(b"video=off"));
        assert_eq!(h.device.encoder_starts(), 1);
        h.encoder.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_lost_is_fatal() {
        let mut h = start("video/webm").await;
        tokio::time::sleep(Duration::from_millis(5_100)).await;

        h.device.unplug();
        let reason = h.fatal_rx.recv().await.unwrap();
        assert!(matches!(reason, FatalReason::DeviceLost { .. }));

        tokio::task::yield_now().await;
        assert!(!h.encoder.is_running());
        assert!(h.device.is_released());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_device_and_is_idempotent() {
        let h = start("video/webm").await;
        h.encoder.stop().await;
        h.encoder.stop().await;

        assert!(h.device.is_released());
        assert!(!h.encoder.is_running());
    }
}
