//! Microphone capture through cpal, encoded as streaming `audio/wav`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::device::{CaptureConstraints, CaptureDevice, CaptureHandle, EncodedStream, TrackKind};
use crate::format::{
    downmix_to_mono, f32_to_i16, samples_to_le_bytes, streaming_wav_header, ContainerFormat,
};
use crate::{DeviceError, EncoderFault};

/// Seconds of audio the ring buffer holds between encoder ticks.
const BUFFER_SECONDS: usize = 30;

const ENCODER_CHANNEL_CAPACITY: usize = 8;

/// The system's default input device, producing `audio/wav`.
///
/// The initialization segment is a streaming 16-bit mono WAV header; data
/// segments are raw s16le PCM covering one cadence each. Disabling the audio
/// track keeps the cadence and emits silence. The video track is ignored.
///
/// The cpal stream lives on a dedicated thread; samples cross to the encoder
/// through a ring buffer.
///
/// # Example
///
/// ```no_run
/// use live_ingest::device::MicrophoneDevice;
///
/// let device = MicrophoneDevice::new();
/// // Use with StreamIngest builder and preferences(["audio/wav"])...
/// ```
pub struct MicrophoneDevice {
    name: String,
}

impl MicrophoneDevice {
    /// Creates a device bound to the default input at acquisition time.
    pub fn new() -> Self {
        let name = cpal::default_host()
            .default_input_device()
            .and_then(|d| d.name().ok())
            .unwrap_or_else(|| "default input".to_string());
        Self { name }
    }
}

impl Default for MicrophoneDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureDevice for MicrophoneDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, format: &ContainerFormat) -> bool {
        format.init_extension() == "wav"
    }

    async fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn CaptureHandle>, DeviceError> {
        let active = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let stream_active = Arc::clone(&active);
        thread::Builder::new()
            .name("live-ingest-mic".to_string())
            .spawn(move || run_input_stream(ready_tx, stop_rx, stream_active))
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        let opened = ready_rx
            .await
            .map_err(|_| DeviceError::Backend("capture thread exited".to_string()))??;

        tracing::info!(
            device = %self.name,
            sample_rate = opened.sample_rate,
            channels = opened.channels,
            "microphone acquired"
        );

        Ok(Box::new(MicrophoneHandle {
            consumer: Arc::new(Mutex::new(opened.consumer)),
            sample_rate: opened.sample_rate,
            channels: opened.channels,
            active,
            audio_enabled: Arc::new(AtomicBool::new(constraints.audio)),
            stop: Mutex::new(Some(stop_tx)),
            run: Mutex::new(None),
        }))
    }
}

struct OpenedStream {
    consumer: HeapCons<i16>,
    sample_rate: u32,
    channels: u16,
}

/// Owns the cpal stream until `stop` fires or its sender is dropped.
fn run_input_stream(
    ready: oneshot::Sender<Result<OpenedStream, DeviceError>>,
    stop: std::sync::mpsc::Receiver<()>,
    active: Arc<AtomicBool>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready.send(Err(DeviceError::NotPresent));
        return;
    };
    let supported = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready.send(Err(DeviceError::Backend(e.to_string())));
            return;
        }
    };

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let capacity = config.sample_rate.0 as usize * config.channels as usize * BUFFER_SECONDS;
    let (producer, consumer) = HeapRb::<i16>::new(capacity).split();

    let stream = match build_stream(&device, &config, sample_format, producer, active) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(DeviceError::Backend(e.to_string())));
        return;
    }

    let opened = OpenedStream {
        consumer,
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };
    if ready.send(Ok(opened)).is_err() {
        return;
    }

    // Blocks until release() or the handle is dropped.
    let _ = stop.recv();
    drop(stream);
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    mut producer: HeapProd<i16>,
    active: Arc<AtomicBool>,
) -> Result<cpal::Stream, DeviceError> {
    let on_error = move |err: cpal::StreamError| {
        tracing::error!(error = %err, "audio stream error");
        active.store(false, Ordering::SeqCst);
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                // Non-blocking push - drops samples if buffer is full
                let _ = producer.push_slice(data);
            },
            on_error,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    let _ = producer.try_push(f32_to_i16(sample));
                }
            },
            on_error,
            None,
        ),
        other => {
            return Err(DeviceError::Backend(format!(
                "unsupported sample format {other:?}"
            )))
        }
    };

    stream.map_err(|e| match e {
        cpal::BuildStreamError::DeviceNotAvailable => DeviceError::NotPresent,
        other => DeviceError::Backend(other.to_string()),
    })
}

struct MicrophoneHandle {
    consumer: Arc<Mutex<HeapCons<i16>>>,
    sample_rate: u32,
    channels: u16,
    active: Arc<AtomicBool>,
    audio_enabled: Arc<AtomicBool>,
    stop: Mutex<Option<std::sync::mpsc::Sender<()>>>,
    run: Mutex<Option<CancellationToken>>,
}

impl CaptureHandle for MicrophoneHandle {
    fn set_enabled(&self, kind: TrackKind, enabled: bool) {
        if kind == TrackKind::Audio {
            self.audio_enabled.store(enabled, Ordering::SeqCst);
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn start_encoder(
        &self,
        _format: &ContainerFormat,
        cadence: Duration,
    ) -> Result<EncodedStream, EncoderFault> {
        if !self.is_active() {
            return Err(EncoderFault::new("input stream is not running"));
        }

        let cancel = CancellationToken::new();
        if let Some(previous) = self.run.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        let (tx, rx) = mpsc::channel(ENCODER_CHANNEL_CAPACITY);
        let consumer = Arc::clone(&self.consumer);
        let active = Arc::clone(&self.active);
        let audio_enabled = Arc::clone(&self.audio_enabled);
        let channels = self.channels;
        let header = streaming_wav_header(self.sample_rate, 1);

        tokio::spawn(async move {
            if tx.send(Ok(header)).await.is_err() {
                return;
            }
            // Discard audio captured before this run.
            consumer.lock().clear();

            let mut ticker = interval_at(Instant::now() + cadence, cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if !active.load(Ordering::SeqCst) {
                            let _ = tx.send(Err(EncoderFault::new("input stream failed"))).await;
                            break;
                        }
                        let captured: Vec<i16> = consumer.lock().pop_iter().collect();
                        let mut mono = downmix_to_mono(&captured, channels);
                        if !audio_enabled.load(Ordering::SeqCst) {
                            mono.iter_mut().for_each(|s| *s = 0);
                        }
                        let payload = Bytes::from(samples_to_le_bytes(&mono));
                        if tx.send(Ok(payload)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    fn release(&self) {
        if let Some(run) = self.run.lock().take() {
            run.cancel();
        }
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(());
        }
        self.active.store(false, Ordering::SeqCst);
    }
}

impl Drop for MicrophoneHandle {
    fn drop(&mut self) {
        self.release();
    }
}
