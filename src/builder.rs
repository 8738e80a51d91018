//! Builder pattern for `StreamIngest`.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::device::{CaptureConstraints, CaptureDevice};
use crate::error::FatalReason;
use crate::event::{event_callback, EventCallback, EventEmitter, IngestEvent};
use crate::format::{default_preferences, negotiate, ContainerFormat, FALLBACK_FORMAT};
use crate::health::{run_health_reporter, HealthCounters, HealthProbe};
use crate::identity::{SessionId, SessionIdentity};
use crate::pipeline::{
    ConnectionState, ConnectionSupervisor, DeliveryQueue, DeliveryWorker, EncoderSettings,
    RetryPolicy, SegmentEncoder,
};
use crate::session::{run_session_monitor, PhaseTracker, Session, SessionParts, SessionPhase};
use crate::transport::{Transport, WireMessage};
use crate::{IngestConfig, IngestError};

/// Builder for configuring and beginning a live session.
///
/// Use [`StreamIngest::builder()`] to create a new builder.
///
/// # Example
///
/// ```no_run
/// # async fn run() -> Result<(), live_ingest::IngestError> {
/// use live_ingest::{MockDevice, MockTransport, StreamIngest};
///
/// let session = StreamIngest::builder()
///     .device(MockDevice::new())
///     .transport(MockTransport::new())
///     .prefer("video/mp4;codecs=avc1.42E01E,mp4a.40.2")
///     .prefer("video/webm;codecs=vp8,opus")
///     .session_id("studio-a")
///     .on_event(|e| tracing::info!(?e, "ingest event"))
///     .begin()
///     .await?;
///
/// session.end().await;
/// # Ok(())
/// # }
/// ```
///
/// [`StreamIngest::builder()`]: crate::StreamIngest::builder
#[must_use]
pub struct IngestBuilder {
    device: Option<Arc<dyn CaptureDevice>>,
    transport: Option<Arc<dyn Transport>>,
    preferences: Vec<ContainerFormat>,
    constraints: CaptureConstraints,
    session_id: Option<SessionId>,
    event_callback: Option<EventCallback>,
    config: IngestConfig,
}

impl Default for IngestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            device: None,
            transport: None,
            preferences: Vec::new(),
            constraints: CaptureConstraints::default(),
            session_id: None,
            event_callback: None,
            config: IngestConfig::default(),
        }
    }

    /// Sets the capture device.
    pub fn device<D: CaptureDevice + 'static>(mut self, device: D) -> Self {
        self.device = Some(Arc::new(device));
        self
    }

    /// Sets the transport to the ingest endpoint.
    pub fn transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Replaces the format preference list, best first.
    ///
    /// Default: [`default_preferences()`](crate::format::default_preferences)
    pub fn preferences<I, F>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<ContainerFormat>,
    {
        self.preferences = formats.into_iter().map(Into::into).collect();
        self
    }

    /// Appends one format to the preference list.
    pub fn prefer(mut self, format: impl Into<ContainerFormat>) -> Self {
        self.preferences.push(format.into());
        self
    }

    /// Sets which tracks to request from the device.
    ///
    /// Default: audio and video
    pub fn constraints(mut self, constraints: CaptureConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Sets the session ID. Generated when not set.
    pub fn session_id(mut self, id: impl Into<SessionId>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events include connection and phase changes, periodic health reports,
    /// and the single fatal notification if the session dies.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(IngestEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Set custom pipeline configuration.
    pub fn with_config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the builder configuration.
    fn validate(&self) -> Result<(), IngestError> {
        if self.device.is_none() {
            return Err(IngestError::NoDeviceConfigured);
        }
        if self.transport.is_none() {
            return Err(IngestError::NoTransportConfigured);
        }
        self.config.validate()
    }

    /// Negotiates a format, connects, delivers the initialization segment and
    /// starts streaming.
    ///
    /// Returns a live [`Session`]. On error every acquired resource has
    /// already been released.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No device or transport is configured, or the config is invalid
    /// - The device supports neither a preferred format nor the fallback
    /// - The device cannot be acquired ([`IngestError::DeviceUnavailable`])
    /// - The first connection or the initialization segment does not succeed
    ///   within [`IngestConfig::startup_timeout`] ([`IngestError::InitializationFailed`])
    pub async fn begin(self) -> Result<Session, IngestError> {
        self.validate()?;
        let (Some(device), Some(transport)) = (self.device, self.transport) else {
            return Err(IngestError::NoDeviceConfigured);
        };
        let config = self.config;

        let preferences = if self.preferences.is_empty() {
            default_preferences()
        } else {
            self.preferences
        };
        let format = negotiate(&preferences, |f| device.supports(f));
        if !device.supports(&format) {
            return Err(IngestError::NoUsableFormat {
                preferences: preferences.iter().map(ToString::to_string).collect(),
                fallback: FALLBACK_FORMAT.to_string(),
            });
        }

        let identity = SessionIdentity::new(
            self.session_id.unwrap_or_else(SessionId::generate),
            format,
        );
        info!(
            session_id = %identity.session_id,
            format = %identity.format,
            device = device.name(),
            transport = transport.name(),
            "beginning session"
        );

        let events = EventEmitter::new(self.event_callback);
        let cancel = CancellationToken::new();
        let counters = Arc::new(HealthCounters::new());
        let queue = Arc::new(DeliveryQueue::new(
            config.queue_capacity,
            Arc::clone(&counters),
        ));
        let phase = Arc::new(PhaseTracker::new(
            identity.session_id.clone(),
            events.clone(),
        ));
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();

        let supervisor = ConnectionSupervisor::new(
            Arc::clone(&transport),
            identity.clone(),
            config.reconnect_delay,
        )
        .with_max_attempts(config.max_reconnect_attempts);
        let connection = supervisor.subscribe();

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn({
            let cancel = cancel.clone();
            let fatal_tx = fatal_tx.clone();
            async move {
                if let Some(reason) = supervisor.run(cancel).await {
                    let _ = fatal_tx.send(reason);
                }
            }
        }));
        tasks.push(tokio::spawn(run_session_monitor(
            connection.clone(),
            fatal_rx,
            Arc::clone(&phase),
            events.clone(),
            cancel.clone(),
        )));

        let worker = DeliveryWorker::new(
            Arc::clone(&queue),
            Arc::clone(&transport),
            connection.clone(),
            identity.clone(),
            RetryPolicy {
                attempts: config.delivery_attempts,
                backoff: config.retry_backoff,
            },
            config.idle_poll_interval,
            &cancel,
        );

        let startup = Startup {
            device: device.as_ref(),
            constraints: &self.constraints,
            transport: transport.as_ref(),
            identity: &identity,
            queue: &queue,
            settings: EncoderSettings {
                cadence: config.segment_duration,
                restart_delay: config.encoder_restart_delay,
            },
            fatal: fatal_tx,
            cancel: &cancel,
        };
        let mut encoder = None;
        let result = match tokio::time::timeout(
            config.startup_timeout,
            startup.run(connection.clone(), &mut encoder, &worker),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(IngestError::initialization(format!(
                "session did not go live within {:?}",
                config.startup_timeout
            ))),
        };

        let encoder = match (result, encoder) {
            (Ok(()), Some(encoder)) => encoder,
            (result, encoder) => {
                let e = result
                    .err()
                    .unwrap_or_else(|| IngestError::initialization("encoder did not start"));
                error!(session_id = %identity.session_id, error = %e, "session failed to start");
                cancel.cancel();
                if let Some(encoder) = encoder {
                    encoder.stop().await;
                }
                worker.stop().await;
                futures::future::join_all(tasks).await;
                queue.clear();
                phase.set(SessionPhase::Ended);
                return Err(e);
            }
        };

        phase.set(SessionPhase::Live);

        let probe = HealthProbe {
            session_id: identity.session_id.clone(),
            transport: Arc::clone(&transport),
            counters,
            phase: phase.subscribe(),
            connection: connection.clone(),
            stats_timeout: config.stats_timeout,
        };
        tasks.push(tokio::spawn(run_health_reporter(
            probe.clone(),
            config.health_interval,
            events,
            cancel.clone(),
        )));

        info!(session_id = %identity.session_id, "session live");

        Ok(Session::new(SessionParts {
            identity,
            cancel,
            phase,
            connection,
            queue,
            encoder,
            worker,
            probe,
            tasks,
        }))
    }
}

/// The part of `begin` bounded by the startup window.
struct Startup<'a> {
    device: &'a dyn CaptureDevice,
    constraints: &'a CaptureConstraints,
    transport: &'a dyn Transport,
    identity: &'a SessionIdentity,
    queue: &'a Arc<DeliveryQueue>,
    settings: EncoderSettings,
    fatal: mpsc::UnboundedSender<FatalReason>,
    cancel: &'a CancellationToken,
}

impl Startup<'_> {
    /// Waits for the first connection, starts the encoder, sends the
    /// initialization segment once, then starts the delivery worker.
    ///
    /// The encoder is stored in `encoder` as soon as it exists so the caller
    /// can stop it if startup fails or times out.
    async fn run(
        self,
        mut connection: watch::Receiver<ConnectionState>,
        encoder: &mut Option<SegmentEncoder>,
        worker: &DeliveryWorker,
    ) -> Result<(), IngestError> {
        let connected = tokio::select! {
            () = self.cancel.cancelled() => false,
            result = connection.wait_for(|s| *s == ConnectionState::Connected) => result.is_ok(),
        };
        if !connected {
            return Err(IngestError::initialization(
                "connection supervisor stopped before connecting",
            ));
        }

        let (started, init_rx) = SegmentEncoder::start(
            self.device,
            self.constraints,
            self.identity.format.clone(),
            Arc::clone(self.queue),
            self.settings,
            self.fatal,
            self.cancel,
        )
        .await?;
        *encoder = Some(started);

        if self.identity.format.has_init_segment() {
            let init = tokio::select! {
                () = self.cancel.cancelled() => None,
                init = init_rx => init.ok(),
            }
            .ok_or_else(|| {
                IngestError::initialization("encoder stopped before producing a header")
            })?;

            let message = WireMessage::from_segment(
                &self.identity.session_id,
                &self.identity.format,
                &init,
            );
            self.transport.send(&message).await.map_err(|e| {
                IngestError::initialization(format!("initialization segment not delivered: {e}"))
            })?;
            info!(
                session_id = %self.identity.session_id,
                bytes = init.len(),
                "initialization segment delivered"
            );
        }

        worker.start();
        Ok(())
    }
}

/// Main entry point for live-ingest.
///
/// Use [`StreamIngest::builder()`] to start configuring a session.
pub struct StreamIngest;

impl StreamIngest {
    /// Creates a new builder for configuring a session.
    pub fn builder() -> IngestBuilder {
        IngestBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockDevice;
    use crate::transport::MockTransport;

    #[test]
    fn test_builder_default() {
        let builder = IngestBuilder::new();
        assert!(builder.device.is_none());
        assert!(builder.transport.is_none());
        assert!(builder.preferences.is_empty());
    }

    #[test]
    fn test_builder_preferences() {
        let builder = StreamIngest::builder()
            .preferences(["video/mp4", "video/webm"])
            .prefer("audio/wav");
        let prefs: Vec<&str> = builder.preferences.iter().map(|f| f.as_str()).collect();
        assert_eq!(prefs, vec!["video/mp4", "video/webm", "audio/wav"]);
    }

    #[tokio::test]
    async fn test_begin_requires_device() {
        let result = StreamIngest::builder()
            .transport(MockTransport::new())
            .begin()
            .await;
        assert!(matches!(result, Err(IngestError::NoDeviceConfigured)));
    }

    #[tokio::test]
    async fn test_begin_requires_transport() {
        let result = StreamIngest::builder()
            .device(MockDevice::new())
            .begin()
            .await;
        assert!(matches!(result, Err(IngestError::NoTransportConfigured)));
    }

    #[tokio::test]
    async fn test_begin_rejects_invalid_config() {
        let result = StreamIngest::builder()
            .device(MockDevice::new())
            .transport(MockTransport::new())
            .with_config(IngestConfig {
                queue_capacity: 0,
                ..IngestConfig::default()
            })
            .begin()
            .await;
        assert!(matches!(result, Err(IngestError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_no_usable_format() {
        let device = MockDevice::new().with_formats(["audio/ogg"]);
        let transport = MockTransport::new();

        let result = StreamIngest::builder()
            .device(device.clone())
            .transport(transport.clone())
            .begin()
            .await;

        assert!(matches!(result, Err(IngestError::NoUsableFormat { .. })));
        assert_eq!(device.acquisitions(), 0);
        assert_eq!(transport.connect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negotiated_format_is_announced() {
        let device = MockDevice::new().with_formats(["video/webm;codecs=vp8,opus"]);
        let transport = MockTransport::new();

        let session = StreamIngest::builder()
            .device(device)
            .transport(transport.clone())
            .preferences(["video/mp4;codecs=avc1", "video/webm;codecs=vp8,opus"])
            .session_id("negotiated")
            .begin()
            .await
            .unwrap();

        assert_eq!(session.format().as_str(), "video/webm;codecs=vp8,opus");
        assert_eq!(transport.handshakes()[0].format, *session.format());
        session.end().await;
    }
}
