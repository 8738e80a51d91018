//! Live session handle and lifecycle tracking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::device::TrackKind;
use crate::error::FatalReason;
use crate::event::{EventEmitter, IngestEvent};
use crate::format::ContainerFormat;
use crate::health::{HealthProbe, HealthReport, SessionHealth};
use crate::identity::{SessionId, SessionIdentity};
use crate::pipeline::{ConnectionState, DeliveryQueue, DeliveryWorker, SegmentEncoder};

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Negotiating, connecting and delivering the initialization segment.
    #[default]
    Initializing,
    /// Connected and streaming.
    Live,
    /// Streaming continues into the queue while the connection is re-established.
    Reconnecting,
    /// Torn down. Terminal.
    Ended,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => f.write_str("initializing"),
            Self::Live => f.write_str("live"),
            Self::Reconnecting => f.write_str("reconnecting"),
            Self::Ended => f.write_str("ended"),
        }
    }
}

/// Publishes phase changes and emits [`IngestEvent::PhaseChanged`].
///
/// `Ended` is terminal: once reached, further changes are ignored.
pub(crate) struct PhaseTracker {
    session_id: SessionId,
    phase: watch::Sender<SessionPhase>,
    events: EventEmitter,
}

impl PhaseTracker {
    pub(crate) fn new(session_id: SessionId, events: EventEmitter) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Initializing);
        Self {
            session_id,
            phase,
            events,
        }
    }

    pub(crate) fn get(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    pub(crate) fn set(&self, phase: SessionPhase) -> bool {
        let changed = self.phase.send_if_modified(|current| {
            if *current == phase || *current == SessionPhase::Ended {
                return false;
            }
            *current = phase;
            true
        });
        if changed {
            info!(session_id = %self.session_id, phase = %phase, "session phase changed");
            self.events.emit(IngestEvent::PhaseChanged { phase });
        }
        changed
    }
}

/// Translates connection changes into events and phases, and turns the
/// first fatal report into teardown.
pub(crate) async fn run_session_monitor(
    mut connection: watch::Receiver<ConnectionState>,
    mut fatal: mpsc::UnboundedReceiver<FatalReason>,
    phase: Arc<PhaseTracker>,
    events: EventEmitter,
    cancel: CancellationToken,
) {
    let mut supervised = true;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                // A fatal raised just before teardown is still reported.
                if let Ok(reason) = fatal.try_recv() {
                    report_fatal(reason, &phase, &events, &cancel);
                }
                break;
            }
            Some(reason) = fatal.recv() => {
                report_fatal(reason, &phase, &events, &cancel);
                break;
            }
            changed = connection.changed(), if supervised => {
                if changed.is_err() {
                    // Supervisor has exited; its give-up reason, if any, arrives on `fatal`.
                    supervised = false;
                    continue;
                }
                let state = *connection.borrow_and_update();
                events.emit(IngestEvent::ConnectionChanged { state });
                if phase.get() == SessionPhase::Initializing {
                    continue;
                }
                match state {
                    ConnectionState::Connected => phase.set(SessionPhase::Live),
                    ConnectionState::Disconnected | ConnectionState::Connecting => {
                        phase.set(SessionPhase::Reconnecting)
                    }
                };
            }
        }
    }
}

fn report_fatal(
    reason: FatalReason,
    phase: &PhaseTracker,
    events: &EventEmitter,
    cancel: &CancellationToken,
) {
    error!(session_id = %phase.session_id, reason = %reason, "fatal session error");
    events.emit(IngestEvent::Fatal { reason });
    phase.set(SessionPhase::Ended);
    cancel.cancel();
}

/// Handle to a live ingest session.
///
/// Returned by [`IngestBuilder::begin()`]. Capture, queueing, delivery and
/// reconnection run in background tasks until [`end()`](Session::end) is
/// called, a fatal error occurs, or the `Session` is dropped.
///
/// # Lifecycle
///
/// 1. Created live by [`IngestBuilder::begin()`]
/// 2. Moves between `Live` and `Reconnecting` as the connection drops and returns
/// 3. Call [`end()`](Session::end) to release the device and connection
/// 4. Dropping the `Session` also cancels everything (but prefer explicit `end()`)
///
/// # Example
///
/// ```no_run
/// # async fn run() -> Result<(), live_ingest::IngestError> {
/// use live_ingest::{MockDevice, MockTransport, StreamIngest, TrackKind};
///
/// let session = StreamIngest::builder()
///     .device(MockDevice::new())
///     .transport(MockTransport::new())
///     .begin()
///     .await?;
///
/// session.set_device_enabled(TrackKind::Video, false);
/// let report = session.report_health().await;
/// println!("sent {} segments", report.health.sent);
///
/// session.end().await;
/// # Ok(())
/// # }
/// ```
///
/// [`IngestBuilder::begin()`]: crate::IngestBuilder::begin
pub struct Session {
    identity: SessionIdentity,
    ended: AtomicBool,
    cancel: CancellationToken,
    phase: Arc<PhaseTracker>,
    connection: watch::Receiver<ConnectionState>,
    queue: Arc<DeliveryQueue>,
    encoder: SegmentEncoder,
    worker: DeliveryWorker,
    probe: HealthProbe,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Everything `begin` assembled for a live session.
pub(crate) struct SessionParts {
    pub(crate) identity: SessionIdentity,
    pub(crate) cancel: CancellationToken,
    pub(crate) phase: Arc<PhaseTracker>,
    pub(crate) connection: watch::Receiver<ConnectionState>,
    pub(crate) queue: Arc<DeliveryQueue>,
    pub(crate) encoder: SegmentEncoder,
    pub(crate) worker: DeliveryWorker,
    pub(crate) probe: HealthProbe,
    pub(crate) tasks: Vec<JoinHandle<()>>,
}

impl Session {
    pub(crate) fn new(parts: SessionParts) -> Self {
        Self {
            identity: parts.identity,
            ended: AtomicBool::new(false),
            cancel: parts.cancel,
            phase: parts.phase,
            connection: parts.connection,
            queue: parts.queue,
            encoder: parts.encoder,
            worker: parts.worker,
            probe: parts.probe,
            tasks: Mutex::new(parts.tasks),
        }
    }

    /// Returns the session ID sent with every unit.
    pub fn session_id(&self) -> &SessionId {
        &self.identity.session_id
    }

    /// Returns the negotiated container/codec format.
    pub fn format(&self) -> &ContainerFormat {
        &self.identity.format
    }

    /// Returns the identity announced on every handshake.
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Returns the current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase.get()
    }

    /// Returns `true` while the session is streaming or reconnecting.
    pub fn is_live(&self) -> bool {
        matches!(
            self.phase(),
            SessionPhase::Live | SessionPhase::Reconnecting
        )
    }

    /// Returns a receiver that observes phase changes.
    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    /// Returns the current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Returns a receiver that observes connection state changes.
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    /// Returns the current delivery counters.
    pub fn health(&self) -> SessionHealth {
        self.probe.counters.snapshot()
    }

    /// Returns the number of segments waiting for delivery.
    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Enables or disables a track without interrupting the stream.
    ///
    /// Cadence and segment numbering are unaffected. Ignored once ended.
    pub fn set_device_enabled(&self, kind: TrackKind, enabled: bool) {
        if self.ended.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
            return;
        }
        self.encoder.set_device_enabled(kind, enabled);
    }

    /// Takes a health snapshot and asks the endpoint for its view.
    ///
    /// The round trip is bounded by [`IngestConfig::stats_timeout`]; on
    /// timeout or error `remote` is `None`. Advisory only.
    ///
    /// [`IngestConfig::stats_timeout`]: crate::IngestConfig::stats_timeout
    pub async fn report_health(&self) -> HealthReport {
        self.probe.report().await
    }

    /// Ends the session.
    ///
    /// Stops the encoder (releasing the capture device), the delivery worker
    /// and the connection supervisor (closing the connection), and discards
    /// pending segments. In-flight delivery attempts are abandoned.
    /// Idempotent; always succeeds.
    pub async fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(session_id = %self.identity.session_id, "ending session");

        self.cancel.cancel();
        self.encoder.stop().await;
        self.worker.stop().await;

        let tasks = std::mem::take(&mut *self.tasks.lock());
        futures::future::join_all(tasks).await;

        let discarded = self.queue.clear();
        self.phase.set(SessionPhase::Ended);

        let health = self.health();
        info!(
            session_id = %self.identity.session_id,
            sent = health.sent,
            failed = health.failed,
            discarded,
            "session ended"
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.ended.load(Ordering::SeqCst) {
            // Dropped without end() - background tasks wind down on cancellation
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_callback;

    fn tracker() -> (Arc<PhaseTracker>, Arc<Mutex<Vec<IngestEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let events = EventEmitter::new(Some(event_callback(move |e| sink.lock().push(e))));
        (
            Arc::new(PhaseTracker::new(SessionId::new("phase-1"), events)),
            seen,
        )
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SessionPhase::Reconnecting.to_string(), "reconnecting");
        assert_eq!(SessionPhase::default(), SessionPhase::Initializing);
    }

    #[test]
    fn test_phase_changes_emit_once() {
        let (phase, seen) = tracker();
        assert!(phase.set(SessionPhase::Live));
        assert!(!phase.set(SessionPhase::Live));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_ended_is_terminal() {
        let (phase, _) = tracker();
        phase.set(SessionPhase::Ended);
        assert!(!phase.set(SessionPhase::Live));
        assert_eq!(phase.get(), SessionPhase::Ended);
    }

    #[tokio::test]
    async fn test_monitor_maps_connection_to_phase() {
        let (phase, seen) = tracker();
        phase.set(SessionPhase::Live);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let (_fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let events = EventEmitter::default();

        let task = tokio::spawn(run_session_monitor(
            state_rx,
            fatal_rx,
            Arc::clone(&phase),
            events,
            cancel.clone(),
        ));

        let mut phases = phase.subscribe();
        state_tx.send_replace(ConnectionState::Disconnected);
        phases
            .wait_for(|p| *p == SessionPhase::Reconnecting)
            .await
            .unwrap();
        state_tx.send_replace(ConnectionState::Connected);
        phases.wait_for(|p| *p == SessionPhase::Live).await.unwrap();

        cancel.cancel();
        task.await.unwrap();
        // Live, Reconnecting, Live
        assert_eq!(seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_monitor_fatal_ends_session() {
        let (phase, seen) = tracker();
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let fatal_seen = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&fatal_seen);
        let events = EventEmitter::new(Some(event_callback(move |e| {
            if matches!(e, IngestEvent::Fatal { .. }) {
                *counter.lock() += 1;
            }
        })));

        let task = tokio::spawn(run_session_monitor(
            state_rx,
            fatal_rx,
            Arc::clone(&phase),
            events,
            cancel.clone(),
        ));

        fatal_tx
            .send(FatalReason::DeviceLost {
                reason: "unplugged".to_string(),
            })
            .unwrap();
        fatal_tx
            .send(FatalReason::DeviceLost {
                reason: "again".to_string(),
            })
            .unwrap();
        task.await.unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(phase.get(), SessionPhase::Ended);
        assert_eq!(*fatal_seen.lock(), 1);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_monitor_reports_fatal_after_supervisor_exits() {
        let (phase, _) = tracker();
        phase.set(SessionPhase::Live);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let fatal_seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fatal_seen);
        let events = EventEmitter::new(Some(event_callback(move |e| {
            if let IngestEvent::Fatal { reason } = e {
                sink.lock().push(reason);
            }
        })));

        let task = tokio::spawn(run_session_monitor(
            state_rx,
            fatal_rx,
            Arc::clone(&phase),
            events,
            cancel.clone(),
        ));

        // The supervisor publishes its last state and drops the sender
        // before its give-up reason is forwarded.
        state_tx.send_replace(ConnectionState::Disconnected);
        drop(state_tx);
        tokio::task::yield_now().await;
        fatal_tx
            .send(FatalReason::ReconnectExhausted { attempts: 2 })
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(phase.get(), SessionPhase::Ended);
        assert_eq!(
            *fatal_seen.lock(),
            vec![FatalReason::ReconnectExhausted { attempts: 2 }]
        );
    }

    #[tokio::test]
    async fn test_monitor_reports_fatal_pending_at_cancellation() {
        let (phase, _) = tracker();
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let fatal_count = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&fatal_count);
        let events = EventEmitter::new(Some(event_callback(move |e| {
            if matches!(e, IngestEvent::Fatal { .. }) {
                *counter.lock() += 1;
            }
        })));

        fatal_tx
            .send(FatalReason::ReconnectExhausted { attempts: 1 })
            .unwrap();
        cancel.cancel();

        run_session_monitor(state_rx, fatal_rx, Arc::clone(&phase), events, cancel).await;

        assert_eq!(*fatal_count.lock(), 1);
        assert_eq!(phase.get(), SessionPhase::Ended);
    }
}
