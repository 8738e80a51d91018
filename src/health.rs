//! Session health counters and the periodic health reporter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::event::{EventEmitter, IngestEvent};
use crate::identity::SessionId;
use crate::pipeline::ConnectionState;
use crate::session::SessionPhase;
use crate::transport::{RemoteStats, Transport};

/// Live counters shared by the queue, the delivery worker and the session.
///
/// Only the queue updates `queued` and counts evictions; only the worker
/// counts sends and delivery failures; only stats round-trips update the
/// remote view.
#[derive(Debug, Default)]
pub struct HealthCounters {
    queued: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    remote: Mutex<Option<RemoteStats>>,
}

impl HealthCounters {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_queued(&self, depth: usize) {
        self.queued.store(depth as u64, Ordering::Release);
    }

    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_remote(&self, stats: RemoteStats) {
        *self.remote.lock() = Some(stats);
    }

    /// Returns a point-in-time copy of every counter.
    pub fn snapshot(&self) -> SessionHealth {
        let remote = *self.remote.lock();
        SessionHealth {
            queued: self.queued.load(Ordering::Acquire),
            sent: self.sent.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            viewer_count: remote.map(|r| r.viewer_count),
            remote_segment_count: remote.map(|r| r.remote_segment_count),
        }
    }
}

/// Snapshot of a session's delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionHealth {
    /// Segments waiting in the delivery queue.
    pub queued: u64,
    /// Data segments the endpoint accepted.
    pub sent: u64,
    /// Data segments given up on, either evicted or out of attempts.
    pub failed: u64,
    /// Viewer count from the last successful stats round-trip.
    pub viewer_count: Option<u64>,
    /// Segments the endpoint confirmed at the last stats round-trip.
    pub remote_segment_count: Option<u64>,
}

impl SessionHealth {
    /// Fraction of resolved segments that were delivered, in `[0.0, 1.0]`.
    ///
    /// Returns `1.0` before any segment has been sent or dropped.
    pub fn delivery_ratio(&self) -> f64 {
        let resolved = self.sent + self.failed;
        if resolved == 0 {
            return 1.0;
        }
        self.sent as f64 / resolved as f64
    }
}

/// Health snapshot combined with the endpoint's view of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    /// Local counters.
    pub health: SessionHealth,
    /// Stats from this round-trip, `None` if the endpoint did not answer in time.
    pub remote: Option<RemoteStats>,
    /// Session phase when the report was taken.
    pub phase: SessionPhase,
    /// Connection state when the report was taken.
    pub connection: ConnectionState,
}

/// Everything a health round-trip needs.
#[derive(Clone)]
pub(crate) struct HealthProbe {
    pub(crate) session_id: SessionId,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) counters: Arc<HealthCounters>,
    pub(crate) phase: watch::Receiver<SessionPhase>,
    pub(crate) connection: watch::Receiver<ConnectionState>,
    pub(crate) stats_timeout: Duration,
}

impl HealthProbe {
    /// Asks the endpoint for stats (bounded by the stats timeout) and builds a report.
    pub(crate) async fn report(&self) -> HealthReport {
        let remote = match tokio::time::timeout(
            self.stats_timeout,
            self.transport.request_stats(&self.session_id),
        )
        .await
        {
            Ok(Ok(stats)) => {
                self.counters.record_remote(stats);
                Some(stats)
            }
            Ok(Err(e)) => {
                debug!(session_id = %self.session_id, error = %e, "stats request failed");
                None
            }
            Err(_) => {
                debug!(session_id = %self.session_id, "stats request timed out");
                None
            }
        };

        HealthReport {
            health: self.counters.snapshot(),
            remote,
            phase: *self.phase.borrow(),
            connection: *self.connection.borrow(),
        }
    }
}

/// Emits a [`IngestEvent::Health`] every `interval` until cancelled.
pub(crate) async fn run_health_reporter(
    probe: HealthProbe,
    interval: Duration,
    events: EventEmitter,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(
        session_id = %probe.session_id,
        interval_ms = interval.as_millis(),
        "health reporter started"
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let report = tokio::select! {
                    () = cancel.cancelled() => break,
                    report = probe.report() => report,
                };
                debug!(
                    session_id = %probe.session_id,
                    queued = report.health.queued,
                    sent = report.health.sent,
                    failed = report.health.failed,
                    "health report"
                );
                events.emit(IngestEvent::Health(report));
            }
        }
    }

    debug!(session_id = %probe.session_id, "health reporter stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_callback;
    use crate::transport::MockTransport;
    use crate::SessionIdentity;

    #[test]
    fn test_snapshot_reflects_counters() {
        let counters = HealthCounters::new();
        counters.set_queued(4);
        counters.record_sent();
        counters.record_sent();
        counters.record_failed();

        let health = counters.snapshot();
        assert_eq!(health.queued, 4);
        assert_eq!(health.sent, 2);
        assert_eq!(health.failed, 1);
        assert_eq!(health.viewer_count, None);
    }

    #[test]
    fn test_delivery_ratio() {
        let empty = SessionHealth::default();
        assert!((empty.delivery_ratio() - 1.0).abs() < f64::EPSILON);

        let health = SessionHealth {
            sent: 3,
            failed: 1,
            ..SessionHealth::default()
        };
        assert!((health.delivery_ratio() - 0.75).abs() < f64::EPSILON);
    }

    fn probe(transport: &MockTransport, counters: &Arc<HealthCounters>) -> HealthProbe {
        let (_, phase) = watch::channel(SessionPhase::Live);
        let (_, connection) = watch::channel(ConnectionState::Connected);
        HealthProbe {
            session_id: SessionId::new("health-1"),
            transport: Arc::new(transport.clone()),
            counters: Arc::clone(counters),
            phase,
            connection,
            stats_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_report_records_remote_stats() {
        let transport = MockTransport::new();
        transport.set_viewer_count(8);
        transport
            .connect(&SessionIdentity::new("health-1", "video/webm"))
            .await
            .unwrap();
        let counters = Arc::new(HealthCounters::new());

        let report = probe(&transport, &counters).report().await;
        assert_eq!(report.remote.map(|r| r.viewer_count), Some(8));
        assert_eq!(counters.snapshot().viewer_count, Some(8));
        assert_eq!(report.phase, SessionPhase::Live);
    }

    #[tokio::test]
    async fn test_report_without_stats() {
        let transport = MockTransport::new();
        let counters = Arc::new(HealthCounters::new());

        let report = probe(&transport, &counters).report().await;
        assert!(report.remote.is_none());
        assert_eq!(report.health.viewer_count, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_emits_periodically() {
        let transport = MockTransport::new();
        let counters = Arc::new(HealthCounters::new());
        let reports = Arc::new(Mutex::new(0u32));
        let seen = Arc::clone(&reports);
        let events = EventEmitter::new(Some(event_callback(move |event| {
            if matches!(event, IngestEvent::Health(_)) {
                *seen.lock() += 1;
            }
        })));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_health_reporter(
            probe(&transport, &counters),
            Duration::from_secs(10),
            events,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(35)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(*reports.lock(), 3);
    }
}
