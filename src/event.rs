//! Runtime events for monitoring a live session.
//!
//! Connection and phase changes are informational; the session keeps running.
//! [`IngestEvent::Fatal`] is the exception: it is emitted at most once, right
//! before the session tears itself down. Transient faults (a failed send, an
//! encoder restart) are never emitted; they show up in logs and health counters.

use std::sync::Arc;

use crate::error::FatalReason;
use crate::health::HealthReport;
use crate::pipeline::ConnectionState;
use crate::session::SessionPhase;

/// Runtime events emitted during a session.
///
/// # Example
///
/// ```
/// use live_ingest::IngestEvent;
///
/// fn handle_event(event: IngestEvent) {
///     match event {
///         IngestEvent::ConnectionChanged { state } => {
///             eprintln!("connection: {state}");
///         }
///         IngestEvent::PhaseChanged { phase } => {
///             eprintln!("phase: {phase}");
///         }
///         IngestEvent::Health(report) => {
///             eprintln!("sent {} / failed {}", report.health.sent, report.health.failed);
///         }
///         IngestEvent::Fatal { reason } => {
///             eprintln!("session ended: {reason}");
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum IngestEvent {
    /// The connection to the endpoint changed state.
    ConnectionChanged {
        /// The new connection state.
        state: ConnectionState,
    },

    /// The session moved to a new lifecycle phase.
    PhaseChanged {
        /// The new phase.
        phase: SessionPhase,
    },

    /// Periodic health report, emitted while the session is live.
    Health(HealthReport),

    /// The session hit an unrecoverable condition and is shutting down.
    Fatal {
        /// What went wrong.
        reason: FatalReason,
    },
}

/// Callback type for receiving runtime events.
///
/// Register one via [`IngestBuilder::on_event()`]. The callback runs on a
/// session task, so keep it short.
///
/// [`IngestBuilder::on_event()`]: crate::IngestBuilder::on_event
pub type EventCallback = Arc<dyn Fn(IngestEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use live_ingest::{event_callback, IngestEvent};
///
/// let callback = event_callback(|event: IngestEvent| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(IngestEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Fans events out to the registered callback, if any.
#[derive(Clone, Default)]
pub(crate) struct EventEmitter {
    callback: Option<EventCallback>,
}

impl EventEmitter {
    pub(crate) fn new(callback: Option<EventCallback>) -> Self {
        Self { callback }
    }

    pub(crate) fn emit(&self, event: IngestEvent) {
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }
}
