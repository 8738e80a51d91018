//! Transport trait and implementations for ingest endpoints.
//!
//! A [`Transport`] carries wire messages to a remote ingest endpoint. The
//! crate provides three built-in transports:
//!
//! - [`ChannelTransport`]: Sends encoded frames to a tokio mpsc channel
//! - [`DirectoryTransport`]: Writes segments as files into a directory
//! - [`MockTransport`]: Scriptable transport for tests
//!
//! Implement [`Transport`] for real network endpoints (WebSocket, HTTP, QUIC).

mod channel;
mod file;
mod mock;
pub mod wire;

pub use channel::ChannelTransport;
pub use file::DirectoryTransport;
pub use mock::MockTransport;
pub use wire::{WireError, WireMessage};

use async_trait::async_trait;

use crate::identity::{SessionId, SessionIdentity};
use crate::TransportError;

/// Statistics reported by the endpoint for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteStats {
    /// Number of viewers currently watching.
    pub viewer_count: u64,
    /// Number of data segments the endpoint has accepted.
    pub remote_segment_count: u64,
}

/// A connection to an ingest endpoint.
///
/// # Implementation Notes
///
/// - Methods take `&self`; use interior mutability if needed
/// - `connect` is called on every (re)connection and must perform the
///   start-of-stream handshake for the given identity before returning
/// - `closed` resolves when the endpoint drops the connection; the supervisor
///   waits on it while connected
/// - `send` is only called by a single delivery task, but may race with
///   `connect`/`disconnect` from the supervisor
///
/// # Example
///
/// ```
/// use live_ingest::transport::{Transport, WireMessage};
/// use live_ingest::{SessionIdentity, TransportError};
/// use async_trait::async_trait;
///
/// struct PrintTransport;
///
/// #[async_trait]
/// impl Transport for PrintTransport {
///     fn name(&self) -> &str {
///         "print"
///     }
///
///     async fn connect(&self, identity: &SessionIdentity) -> Result<(), TransportError> {
///         println!("start {} as {}", identity.session_id, identity.format);
///         Ok(())
///     }
///
///     async fn send(&self, message: &WireMessage) -> Result<(), TransportError> {
///         println!("{} #{} ({} bytes)", message.kind, message.sequence, message.payload.len());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Opens the connection and announces the session.
    ///
    /// Errors are recoverable: the supervisor retries after its reconnect delay.
    async fn connect(&self, identity: &SessionIdentity) -> Result<(), TransportError>;

    /// Sends one unit and waits for the endpoint to accept it.
    async fn send(&self, message: &WireMessage) -> Result<(), TransportError>;

    /// Resolves when the endpoint reports the connection as lost.
    ///
    /// Default implementation never resolves (the transport cannot detect loss).
    async fn closed(&self) {
        std::future::pending::<()>().await;
    }

    /// Closes the connection. Called once on session teardown.
    ///
    /// Default implementation does nothing.
    async fn disconnect(&self) {}

    /// Asks the endpoint for its view of the session.
    ///
    /// Default implementation reports stats as unavailable.
    async fn request_stats(&self, _session_id: &SessionId) -> Result<RemoteStats, TransportError> {
        Err(TransportError::StatsUnavailable {
            reason: format!("{} does not report stats", self.name()),
        })
    }
}
