//! Connection supervisor: owns the connection state and reconnects forever.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::FatalReason;
use crate::identity::SessionIdentity;
use crate::transport::Transport;

/// State of the connection to the ingest endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection. Initial state, and the state after a loss or local close.
    #[default]
    Disconnected,
    /// A connection and start-of-stream handshake are in progress.
    Connecting,
    /// Handshake complete; segments may flow.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
        }
    }
}

/// Keeps a session connected to its endpoint.
///
/// The supervisor is the only writer of the [`ConnectionState`]; everything
/// else observes it through [`subscribe()`](Self::subscribe). Every
/// (re)connection repeats the handshake before `Connected` is published.
/// Failed attempts and losses are followed by a fixed delay, then another
/// attempt, with no ceiling unless one is configured.
pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    identity: SessionIdentity,
    state: watch::Sender<ConnectionState>,
    reconnect_delay: Duration,
    max_attempts: Option<u32>,
}

impl ConnectionSupervisor {
    /// Creates a supervisor in the `Disconnected` state.
    pub fn new(
        transport: Arc<dyn Transport>,
        identity: SessionIdentity,
        reconnect_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            identity,
            state,
            reconnect_delay,
            max_attempts: None,
        }
    }

    /// Gives up after `attempts` consecutive failed connection attempts.
    pub fn with_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Returns a receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn publish(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(
                session_id = %self.identity.session_id,
                from = %previous,
                to = %state,
                "connection state changed"
            );
        }
    }

    /// Runs until cancelled (returns `None`) or the give-up policy is
    /// exhausted (returns the fatal reason).
    ///
    /// Always closes the transport and publishes `Disconnected` on exit.
    pub async fn run(self, cancel: CancellationToken) -> Option<FatalReason> {
        let session_id = self.identity.session_id.clone();
        let mut failures = 0u32;
        let mut fatal = None;

        info!(
            session_id = %session_id,
            transport = self.transport.name(),
            "connection supervisor started"
        );

        loop {
            self.publish(ConnectionState::Connecting);
            let result = tokio::select! {
                () = cancel.cancelled() => break,
                result = self.transport.connect(&self.identity) => result,
            };

            match result {
                Ok(()) => {
                    failures = 0;
                    info!(session_id = %session_id, "connected to endpoint");
                    self.publish(ConnectionState::Connected);
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = self.transport.closed() => {
                            warn!(session_id = %session_id, "connection lost");
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        session_id = %session_id,
                        attempt = failures,
                        error = %e,
                        "connection attempt failed, will retry"
                    );
                }
            }

            self.publish(ConnectionState::Disconnected);

            if let Some(max) = self.max_attempts {
                if failures >= max {
                    error!(
                        session_id = %session_id,
                        attempts = failures,
                        "giving up on reconnecting"
                    );
                    fatal = Some(FatalReason::ReconnectExhausted { attempts: failures });
                    break;
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.transport.disconnect().await;
        self.publish(ConnectionState::Disconnected);
        info!(session_id = %session_id, "connection supervisor stopped");
        fatal
    }
}
