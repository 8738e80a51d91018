//! Mock transport for testing without a network endpoint.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::identity::{SessionId, SessionIdentity};
use crate::transport::{RemoteStats, Transport, WireMessage};
use crate::TransportError;

/// A scriptable in-memory endpoint.
///
/// Records every accepted message and handshake, and can be told to refuse
/// connections, fail sends, or drop the connection. Like a real endpoint it
/// rejects data segments that arrive before the session's initialization
/// segment, and rejects a second initialization segment.
///
/// Clones share state, so keep one clone to script and inspect while the
/// session owns another.
///
/// # Example
///
/// ```
/// use live_ingest::MockTransport;
///
/// let transport = MockTransport::new();
/// transport.fail_next_sends(2);
/// transport.set_viewer_count(12);
///
/// // Use transport with the StreamIngest builder, then inspect:
/// assert!(transport.messages().is_empty());
/// ```
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

struct MockInner {
    state: Mutex<MockState>,
    connected: watch::Sender<bool>,
    connect_attempts: AtomicU32,
    disconnects: AtomicU32,
}

#[derive(Default)]
struct MockState {
    refuse_connections: bool,
    failing_sends: u32,
    send_delay: Option<Duration>,
    send_attempts: u64,
    viewer_count: u64,
    messages: Vec<WireMessage>,
    handshakes: Vec<SessionIdentity>,
    init_seen: HashSet<SessionId>,
}

impl MockTransport {
    /// Creates a transport that accepts connections and sends.
    pub fn new() -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            inner: Arc::new(MockInner {
                state: Mutex::new(MockState::default()),
                connected,
                connect_attempts: AtomicU32::new(0),
                disconnects: AtomicU32::new(0),
            }),
        }
    }

    /// Makes subsequent `connect` calls fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.state.lock().refuse_connections = refuse;
    }

    /// Makes the next `count` sends fail with [`TransportError::SendFailed`].
    pub fn fail_next_sends(&self, count: u32) {
        self.inner.state.lock().failing_sends = count;
    }

    /// Delays every send by `delay` before it is accepted.
    pub fn set_send_delay(&self, delay: Duration) {
        self.inner.state.lock().send_delay = Some(delay);
    }

    /// Sets the viewer count reported by `request_stats`.
    pub fn set_viewer_count(&self, viewers: u64) {
        self.inner.state.lock().viewer_count = viewers;
    }

    /// Simulates the endpoint dropping the connection.
    pub fn drop_connection(&self) {
        self.inner.connected.send_replace(false);
    }

    /// Returns `true` while a connection is open.
    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Returns all accepted messages in arrival order.
    pub fn messages(&self) -> Vec<WireMessage> {
        self.inner.state.lock().messages.clone()
    }

    /// Returns the sequence numbers of accepted data segments in arrival order.
    pub fn data_sequences(&self) -> Vec<u64> {
        self.inner
            .state
            .lock()
            .messages
            .iter()
            .filter(|m| !m.is_init())
            .map(|m| m.sequence)
            .collect()
    }

    /// Returns how many initialization segments were accepted.
    pub fn init_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .messages
            .iter()
            .filter(|m| m.is_init())
            .count()
    }

    /// Returns every successful handshake in order.
    pub fn handshakes(&self) -> Vec<SessionIdentity> {
        self.inner.state.lock().handshakes.clone()
    }

    /// Returns how many times `connect` was called, successful or not.
    pub fn connect_attempts(&self) -> u32 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Returns how many times `send` was called, successful or not.
    pub fn send_attempts(&self) -> u64 {
        self.inner.state.lock().send_attempts
    }

    /// Returns how many times `disconnect` was called.
    pub fn disconnect_count(&self) -> u32 {
        self.inner.disconnects.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self, identity: &SessionIdentity) -> Result<(), TransportError> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.inner.state.lock();
            if state.refuse_connections {
                return Err(TransportError::connect_failed("endpoint refused connection"));
            }
            state.handshakes.push(identity.clone());
        }
        self.inner.connected.send_replace(true);
        Ok(())
    }

    async fn send(&self, message: &WireMessage) -> Result<(), TransportError> {
        let delay = self.inner.state.lock().send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut state = self.inner.state.lock();
        state.send_attempts += 1;
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(TransportError::send_failed("scripted send failure"));
        }

        if message.is_init() {
            if !state.init_seen.insert(message.session_id.clone()) {
                return Err(TransportError::rejected("duplicate initialization segment"));
            }
        } else if message.format.has_init_segment()
            && !state.init_seen.contains(&message.session_id)
        {
            return Err(TransportError::rejected(
                "data segment before initialization segment",
            ));
        }

        state.messages.push(message.clone());
        Ok(())
    }

    async fn closed(&self) {
        let mut connected = self.inner.connected.subscribe();
        let _ = connected.wait_for(|c| !*c).await;
    }

    async fn disconnect(&self) {
        self.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        self.inner.connected.send_replace(false);
    }

    async fn request_stats(&self, session_id: &SessionId) -> Result<RemoteStats, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let state = self.inner.state.lock();
        let remote_segment_count = state
            .messages
            .iter()
            .filter(|m| !m.is_init() && &m.session_id == session_id)
            .count() as u64;
        Ok(RemoteStats {
            viewer_count: state.viewer_count,
            remote_segment_count,
        })
    }
}
