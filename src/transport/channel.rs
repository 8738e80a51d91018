//! Tokio mpsc channel transport implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::identity::{SessionId, SessionIdentity};
use crate::transport::{RemoteStats, Transport, WireMessage};
use crate::TransportError;

/// A transport that delivers encoded wire frames to a tokio mpsc channel.
///
/// The receiving half plays the endpoint: decode each frame with
/// [`WireMessage::decode`]. Clones share the same connection, so a test or
/// demo can keep one and call [`sever()`](Self::sever) to simulate the
/// endpoint dropping the connection.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use live_ingest::ChannelTransport;
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<Bytes>(64);
/// let transport = ChannelTransport::new(tx);
///
/// // Use transport with the StreamIngest builder...
/// // Then receive frames:
/// // while let Some(frame) = rx.recv().await { WireMessage::decode(&mut frame.clone()) }
/// ```
#[derive(Clone)]
pub struct ChannelTransport {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    sender: mpsc::Sender<Bytes>,
    connected: watch::Sender<bool>,
    delivered: AtomicU64,
}

impl ChannelTransport {
    /// Creates a new channel transport with the given sender.
    pub fn new(sender: mpsc::Sender<Bytes>) -> Self {
        Self::with_name("channel", sender)
    }

    /// Creates a new channel transport with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<Bytes>) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                sender,
                connected,
                delivered: AtomicU64::new(0),
            }),
        }
    }

    /// Simulates the endpoint dropping the connection.
    ///
    /// The session reconnects after its reconnect delay.
    pub fn sever(&self) {
        self.inner.connected.send_replace(false);
    }

    /// Returns `true` while a connection is open.
    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn connect(&self, identity: &SessionIdentity) -> Result<(), TransportError> {
        if self.inner.sender.is_closed() {
            return Err(TransportError::connect_failed("endpoint channel closed"));
        }
        tracing::debug!(
            transport = %self.inner.name,
            session_id = %identity.session_id,
            format = %identity.format,
            "channel transport connected"
        );
        self.inner.connected.send_replace(true);
        Ok(())
    }

    async fn send(&self, message: &WireMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let frame = message
            .encode()
            .map_err(|e| TransportError::send_failed(e.to_string()))?;
        self.inner
            .sender
            .send(frame)
            .await
            .map_err(|_| TransportError::send_failed("endpoint channel closed"))?;
        if !message.is_init() {
            self.inner.delivered.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn closed(&self) {
        let mut connected = self.inner.connected.subscribe();
        tokio::select! {
            _ = connected.wait_for(|c| !*c) => {}
            _ = self.inner.sender.closed() => {}
        }
    }

    async fn disconnect(&self) {
        self.inner.connected.send_replace(false);
    }

    async fn request_stats(&self, _session_id: &SessionId) -> Result<RemoteStats, TransportError> {
        Ok(RemoteStats {
            viewer_count: 0,
            remote_segment_count: self.inner.delivered.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segment;
    use std::time::Duration;

    fn identity() -> SessionIdentity {
        SessionIdentity::new("chan-1", "video/webm")
    }

    fn message(sequence: u64) -> WireMessage {
        let id = identity();
        let segment = Segment::data(sequence, vec![7u8; 8], Duration::ZERO);
        WireMessage::from_segment(&id.session_id, &id.format, &segment)
    }

    #[tokio::test]
    async fn test_sends_decodable_frames() {
        let (tx, mut rx) = mpsc::channel::<Bytes>(10);
        let transport = ChannelTransport::new(tx);

        transport.connect(&identity()).await.unwrap();
        transport.send(&message(1)).await.unwrap();

        let mut frame = rx.recv().await.unwrap();
        let decoded = WireMessage::decode(&mut frame).unwrap();
        assert_eq!(decoded.sequence, 1);
        assert_eq!(decoded.session_id.as_str(), "chan-1");
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let (tx, _rx) = mpsc::channel::<Bytes>(10);
        let transport = ChannelTransport::new(tx);

        let result = transport.send(&message(1)).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_sever_resolves_closed() {
        let (tx, _rx) = mpsc::channel::<Bytes>(10);
        let transport = ChannelTransport::new(tx);
        transport.connect(&identity()).await.unwrap();

        let handle = transport.clone();
        let waiter = tokio::spawn(async move { handle.closed().await });
        transport.sever();

        waiter.await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_dropped_receiver_fails_connect() {
        let (tx, rx) = mpsc::channel::<Bytes>(10);
        let transport = ChannelTransport::new(tx);
        drop(rx);

        let result = transport.connect(&identity()).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
    }

    #[tokio::test]
    async fn test_stats_count_data_segments() {
        let (tx, _rx) = mpsc::channel::<Bytes>(10);
        let transport = ChannelTransport::with_name("endpoint", tx);
        transport.connect(&identity()).await.unwrap();
        transport.send(&message(1)).await.unwrap();
        transport.send(&message(2)).await.unwrap();

        let stats = transport
            .request_stats(&SessionId::new("chan-1"))
            .await
            .unwrap();
        assert_eq!(stats.remote_segment_count, 2);
        assert_eq!(transport.name(), "endpoint");
    }
}
