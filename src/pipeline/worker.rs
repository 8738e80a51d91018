//! Delivery worker: drains the queue to the endpoint with bounded retries.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::identity::SessionIdentity;
use crate::pipeline::{ConnectionState, DeliveryQueue};
use crate::segment::Segment;
use crate::transport::{Transport, WireMessage};

/// Log delivery progress every this many segments.
const PROGRESS_LOG_EVERY: u64 = 10;

/// How many times to try a segment and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per segment, including the first.
    pub attempts: u32,
    /// Base backoff; the wait after attempt `n` is `backoff * n`.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Returns the wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Single consumer of the delivery queue.
///
/// While the connection is `Connected` the worker dequeues segments and sends
/// them, retrying each up to [`RetryPolicy::attempts`] times before counting it
/// as failed and moving on. When the connection drops, the worker pauses and
/// holds any segment it already dequeued until the connection returns.
pub struct DeliveryWorker {
    shared: Arc<WorkerShared>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct WorkerShared {
    queue: Arc<DeliveryQueue>,
    transport: Arc<dyn Transport>,
    connection: watch::Receiver<ConnectionState>,
    identity: SessionIdentity,
    policy: RetryPolicy,
    idle_poll: Duration,
}

impl DeliveryWorker {
    /// Creates a stopped worker. Cancelling `parent` stops it too.
    pub fn new(
        queue: Arc<DeliveryQueue>,
        transport: Arc<dyn Transport>,
        connection: watch::Receiver<ConnectionState>,
        identity: SessionIdentity,
        policy: RetryPolicy,
        idle_poll: Duration,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                queue,
                transport,
                connection,
                identity,
                policy,
                idle_poll,
            }),
            cancel: parent.child_token(),
            handle: Mutex::new(None),
        }
    }

    /// Starts the delivery loop. Returns `false` if it was already started.
    pub fn start(&self) -> bool {
        let mut handle = self.handle.lock();
        if handle.is_some() || self.cancel.is_cancelled() {
            return false;
        }
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        *handle = Some(tokio::spawn(async move { shared.run(cancel).await }));
        true
    }

    /// Returns `true` while the delivery loop is running.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the loop, abandoning any in-flight attempt. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "delivery worker task failed");
            }
        }
    }
}

impl WorkerShared {
    async fn run(&self, cancel: CancellationToken) {
        let session_id = &self.identity.session_id;
        let mut connection = self.connection.clone();
        let mut delivered = 0u64;

        info!(session_id = %session_id, "delivery worker started");

        loop {
            if !wait_connected(&mut connection, &cancel).await {
                break;
            }

            let Some(segment) = self.queue.dequeue() else {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = self.queue.notified() => {}
                    () = tokio::time::sleep(self.idle_poll) => {}
                }
                continue;
            };

            match self.deliver(&segment, &mut connection, &cancel).await {
                Some(true) => {
                    delivered += 1;
                    if delivered % PROGRESS_LOG_EVERY == 0 {
                        debug!(
                            session_id = %session_id,
                            delivered,
                            sequence = segment.sequence,
                            queued = self.queue.depth(),
                            "delivery progress"
                        );
                    }
                }
                Some(false) => {}
                None => break,
            }
        }

        info!(session_id = %session_id, delivered, "delivery worker stopped");
    }

    /// Returns `Some(true)` if delivered, `Some(false)` if given up, `None` if cancelled.
    async fn deliver(
        &self,
        segment: &Segment,
        connection: &mut watch::Receiver<ConnectionState>,
        cancel: &CancellationToken,
    ) -> Option<bool> {
        let counters = self.queue.counters();
        let message =
            WireMessage::from_segment(&self.identity.session_id, &self.identity.format, segment);
        let mut attempt = 0u32;

        while attempt < self.policy.attempts {
            if !wait_connected(connection, cancel).await {
                return None;
            }

            let result = tokio::select! {
                () = cancel.cancelled() => return None,
                result = self.transport.send(&message) => result,
            };

            match result {
                Ok(()) => {
                    counters.record_sent();
                    return Some(true);
                }
                Err(e) if *connection.borrow() != ConnectionState::Connected => {
                    debug!(
                        session_id = %self.identity.session_id,
                        sequence = segment.sequence,
                        error = %e,
                        "connection dropped during send, holding segment"
                    );
                }
                Err(e) => {
                    attempt += 1;
                    warn!(
                        session_id = %self.identity.session_id,
                        sequence = segment.sequence,
                        attempt,
                        error = %e,
                        "segment delivery failed"
                    );
                    if attempt < self.policy.attempts {
                        tokio::select! {
                            () = cancel.cancelled() => return None,
                            () = tokio::time::sleep(self.policy.delay_after(attempt)) => {}
                        }
                    }
                }
            }
        }

        counters.record_failed();
        warn!(
            session_id = %self.identity.session_id,
            sequence = segment.sequence,
            attempts = self.policy.attempts,
            "giving up on segment"
        );
        Some(false)
    }
}

/// Waits for `Connected`. Returns `false` if cancelled or the supervisor is gone.
async fn wait_connected(
    connection: &mut watch::Receiver<ConnectionState>,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        result = connection.wait_for(|s| *s == ConnectionState::Connected) => result.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthCounters;
    use crate::transport::MockTransport;
    use tokio::time::Instant;

    struct Harness {
        queue: Arc<DeliveryQueue>,
        counters: Arc<HealthCounters>,
        transport: MockTransport,
        state: watch::Sender<ConnectionState>,
        worker: DeliveryWorker,
    }

    async fn harness(capacity: usize, initial: ConnectionState) -> Harness {
        let counters = Arc::new(HealthCounters::new());
        let queue = Arc::new(DeliveryQueue::new(capacity, Arc::clone(&counters)));
        let transport = MockTransport::new();
        let identity = SessionIdentity::new("worker-1", "audio/ogg;codecs=opus");
        if initial == ConnectionState::Connected {
            transport.connect(&identity).await.unwrap();
        }
        let (state, connection) = watch::channel(initial);
        let worker = DeliveryWorker::new(
            Arc::clone(&queue),
            Arc::new(transport.clone()),
            connection,
            identity,
            RetryPolicy::default(),
            Duration::from_millis(250),
            &CancellationToken::new(),
        );
        Harness {
            queue,
            counters,
            transport,
            state,
            worker,
        }
    }

    fn segment(sequence: u64) -> Segment {
        Segment::data(sequence, vec![0u8; 16], Duration::from_secs(sequence * 5))
    }

    async fn settle_until(mut done: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(3), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_in_order() {
        let h = harness(10, ConnectionState::Connected).await;
        for seq in 1..=5 {
            h.queue.enqueue(segment(seq));
        }
        assert!(h.worker.start());

        settle_until(|| h.counters.snapshot().sent == 5).await;
        assert_eq!(h.transport.data_sequences(), vec![1, 2, 3, 4, 5]);
        h.worker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let h = harness(10, ConnectionState::Connected).await;
        assert!(h.worker.start());
        assert!(!h.worker.start());
        assert!(h.worker.is_running());

        h.worker.stop().await;
        h.worker.stop().await;
        assert!(!h.worker.is_running());
        assert!(!h.worker.start());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_and_backoff() {
        let h = harness(10, ConnectionState::Connected).await;
        h.transport.fail_next_sends(3);
        h.queue.enqueue(segment(1));

        let started = Instant::now();
        h.worker.start();
        settle_until(|| h.counters.snapshot().failed == 1).await;

        assert_eq!(h.transport.send_attempts(), 3);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_millis(600 + 20));
        assert_eq!(h.counters.snapshot().sent, 0);
        h.worker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_last_attempt() {
        let h = harness(10, ConnectionState::Connected).await;
        h.transport.fail_next_sends(2);
        h.queue.enqueue(segment(1));
        h.queue.enqueue(segment(2));
        h.worker.start();

        settle_until(|| h.counters.snapshot().sent == 2).await;
        assert_eq!(h.counters.snapshot().failed, 0);
        assert_eq!(h.transport.data_sequences(), vec![1, 2]);
        h.worker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_while_disconnected_drains_in_order() {
        let h = harness(10, ConnectionState::Disconnected).await;
        h.worker.start();

        for seq in 1..=15 {
            h.queue.enqueue(segment(seq));
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.queue.depth(), 10);
        assert_eq!(h.counters.snapshot().failed, 5);
        assert_eq!(h.transport.send_attempts(), 0);

        h.transport
            .connect(&SessionIdentity::new("worker-1", "audio/ogg;codecs=opus"))
            .await
            .unwrap();
        h.state.send_replace(ConnectionState::Connected);

        settle_until(|| h.counters.snapshot().sent == 10).await;
        assert_eq!(h.transport.data_sequences(), (6..=15).collect::<Vec<_>>());
        assert_eq!(h.counters.snapshot().failed, 5);
        h.worker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_holds_segment_across_disconnect() {
        let h = harness(10, ConnectionState::Connected).await;
        h.transport.set_send_delay(Duration::from_secs(1));
        h.queue.enqueue(segment(1));
        h.worker.start();

        tokio::time::sleep(Duration::from_millis(500)).await;
        h.transport.drop_connection();
        h.state.send_replace(ConnectionState::Disconnected);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.counters.snapshot().sent, 0);
        assert_eq!(h.counters.snapshot().failed, 0);

        h.transport
            .connect(&SessionIdentity::new("worker-1", "audio/ogg;codecs=opus"))
            .await
            .unwrap();
        h.state.send_replace(ConnectionState::Connected);

        settle_until(|| h.counters.snapshot().sent == 1).await;
        assert_eq!(h.transport.data_sequences(), vec![1]);
        assert_eq!(h.counters.snapshot().failed, 0);
        h.worker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_in_flight_send() {
        let h = harness(10, ConnectionState::Connected).await;
        h.transport.set_send_delay(Duration::from_secs(60));
        h.queue.enqueue(segment(1));
        h.worker.start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let stopping = Instant::now();
        h.worker.stop().await;

        assert!(stopping.elapsed() < Duration::from_secs(1));
        assert_eq!(h.counters.snapshot().sent, 0);
    }
}
