//! Bounded drop-oldest queue between the encoder and the delivery worker.

use std::sync::Arc;

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use crate::health::HealthCounters;
use crate::segment::Segment;

/// FIFO of data segments awaiting delivery, bounded at a fixed capacity.
///
/// When a segment arrives at capacity the oldest segment is evicted and
/// counted as failed. Every operation holds the same lock, so depth, eviction
/// and the `queued` counter always agree.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use live_ingest::pipeline::DeliveryQueue;
/// use live_ingest::{HealthCounters, Segment};
///
/// let counters = Arc::new(HealthCounters::new());
/// let queue = DeliveryQueue::new(2, Arc::clone(&counters));
///
/// queue.enqueue(Segment::data(1, vec![1], Duration::ZERO));
/// queue.enqueue(Segment::data(2, vec![2], Duration::ZERO));
/// let evicted = queue.enqueue(Segment::data(3, vec![3], Duration::ZERO));
///
/// assert_eq!(evicted.map(|s| s.sequence), Some(1));
/// assert_eq!(queue.depth(), 2);
/// assert_eq!(counters.snapshot().failed, 1);
/// ```
pub struct DeliveryQueue {
    ring: Mutex<HeapRb<Segment>>,
    capacity: usize,
    counters: Arc<HealthCounters>,
    notify: Notify,
}

impl DeliveryQueue {
    /// Creates an empty queue holding at most `capacity` segments (minimum 1).
    pub fn new(capacity: usize, counters: Arc<HealthCounters>) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(HeapRb::new(capacity)),
            capacity,
            counters,
            notify: Notify::new(),
        }
    }

    /// Appends a segment, evicting the oldest one if the queue is full.
    ///
    /// Returns the evicted segment, if any.
    pub fn enqueue(&self, segment: Segment) -> Option<Segment> {
        let sequence = segment.sequence;
        let evicted = {
            let mut ring = self.ring.lock();
            let evicted = ring.push_overwrite(segment);
            if evicted.is_some() {
                self.counters.record_failed();
            }
            self.counters.set_queued(ring.occupied_len());
            evicted
        };

        if let Some(dropped) = &evicted {
            tracing::warn!(
                evicted = dropped.sequence,
                sequence,
                capacity = self.capacity,
                "delivery queue full, dropped oldest segment"
            );
        }
        self.notify.notify_one();
        evicted
    }

    /// Removes and returns the oldest segment.
    pub fn dequeue(&self) -> Option<Segment> {
        let mut ring = self.ring.lock();
        let segment = ring.try_pop();
        self.counters.set_queued(ring.occupied_len());
        segment
    }

    /// Returns the number of queued segments.
    pub fn depth(&self) -> usize {
        self.ring.lock().occupied_len()
    }

    /// Returns the maximum number of queued segments.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the counters this queue reports into.
    pub fn counters(&self) -> &Arc<HealthCounters> {
        &self.counters
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Drops every queued segment without counting them as failed.
    pub fn clear(&self) -> usize {
        let mut ring = self.ring.lock();
        let dropped = ring.clear();
        self.counters.set_queued(0);
        dropped
    }

    /// Resolves after the next `enqueue`, or immediately if one happened
    /// since the last wakeup.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("depth", &self.depth())
            .field("capacity", &self.capacity)
            .finish()
    }
}
