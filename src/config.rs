//! Configuration for ingest sessions.

use std::time::Duration;

use crate::IngestError;

/// Configuration for pipeline behavior.
///
/// Use [`IngestConfig::default()`] for the broadcast defaults, or customize as needed.
///
/// # Example
///
/// ```
/// use live_ingest::IngestConfig;
/// use std::time::Duration;
///
/// let config = IngestConfig {
///     queue_capacity: 20,
///     segment_duration: Duration::from_secs(2),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Maximum number of data segments waiting for delivery.
    ///
    /// When full, the oldest pending segment is dropped and counted as failed.
    /// Default: 10
    pub queue_capacity: usize,

    /// How much media each segment covers.
    ///
    /// Default: 5 seconds
    pub segment_duration: Duration,

    /// Delivery attempts per segment before it is skipped.
    ///
    /// Default: 3
    pub delivery_attempts: u32,

    /// Linear backoff unit between delivery attempts.
    ///
    /// The wait after attempt `n` is `retry_backoff * n`.
    /// Default: 100ms
    pub retry_backoff: Duration,

    /// Delay before reconnecting after the connection is lost or refused.
    ///
    /// Default: 3 seconds
    pub reconnect_delay: Duration,

    /// Consecutive failed connection attempts before the session gives up.
    ///
    /// `None` keeps reconnecting until the session is ended.
    /// Default: `None`
    pub max_reconnect_attempts: Option<u32>,

    /// Delay before the encoder is restarted after an internal fault.
    ///
    /// Default: 2 seconds
    pub encoder_restart_delay: Duration,

    /// Interval between periodic health reports while live.
    ///
    /// Default: 10 seconds
    pub health_interval: Duration,

    /// Upper bound on the remote statistics round trip.
    ///
    /// Default: 2 seconds
    pub stats_timeout: Duration,

    /// Window in which the first connection and the initialization segment
    /// must succeed.
    ///
    /// Default: 15 seconds
    pub startup_timeout: Duration,

    /// How long the delivery worker idles on an empty queue before checking again.
    ///
    /// Enqueues wake the worker early.
    /// Default: 250ms
    pub idle_poll_interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            segment_duration: Duration::from_secs(5),
            delivery_attempts: 3,
            retry_backoff: Duration::from_millis(100),
            reconnect_delay: Duration::from_secs(3),
            max_reconnect_attempts: None,
            encoder_restart_delay: Duration::from_secs(2),
            health_interval: Duration::from_secs(10),
            stats_timeout: Duration::from_secs(2),
            startup_timeout: Duration::from_secs(15),
            idle_poll_interval: Duration::from_millis(250),
        }
    }
}

impl IngestConfig {
    /// Checks that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidConfig`] naming the first rejected setting.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.queue_capacity == 0 {
            return Err(IngestError::invalid_config("queue_capacity must be at least 1"));
        }
        if self.delivery_attempts == 0 {
            return Err(IngestError::invalid_config(
                "delivery_attempts must be at least 1",
            ));
        }
        if self.segment_duration.is_zero() {
            return Err(IngestError::invalid_config(
                "segment_duration must be non-zero",
            ));
        }
        if self.health_interval.is_zero() {
            return Err(IngestError::invalid_config("health_interval must be non-zero"));
        }
        if self.max_reconnect_attempts == Some(0) {
            return Err(IngestError::invalid_config(
                "max_reconnect_attempts must be at least 1 when set",
            ));
        }
        Ok(())
    }
}
