//! Error types for live-ingest.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`IngestError`], [`FatalReason`]): prevent a session from
//!   starting or end a running one
//! - **Recoverable faults** ([`TransportError`], [`EncoderFault`]): absorbed by
//!   the pipeline and visible only through health counters and logs

use std::path::PathBuf;

/// Fatal errors returned from [`IngestBuilder::begin()`].
///
/// When `begin` fails, every resource it acquired (capture device, transport
/// connection, pending segments) has already been released.
///
/// [`IngestBuilder::begin()`]: crate::IngestBuilder::begin
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The capture device could not be acquired.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(#[from] DeviceError),

    /// Neither a preferred format nor the fallback is supported by the device.
    #[error("no usable format: device supports none of {preferences:?} nor the fallback {fallback}")]
    NoUsableFormat {
        /// The preference list that was negotiated.
        preferences: Vec<String>,
        /// The fallback format that was tried last.
        fallback: String,
    },

    /// The session could not reach the live state within the startup window.
    #[error("session initialization failed: {reason}")]
    InitializationFailed {
        /// Why initialization failed.
        reason: String,
    },

    /// The configuration is not usable.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Which setting was rejected.
        reason: String,
    },

    /// No capture device was configured before calling `begin`.
    #[error("no capture device configured - call device() before begin()")]
    NoDeviceConfigured,

    /// No transport was configured before calling `begin`.
    #[error("no transport configured - call transport() before begin()")]
    NoTransportConfigured,
}

impl IngestError {
    /// Creates an initialization failure with the given reason.
    pub fn initialization(reason: impl Into<String>) -> Self {
        Self::InitializationFailed {
            reason: reason.into(),
        }
    }

    /// Creates a configuration error with the given reason.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Reason code carried by [`IngestEvent::Fatal`](crate::IngestEvent::Fatal).
///
/// A running session emits at most one fatal notification, then tears itself down.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FatalReason {
    /// The capture device stopped being usable mid-session.
    #[error("capture device lost: {reason}")]
    DeviceLost {
        /// Last fault reported by the encoder.
        reason: String,
    },

    /// The reconnect give-up policy was exhausted.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted {
        /// Consecutive failed connection attempts.
        attempts: u32,
    },
}

/// Errors reported by a [`CaptureDevice`](crate::device::CaptureDevice) on acquisition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The operating system denied access to the device.
    #[error("permission denied for capture (check OS privacy settings)")]
    PermissionDenied,

    /// The device is held by another process.
    #[error("device busy: {name}")]
    Busy {
        /// Name of the busy device.
        name: String,
    },

    /// No capture device is present.
    #[error("no capture device present")]
    NotPresent,

    /// An error from the underlying capture backend.
    #[error("capture backend error: {0}")]
    Backend(String),
}

/// A fault inside the encoder. The session restarts encoding after a delay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("encoder fault: {reason}")]
pub struct EncoderFault {
    /// Description of the fault.
    pub reason: String,
}

impl EncoderFault {
    /// Creates an encoder fault with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors that can occur within a [`Transport`](crate::Transport) implementation.
///
/// Transport errors are recoverable: a failed connect is retried by the
/// connection supervisor, a failed send by the delivery worker.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection or start-of-stream handshake failed.
    #[error("connect failed: {reason}")]
    ConnectFailed {
        /// Why the connection failed.
        reason: String,
    },

    /// A send was attempted without a live connection.
    #[error("not connected")]
    NotConnected,

    /// The endpoint received the unit but refused it.
    #[error("endpoint rejected unit: {reason}")]
    Rejected {
        /// Reason given by the endpoint.
        reason: String,
    },

    /// The unit could not be transmitted.
    #[error("send failed: {reason}")]
    SendFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// Remote statistics are not available.
    #[error("stats unavailable: {reason}")]
    StatsUnavailable {
        /// Why stats could not be fetched.
        reason: String,
    },

    /// File I/O error.
    #[error("file error: {path}: {source}")]
    Io {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Custom error for user-implemented transports.
    #[error("{0}")]
    Custom(String),
}

impl TransportError {
    /// Creates a custom transport error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a connect failure with the given reason.
    pub fn connect_failed(reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            reason: reason.into(),
        }
    }

    /// Creates a send failure with the given reason.
    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::SendFailed {
            reason: reason.into(),
        }
    }

    /// Creates a rejection with the given reason.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Creates a file error for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
