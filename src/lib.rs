//! # live-ingest
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Client-side ingestion for live broadcasts.
//!
//! `live-ingest` captures from a device, encodes into fixed-cadence segments
//! and delivers them in order to an ingest endpoint. The connection may drop
//! and come back at any time; a bounded queue absorbs the outage and the
//! session keeps going.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use live_ingest::{IngestEvent, MockDevice, MockTransport, StreamIngest, TrackKind};
//!
//! # async fn run() -> Result<(), live_ingest::IngestError> {
//! let session = StreamIngest::builder()
//!     .device(MockDevice::new())
//!     .transport(MockTransport::new())
//!     .on_event(|e| match e {
//!         IngestEvent::Health(report) => tracing::info!(?report, "health"),
//!         other => tracing::debug!(?other, "ingest event"),
//!     })
//!     .begin()
//!     .await?;
//!
//! // Mute the microphone without interrupting the broadcast
//! session.set_device_enabled(TrackKind::Audio, false);
//!
//! session.end().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Negotiation**: Picks the first preferred container format the device supports
//! - **Segment Encoder**: Numbers encoded units, hands out one initialization segment
//! - **Delivery Queue**: Bounded, drops the oldest segment when full
//! - **Delivery Worker**: Sends in order while connected, retries a bounded number of times
//! - **Connection Supervisor**: Reconnects after a fixed delay, for as long as the session runs
//!
//! Capture and encoding never wait on the network. A slow or absent
//! connection only ever costs the oldest queued segments.

// unsafe_code lint is configured in Cargo.toml as "deny"
#![warn(missing_docs)]
// Sample conversion requires intentional numeric casts
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
mod config;
pub mod device;
mod error;
mod event;
pub mod format;
mod health;
mod identity;
pub mod pipeline;
mod segment;
mod session;
pub mod transport;

pub use builder::{IngestBuilder, StreamIngest};
pub use config::IngestConfig;
pub use device::{CaptureConstraints, CaptureDevice, CaptureHandle, MockDevice, TrackKind};
pub use error::{DeviceError, EncoderFault, FatalReason, IngestError, TransportError};
pub use event::{event_callback, EventCallback, IngestEvent};
pub use format::ContainerFormat;
pub use health::{HealthCounters, HealthReport, SessionHealth};
pub use identity::{SessionId, SessionIdentity};
pub use pipeline::ConnectionState;
pub use segment::{Segment, SegmentKind};
pub use session::{Session, SessionPhase};
pub use transport::{ChannelTransport, DirectoryTransport, MockTransport, RemoteStats, Transport};

#[cfg(feature = "cpal")]
pub use device::MicrophoneDevice;
