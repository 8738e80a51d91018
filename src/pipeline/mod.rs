//! Session pipeline components.
//!
//! A live session connects the capture device to the endpoint through a
//! bounded queue:
//!
//! ```text
//! Capture Device → Segment Encoder → Delivery Queue → Delivery Worker → Transport
//!                                                          ↑
//!                                      Connection Supervisor (state watch)
//! ```
//!
//! - **Segment Encoder**: Numbers encoded units and hands the init segment out once
//! - **Delivery Queue**: Bounded drop-oldest FIFO, absorbs connection outages
//! - **Delivery Worker**: Sends while connected, bounded retry then skip
//! - **Connection Supervisor**: Sole owner of the connection state, reconnects forever
//!
//! Every task selects on a shared cancellation token, so ending a session
//! stops all of them promptly.

mod encoder;
mod queue;
mod supervisor;
mod worker;

pub use encoder::{EncoderSettings, SegmentEncoder};
pub use queue::DeliveryQueue;
pub use supervisor::{ConnectionState, ConnectionSupervisor};
pub use worker::{DeliveryWorker, RetryPolicy};
