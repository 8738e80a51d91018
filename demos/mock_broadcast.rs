//! Mock broadcast example.
//!
//! Streams from a simulated camera to a simulated endpoint, drops the
//! connection halfway through and shows the session recovering.
//!
//! Run with: RUST_LOG=live_ingest=debug cargo run --example mock_broadcast

use std::time::Duration;

use live_ingest::{
    IngestConfig, IngestEvent, MockDevice, MockTransport, StreamIngest, TrackKind,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let transport = MockTransport::new();
    transport.set_viewer_count(3);

    let session = StreamIngest::builder()
        .device(MockDevice::with_name("studio-camera"))
        .transport(transport.clone())
        .with_config(IngestConfig {
            segment_duration: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(1),
            health_interval: Duration::from_secs(2),
            ..Default::default()
        })
        .on_event(|event| match event {
            IngestEvent::ConnectionChanged { state } => println!("connection: {state}"),
            IngestEvent::PhaseChanged { phase } => println!("phase: {phase}"),
            IngestEvent::Health(report) => println!(
                "health: sent={} failed={} queued={} viewers={:?}",
                report.health.sent,
                report.health.failed,
                report.health.queued,
                report.health.viewer_count
            ),
            IngestEvent::Fatal { reason } => eprintln!("fatal: {reason}"),
        })
        .begin()
        .await?;

    println!("Broadcasting {} as {}", session.session_id(), session.format());

    tokio::time::sleep(Duration::from_secs(4)).await;
    println!("Muting audio");
    session.set_device_enabled(TrackKind::Audio, false);

    tokio::time::sleep(Duration::from_secs(2)).await;
    println!("Dropping the connection");
    transport.drop_connection();

    tokio::time::sleep(Duration::from_secs(5)).await;
    session.end().await;

    println!(
        "Delivered segments {:?} ({} init)",
        transport.data_sequences(),
        transport.init_count()
    );

    Ok(())
}
