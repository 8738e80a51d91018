//! Directory recording example.
//!
//! Writes the initialization segment and every data segment of a mock
//! session into `./recordings/<session-id>/`.
//!
//! Run with: cargo run --example record_to_directory

use std::time::Duration;

use live_ingest::{DirectoryTransport, IngestConfig, MockDevice, StreamIngest};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let transport = DirectoryTransport::new("recordings");

    let session = StreamIngest::builder()
        .device(MockDevice::new())
        .transport(transport.clone())
        .preferences(["video/webm;codecs=vp8,opus"])
        .with_config(IngestConfig {
            segment_duration: Duration::from_millis(500),
            ..Default::default()
        })
        .begin()
        .await?;

    tokio::time::sleep(Duration::from_secs(5)).await;

    let report = session.report_health().await;
    session.end().await;

    println!(
        "Recorded to {}",
        transport.session_dir(session.session_id()).display()
    );
    println!("Report: {report:?}");

    Ok(())
}
