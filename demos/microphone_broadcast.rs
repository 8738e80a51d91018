//! Microphone broadcast example.
//!
//! Captures the default input device as streaming WAV and sends the wire
//! frames over a channel, printing each one as it arrives.
//!
//! Run with: cargo run --example microphone_broadcast --features cpal

use std::time::Duration;

use live_ingest::transport::WireMessage;
use live_ingest::{
    CaptureConstraints, ChannelTransport, IngestConfig, MicrophoneDevice, StreamIngest,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (tx, mut rx) = mpsc::channel(32);

    let session = StreamIngest::builder()
        .device(MicrophoneDevice::new())
        .transport(ChannelTransport::with_name("stdout", tx))
        .preferences(["audio/wav"])
        .constraints(CaptureConstraints::audio_only())
        .with_config(IngestConfig {
            segment_duration: Duration::from_secs(1),
            ..Default::default()
        })
        .begin()
        .await?;

    println!("Broadcasting for 10 seconds...");

    let printer = tokio::spawn(async move {
        while let Some(mut frame) = rx.recv().await {
            match WireMessage::decode(&mut frame) {
                Ok(message) => println!(
                    "{} #{} {} bytes",
                    message.kind.as_str(),
                    message.sequence,
                    message.payload.len()
                ),
                Err(e) => eprintln!("bad frame: {e}"),
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(10)).await;
    session.end().await;
    drop(session);
    printer.await?;

    Ok(())
}
