//! Broadcast Host Application
//!
//! Captures PCM chunks and fans them out to every enrolled peer. Runs a
//! synthetic tone source in place of a platform capture device.

use anyhow::Result;
use bytes::Bytes;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_audio_cast::{
    audio::{CaptureSource, ToneSource},
    config::AppConfig,
    constants::MAX_PAYLOAD_SIZE,
    network::{BroadcastServer, NetworkEvent},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting broadcast host");

    let mut config = AppConfig::default();
    if let Some(port) = std::env::args().nth(1) {
        config.network.udp_port = port.parse()?;
    }

    let mut server = BroadcastServer::new(config.network.clone());
    let events = server.start()?;
    tracing::info!("Listening on UDP port {}", config.network.udp_port);

    let mut source = ToneSource::new(config.audio, 440.0);
    let chunk_ms = config.audio.buffer_duration_ms;
    let chunk_bytes = config.audio.chunk_bytes(chunk_ms).min(MAX_PAYLOAD_SIZE);
    let mut chunk = vec![0u8; chunk_bytes];

    tracing::info!(
        "Broadcasting {} Hz tone: {} byte chunks every {} ms - press Ctrl+C to stop",
        440,
        chunk_bytes,
        chunk_ms
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(chunk_ms));
    let mut last_stats = std::time::Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Drain transport events; joins/leaves are worth surfacing
                while let Ok(event) = events.try_recv() {
                    match event {
                        NetworkEvent::PeerJoined(addr) => {
                            tracing::info!("Peer joined: {}", addr);
                        }
                        NetworkEvent::PeerLeft(addr) => {
                            tracing::info!("Peer left: {}", addr);
                        }
                        NetworkEvent::Packet { .. } => {}
                    }
                }

                let written = source.next_chunk(&mut chunk);
                if written > 0 {
                    server.broadcast(Bytes::copy_from_slice(&chunk[..written]))?;
                }

                if last_stats.elapsed() >= Duration::from_secs(5) {
                    last_stats = std::time::Instant::now();
                    let stats = server.stats();
                    tracing::info!(
                        "Host stats: {} peers, {} packets sent ({:.1} KB), {} send failures, {} invalid received",
                        stats.client_count,
                        stats.packets_sent,
                        stats.bytes_sent as f64 / 1024.0,
                        stats.send_failures,
                        stats.invalid_packets
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    server.stop();
    Ok(())
}
