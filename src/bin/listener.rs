//! Listener Application
//!
//! Receiving peer: registers with a broadcast host, feeds arriving packets
//! through the jitter buffer, and pulls paced chunks into a playback sink.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_audio_cast::{
    audio::{NullSink, PlaybackSink},
    config::AppConfig,
    constants::DEFAULT_UDP_PORT,
    network::{NetworkEvent, StreamClient},
    playback::PlaybackBuffer,
};

/// Re-announce cadence; keeps the host's liveness timer fresh even when the
/// broadcast itself is idle
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting listener");

    let config = AppConfig::default();

    let host_addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_UDP_PORT))
        .parse()?;
    tracing::info!("Host: {}", host_addr);

    let mut client = StreamClient::new(config.network.clone());
    let events = client.start()?;
    client.register_with_host(host_addr)?;

    let buffer = Arc::new(PlaybackBuffer::new(config.audio, config.jitter));

    // Ingestion thread: receive path -> jitter buffer. Exits when the
    // transport drops its end of the channel.
    let ingest_handle = {
        let buffer = buffer.clone();
        thread::Builder::new()
            .name("cast-ingest".into())
            .spawn(move || {
                for event in events.iter() {
                    if let NetworkEvent::Packet { packet, .. } = event {
                        buffer.add_packet(packet);
                    }
                }
            })?
    };

    let mut sink = NullSink::new(config.audio);
    let chunk_ms = config.audio.buffer_duration_ms;
    let chunk_bytes = config.audio.chunk_bytes(chunk_ms);

    tracing::info!(
        "Playback pacing: {} byte chunks every {} ms - press Ctrl+C to stop",
        chunk_bytes,
        chunk_ms
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(chunk_ms));
    let mut last_stats = std::time::Instant::now();
    let mut last_keepalive = std::time::Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let chunk = buffer.next_chunk(chunk_bytes);
                if !chunk.is_empty() {
                    sink.write_chunk(&chunk);
                }

                if last_keepalive.elapsed() >= KEEPALIVE_INTERVAL {
                    last_keepalive = std::time::Instant::now();
                    client.register_with_host(host_addr)?;
                }

                if last_stats.elapsed() >= Duration::from_secs(5) {
                    last_stats = std::time::Instant::now();
                    let stats = buffer.stats();
                    let net = client.stats();
                    tracing::info!(
                        "Listener stats: {:?}, {} played, {} dropped, buffer {} ms (level {:.2}), latency {:?} ms, {} received / {} invalid",
                        stats.state,
                        stats.packets_played,
                        stats.packets_dropped,
                        stats.buffered_ms,
                        stats.buffer_level,
                        stats.latency_ms,
                        net.packets_received,
                        net.invalid_packets
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    client.stop();
    buffer.clear();
    let _ = ingest_handle.join();
    Ok(())
}
