//! Stream client: the receiving-peer side of the transport
//!
//! Binds an OS-assigned local port, announces itself to the host with an
//! explicit empty-payload packet, and then runs the same decode-and-deliver
//! receive loop as the server. A client expects exactly one active sender,
//! so every valid packet is delivered regardless of its source address.

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::NetworkConfig;
use crate::constants::{EVENT_CHANNEL_CAPACITY, MAX_PACKET_SIZE};
use crate::error::NetworkError;
use crate::network::udp::create_socket;
use crate::network::NetworkEvent;
use crate::protocol::{now_millis, AudioPacket};

#[derive(Default)]
struct StatsInner {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    invalid_packets: AtomicU64,
    events_dropped: AtomicU64,
}

/// Point-in-time client statistics
#[derive(Debug, Clone)]
pub struct ClientStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub invalid_packets: u64,
    pub events_dropped: u64,
}

/// Client role of the packet transport
pub struct StreamClient {
    config: NetworkConfig,
    socket: Option<Arc<UdpSocket>>,
    running: Arc<AtomicBool>,
    sequence: AtomicU32,
    stats: Arc<StatsInner>,
    recv_handle: Option<JoinHandle<()>>,
}

impl StreamClient {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            socket: None,
            running: Arc::new(AtomicBool::new(false)),
            sequence: AtomicU32::new(0),
            stats: Arc::new(StatsInner::default()),
            recv_handle: None,
        }
    }

    /// Bind a locally-assigned socket and start the receive loop
    pub fn start(&mut self) -> Result<Receiver<NetworkEvent>, NetworkError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(NetworkError::AlreadyRunning);
        }

        let bind: SocketAddr = ([0, 0, 0, 0], 0).into();
        let socket = Arc::new(create_socket(bind, self.config.recv_timeout())?);
        self.socket = Some(socket.clone());

        let (event_tx, event_rx) = bounded::<NetworkEvent>(EVENT_CHANNEL_CAPACITY);
        self.running.store(true, Ordering::SeqCst);

        let recv_handle = {
            let running = self.running.clone();
            let stats = self.stats.clone();
            thread::Builder::new()
                .name("cast-client-recv".into())
                .spawn(move || receive_loop(socket, running, stats, event_tx))
                .map_err(|e| NetworkError::BindFailed(e.to_string()))?
        };
        self.recv_handle = Some(recv_handle);

        if let Some(addr) = self.local_addr() {
            tracing::info!(%addr, "stream client started");
        }
        Ok(event_rx)
    }

    /// Announce presence to the host with one empty-payload packet
    ///
    /// Complements the server's implicit enrollment; harmless to repeat.
    pub fn register_with_host(&self, host: SocketAddr) -> Result<(), NetworkError> {
        self.send(Bytes::new(), host)
    }

    /// Wrap one payload and transmit it to the fixed host address
    pub fn send(&self, payload: Bytes, host: SocketAddr) -> Result<(), NetworkError> {
        let socket = self.socket.as_ref().ok_or(NetworkError::NotRunning)?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let packet = AudioPacket::new(sequence, now_millis(), payload);
        let encoded = packet
            .encode()
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        socket
            .send_to(&encoded, host)
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Stop the transport; idempotent, returns within one receive timeout
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.recv_handle.take() {
            let _ = handle.join();
        }
        self.socket = None;

        tracing::info!("stream client stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            packets_sent: self.stats.packets_sent.load(Ordering::Relaxed),
            packets_received: self.stats.packets_received.load(Ordering::Relaxed),
            bytes_received: self.stats.bytes_received.load(Ordering::Relaxed),
            invalid_packets: self.stats.invalid_packets.load(Ordering::Relaxed),
            events_dropped: self.stats.events_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(
    socket: Arc<UdpSocket>,
    running: Arc<AtomicBool>,
    stats: Arc<StatsInner>,
    event_tx: Sender<NetworkEvent>,
) {
    let mut buf = [0u8; MAX_PACKET_SIZE + 64];

    while running.load(Ordering::Relaxed) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(ok) => ok,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => {
                if running.load(Ordering::Relaxed) {
                    tracing::warn!(error = %e, "receive error");
                }
                continue;
            }
        };

        match AudioPacket::decode(&buf[..len]) {
            Ok(packet) => {
                stats.packets_received.fetch_add(1, Ordering::Relaxed);
                stats.bytes_received.fetch_add(len as u64, Ordering::Relaxed);

                match event_tx.try_send(NetworkEvent::Packet { from, packet }) {
                    Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                    Err(TrySendError::Full(_)) => {
                        stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Err(e) => {
                stats.invalid_packets.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(peer = %from, error = %e, "dropped malformed datagram");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> NetworkConfig {
        NetworkConfig {
            recv_timeout_ms: 50,
            ..Default::default()
        }
    }

    #[test]
    fn test_registration_packet_reaches_host() {
        let host = UdpSocket::bind("127.0.0.1:0").unwrap();
        host.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let mut client = StreamClient::new(test_config());
        let _events = client.start().unwrap();
        client.register_with_host(host.local_addr().unwrap()).unwrap();

        let mut buf = [0u8; 2048];
        let (len, _) = host.recv_from(&mut buf).unwrap();
        let packet = AudioPacket::decode(&buf[..len]).unwrap();
        assert!(packet.payload.is_empty());
        assert_eq!(packet.sequence, 1);
        assert_eq!(client.stats().packets_sent, 1);

        client.stop();
    }

    #[test]
    fn test_valid_packets_are_delivered_upward() {
        let host = UdpSocket::bind("127.0.0.1:0").unwrap();

        let mut client = StreamClient::new(test_config());
        let events = client.start().unwrap();
        let client_addr: SocketAddr =
            ([127, 0, 0, 1], client.local_addr().unwrap().port()).into();

        let packet = AudioPacket::new(7, 42, Bytes::from_static(&[1, 2, 3]));
        host.send_to(&packet.encode().unwrap(), client_addr).unwrap();
        // Garbage on the same socket is counted, not delivered
        host.send_to(b"noise", client_addr).unwrap();

        match events.recv_timeout(Duration::from_secs(2)).unwrap() {
            NetworkEvent::Packet { packet: received, .. } => {
                assert_eq!(received, packet);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(events.recv_timeout(Duration::from_millis(200)).is_err());

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while client.stats().invalid_packets < 1 {
            assert!(std::time::Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }

        client.stop();
    }

    #[test]
    fn test_stop_idempotent_and_send_after_stop_fails() {
        let mut client = StreamClient::new(test_config());
        let _events = client.start().unwrap();
        client.stop();
        client.stop();
        assert!(!client.is_running());

        let host: SocketAddr = ([127, 0, 0, 1], 9999).into();
        assert!(matches!(
            client.send(Bytes::new(), host),
            Err(NetworkError::NotRunning)
        ));
    }
}
