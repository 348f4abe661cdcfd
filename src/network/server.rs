//! Broadcast server: the host side of the transport
//!
//! Owns the receiving socket, the membership table, and the outgoing
//! sequence counter. Every call to [`BroadcastServer::broadcast`] wraps one
//! PCM chunk in an [`AudioPacket`] and fans it out to the current membership
//! snapshot. Two background threads run while the server is up: the receive
//! loop (decode, enroll, deliver) and the low-frequency membership sweep.

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::NetworkConfig;
use crate::constants::{EVENT_CHANNEL_CAPACITY, MAX_PACKET_SIZE};
use crate::error::NetworkError;
use crate::network::clients::ClientTable;
use crate::network::udp::create_socket;
use crate::network::NetworkEvent;
use crate::protocol::{now_millis, AudioPacket};

/// Shared counters published by the server
#[derive(Default)]
struct StatsInner {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    invalid_packets: AtomicU64,
    send_failures: AtomicU64,
    events_dropped: AtomicU64,
}

/// Point-in-time server statistics
#[derive(Debug, Clone)]
pub struct ServerStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub invalid_packets: u64,
    pub send_failures: u64,
    pub events_dropped: u64,
    pub client_count: usize,
}

/// Server role of the packet transport
pub struct BroadcastServer {
    config: NetworkConfig,
    clients: Arc<ClientTable>,
    socket: Option<Arc<UdpSocket>>,
    running: Arc<AtomicBool>,
    sequence: AtomicU32,
    stats: Arc<StatsInner>,
    recv_handle: Option<JoinHandle<()>>,
    sweep_handle: Option<JoinHandle<()>>,
}

impl BroadcastServer {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            clients: Arc::new(ClientTable::new()),
            socket: None,
            running: Arc::new(AtomicBool::new(false)),
            sequence: AtomicU32::new(0),
            stats: Arc::new(StatsInner::default()),
            recv_handle: None,
            sweep_handle: None,
        }
    }

    /// Bind the socket and start the receive and sweep threads
    ///
    /// Returns the receiver end of the delivery channel. A bind failure is
    /// fatal: the server never enters the running state.
    pub fn start(&mut self) -> Result<Receiver<NetworkEvent>, NetworkError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(NetworkError::AlreadyRunning);
        }

        let bind: SocketAddr = ([0, 0, 0, 0], self.config.udp_port).into();
        let socket = Arc::new(create_socket(bind, self.config.recv_timeout())?);
        self.socket = Some(socket.clone());

        let (event_tx, event_rx) = bounded::<NetworkEvent>(EVENT_CHANNEL_CAPACITY);
        self.running.store(true, Ordering::SeqCst);

        let recv_handle = {
            let running = self.running.clone();
            let clients = self.clients.clone();
            let stats = self.stats.clone();
            let event_tx = event_tx.clone();
            let socket = socket.clone();
            thread::Builder::new()
                .name("cast-server-recv".into())
                .spawn(move || receive_loop(socket, running, clients, stats, event_tx))
                .map_err(|e| NetworkError::BindFailed(e.to_string()))?
        };

        let sweep_handle = {
            let running = self.running.clone();
            let clients = self.clients.clone();
            let stats = self.stats.clone();
            let interval = self.config.sweep_interval();
            let timeout = self.config.client_timeout();
            thread::Builder::new()
                .name("cast-server-sweep".into())
                .spawn(move || sweep_loop(running, clients, stats, interval, timeout, event_tx))
                .map_err(|e| NetworkError::BindFailed(e.to_string()))?
        };

        self.recv_handle = Some(recv_handle);
        self.sweep_handle = Some(sweep_handle);

        if let Some(addr) = self.local_addr() {
            tracing::info!(%addr, "broadcast server started");
        }
        Ok(event_rx)
    }

    /// Wrap one PCM chunk and send a copy to every live member
    ///
    /// A send failure toward one peer is counted and logged but never aborts
    /// delivery to the others. Returns the number of successful sends.
    pub fn broadcast(&self, payload: Bytes) -> Result<usize, NetworkError> {
        let socket = self.socket.as_ref().ok_or(NetworkError::NotRunning)?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let packet = AudioPacket::new(sequence, now_millis(), payload);
        let encoded = packet
            .encode()
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        let mut delivered = 0;
        for addr in self.clients.snapshot() {
            match socket.send_to(&encoded, addr) {
                Ok(_) => {
                    self.clients.record_sent(addr);
                    self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .bytes_sent
                        .fetch_add(encoded.len() as u64, Ordering::Relaxed);
                    delivered += 1;
                }
                Err(e) => {
                    self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(peer = %addr, error = %e, "send failed");
                }
            }
        }

        Ok(delivered)
    }

    /// Stop the transport; idempotent
    ///
    /// The receive loop observes the cleared flag within one socket receive
    /// timeout, so this returns promptly.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.recv_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.sweep_handle.take() {
            let _ = handle.join();
        }
        self.socket = None;

        tracing::info!("broadcast server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bound address, once running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Handle to the membership table, for diagnostics and embedding
    pub fn client_table(&self) -> Arc<ClientTable> {
        self.clients.clone()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            packets_sent: self.stats.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.stats.bytes_sent.load(Ordering::Relaxed),
            packets_received: self.stats.packets_received.load(Ordering::Relaxed),
            bytes_received: self.stats.bytes_received.load(Ordering::Relaxed),
            invalid_packets: self.stats.invalid_packets.load(Ordering::Relaxed),
            send_failures: self.stats.send_failures.load(Ordering::Relaxed),
            events_dropped: self.stats.events_dropped.load(Ordering::Relaxed),
            client_count: self.clients.len(),
        }
    }
}

impl Drop for BroadcastServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(
    socket: Arc<UdpSocket>,
    running: Arc<AtomicBool>,
    clients: Arc<ClientTable>,
    stats: Arc<StatsInner>,
    event_tx: Sender<NetworkEvent>,
) {
    let mut buf = [0u8; MAX_PACKET_SIZE + 64];

    while running.load(Ordering::Relaxed) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(ok) => ok,
            // Timeouts let the loop observe the stop flag
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => {
                if running.load(Ordering::Relaxed) {
                    tracing::warn!(error = %e, "receive error");
                }
                continue;
            }
        };

        let packet = match AudioPacket::decode(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                stats.invalid_packets.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(peer = %from, error = %e, "dropped malformed datagram");
                continue;
            }
        };

        stats.packets_received.fetch_add(1, Ordering::Relaxed);
        stats.bytes_received.fetch_add(len as u64, Ordering::Relaxed);

        // Implicit enrollment: any valid datagram enrolls its sender
        if clients.register_or_touch(from) {
            tracing::info!(peer = %from, "peer joined");
            push_event(&event_tx, &stats, NetworkEvent::PeerJoined(from));
        }
        clients.record_received(from, &packet);

        push_event(&event_tx, &stats, NetworkEvent::Packet { from, packet });
    }
}

fn sweep_loop(
    running: Arc<AtomicBool>,
    clients: Arc<ClientTable>,
    stats: Arc<StatsInner>,
    interval: Duration,
    timeout: Duration,
    event_tx: Sender<NetworkEvent>,
) {
    // Sleep in short slices so stop() is not held up by the sweep interval
    let slice = Duration::from_millis(50).min(interval);
    let mut last_sweep = Instant::now();

    while running.load(Ordering::Relaxed) {
        thread::sleep(slice);
        if last_sweep.elapsed() < interval {
            continue;
        }
        last_sweep = Instant::now();

        for addr in clients.sweep(timeout) {
            tracing::info!(peer = %addr, "peer timed out");
            push_event(&event_tx, &stats, NetworkEvent::PeerLeft(addr));
        }
    }
}

/// Deliver an event without ever blocking the producing loop
fn push_event(event_tx: &Sender<NetworkEvent>, stats: &Arc<StatsInner>, event: NetworkEvent) {
    match event_tx.try_send(event) {
        Ok(()) | Err(TrySendError::Disconnected(_)) => {}
        Err(TrySendError::Full(_)) => {
            stats.events_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_PAYLOAD_SIZE;

    fn test_config() -> NetworkConfig {
        NetworkConfig {
            udp_port: 0,
            recv_timeout_ms: 50,
            client_timeout_ms: 200,
            sweep_interval_ms: 100,
        }
    }

    fn peer_socket() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        socket
    }

    fn server_target(server: &BroadcastServer) -> SocketAddr {
        let port = server.local_addr().unwrap().port();
        ([127, 0, 0, 1], port).into()
    }

    fn register(peer: &UdpSocket, target: SocketAddr) {
        let hello = AudioPacket::new(0, now_millis(), Bytes::new()).encode().unwrap();
        peer.send_to(&hello, target).unwrap();
    }

    fn wait_for_clients(server: &BroadcastServer, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while server.client_count() < n {
            assert!(Instant::now() < deadline, "peers never enrolled");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_two_peers_receive_three_broadcasts_in_order() {
        let mut server = BroadcastServer::new(test_config());
        let events = server.start().unwrap();
        let target = server_target(&server);

        let peer_a = peer_socket();
        let peer_b = peer_socket();
        register(&peer_a, target);
        register(&peer_b, target);
        wait_for_clients(&server, 2);

        for _ in 0..3 {
            let delivered = server.broadcast(Bytes::from_static(&[0x01, 0x02])).unwrap();
            assert_eq!(delivered, 2);
        }

        for peer in [&peer_a, &peer_b] {
            let mut buf = [0u8; 2048];
            for expected_seq in 1..=3u32 {
                let (len, _) = peer.recv_from(&mut buf).unwrap();
                let packet = AudioPacket::decode(&buf[..len]).unwrap();
                assert_eq!(packet.sequence, expected_seq);
                assert_eq!(&packet.payload[..], &[0x01, 0x02]);
            }
        }

        // Both registrations surfaced as join events
        let joined = events
            .try_iter()
            .filter(|e| matches!(e, NetworkEvent::PeerJoined(_)))
            .count();
        assert_eq!(joined, 2);

        server.stop();
    }

    #[test]
    fn test_partial_send_failure_does_not_abort_broadcast() {
        let mut server = BroadcastServer::new(test_config());
        server.start().unwrap();
        let target = server_target(&server);

        let peer = peer_socket();
        register(&peer, target);
        wait_for_clients(&server, 1);

        // Port 0 is unsendable, so this member always fails
        server.client_table().register_or_touch(([127, 0, 0, 1], 0).into());
        assert_eq!(server.client_count(), 2);

        let delivered = server.broadcast(Bytes::from_static(&[9])).unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(server.stats().send_failures, 1);

        let mut buf = [0u8; 2048];
        let (len, _) = peer.recv_from(&mut buf).unwrap();
        let packet = AudioPacket::decode(&buf[..len]).unwrap();
        assert_eq!(&packet.payload[..], &[9]);

        server.stop();
    }

    #[test]
    fn test_malformed_datagrams_counted_and_dropped() {
        let mut server = BroadcastServer::new(test_config());
        let events = server.start().unwrap();
        let target = server_target(&server);

        let peer = peer_socket();
        peer.send_to(b"definitely not a packet", target).unwrap();
        peer.send_to(&[0u8; 4], target).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while server.stats().invalid_packets < 2 {
            assert!(Instant::now() < deadline, "invalid datagrams not counted");
            thread::sleep(Duration::from_millis(5));
        }

        // Garbage never enrolls a peer or produces events
        assert_eq!(server.client_count(), 0);
        assert!(events.try_recv().is_err());

        server.stop();
    }

    #[test]
    fn test_silent_peer_is_swept_and_reported() {
        let mut server = BroadcastServer::new(test_config());
        let events = server.start().unwrap();
        let target = server_target(&server);

        let peer = peer_socket();
        register(&peer, target);
        wait_for_clients(&server, 1);

        let deadline = Instant::now() + Duration::from_secs(3);
        while server.client_count() > 0 {
            assert!(Instant::now() < deadline, "peer never evicted");
            thread::sleep(Duration::from_millis(20));
        }

        let left = events
            .iter()
            .find(|e| matches!(e, NetworkEvent::PeerLeft(_)));
        assert!(left.is_some());

        server.stop();
    }

    #[test]
    fn test_stop_is_idempotent_and_prompt() {
        let mut server = BroadcastServer::new(test_config());
        let _events = server.start().unwrap();
        assert!(server.is_running());

        let started = Instant::now();
        server.stop();
        // Bounded by roughly one receive timeout plus one sweep slice
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!server.is_running());

        server.stop();
        assert!(server.broadcast(Bytes::from_static(&[1])).is_err());
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut server = BroadcastServer::new(test_config());
        let _events = server.start().unwrap();
        assert!(matches!(server.start(), Err(NetworkError::AlreadyRunning)));
        server.stop();
    }

    #[test]
    fn test_broadcast_rejects_oversized_chunk() {
        let mut server = BroadcastServer::new(test_config());
        let _events = server.start().unwrap();
        let result = server.broadcast(Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]));
        assert!(matches!(result, Err(NetworkError::SendFailed(_))));
        server.stop();
    }
}
