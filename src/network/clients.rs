//! Client membership table
//!
//! Answers "who should receive this broadcast" and detects dropped peers.
//! Sessions are exclusively owned by the table; the transport only ever sees
//! copied snapshots, so no lock is held while datagrams are in flight.
//!
//! Enrollment is implicit: any valid datagram from a new address creates a
//! session. That policy lives entirely behind [`ClientTable::register_or_touch`],
//! so authentication could be added later without touching the receive loop.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::protocol::AudioPacket;

/// One remote peer known to a broadcasting sender
#[derive(Debug, Clone)]
pub struct ClientSession {
    /// Stable identity key
    pub addr: SocketAddr,
    /// Last time a packet arrived from, or was sent to, this peer
    pub last_seen: Instant,
    /// Packets sent to this peer
    pub packets_sent: u64,
    /// Packets received from this peer
    pub packets_received: u64,
    /// Highest sequence number observed from this peer
    pub last_sequence: Option<u32>,
    /// Last capture timestamp observed from this peer
    pub last_timestamp: u64,
}

impl ClientSession {
    fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            last_seen: Instant::now(),
            packets_sent: 0,
            packets_received: 0,
            last_sequence: None,
            last_timestamp: 0,
        }
    }
}

/// Thread-safe membership table
///
/// Mutated from both the receive loop and the sweep timer; a single
/// exclusive lock is held only for the duration of a table mutation.
#[derive(Default)]
pub struct ClientTable {
    sessions: Mutex<HashMap<SocketAddr, ClientSession>>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new session or refresh an existing one
    ///
    /// Returns `true` on first sighting so the caller can emit a
    /// peer-joined notification.
    pub fn register_or_touch(&self, addr: SocketAddr) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(&addr) {
            Some(session) => {
                session.last_seen = Instant::now();
                false
            }
            None => {
                sessions.insert(addr, ClientSession::new(addr));
                true
            }
        }
    }

    /// Count one successful send toward a peer and refresh its liveness
    pub fn record_sent(&self, addr: SocketAddr) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(&addr) {
            session.packets_sent += 1;
            session.last_seen = Instant::now();
        }
    }

    /// Record a packet received from a peer
    pub fn record_received(&self, addr: SocketAddr, packet: &AudioPacket) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(&addr) {
            session.packets_received += 1;
            session.last_sequence = Some(packet.sequence);
            session.last_timestamp = packet.timestamp;
            session.last_seen = Instant::now();
        }
    }

    /// Point-in-time copy of all member addresses
    ///
    /// The copy lets broadcast iterate and send without holding the lock,
    /// and cannot be invalidated by concurrent mutation.
    pub fn snapshot(&self) -> Vec<SocketAddr> {
        self.sessions.lock().keys().copied().collect()
    }

    /// Remove and return every session silent for longer than `timeout`
    ///
    /// The caller emits a peer-left notification per returned address.
    pub fn sweep(&self, timeout: Duration) -> Vec<SocketAddr> {
        let mut sessions = self.sessions.lock();
        let expired: Vec<SocketAddr> = sessions
            .values()
            .filter(|s| s.last_seen.elapsed() > timeout)
            .map(|s| s.addr)
            .collect();
        for addr in &expired {
            sessions.remove(addr);
        }
        expired
    }

    /// Number of live members
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn contains(&self, addr: SocketAddr) -> bool {
        self.sessions.lock().contains_key(&addr)
    }

    /// Cloned snapshot of one session, for diagnostics
    pub fn session(&self, addr: SocketAddr) -> Option<ClientSession> {
        self.sessions.lock().get(&addr).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_first_sighting_then_touch() {
        let table = ClientTable::new();
        assert!(table.register_or_touch(addr(9001)));
        assert!(!table.register_or_touch(addr(9001)));
        assert!(table.register_or_touch(addr(9002)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_counters_and_last_observed() {
        let table = ClientTable::new();
        table.register_or_touch(addr(9001));

        let packet = AudioPacket::new(17, 555, Bytes::from_static(&[1, 2]));
        table.record_received(addr(9001), &packet);
        table.record_sent(addr(9001));
        table.record_sent(addr(9001));

        let session = table.session(addr(9001)).unwrap();
        assert_eq!(session.packets_received, 1);
        assert_eq!(session.packets_sent, 2);
        assert_eq!(session.last_sequence, Some(17));
        assert_eq!(session.last_timestamp, 555);
    }

    #[test]
    fn test_counters_ignore_unknown_peer() {
        let table = ClientTable::new();
        table.record_sent(addr(9009));
        assert!(table.is_empty());
    }

    #[test]
    fn test_sweep_evicts_silent_peers() {
        let table = ClientTable::new();
        table.register_or_touch(addr(9001));
        table.register_or_touch(addr(9002));

        std::thread::sleep(Duration::from_millis(30));
        // Keep 9002 alive
        table.register_or_touch(addr(9002));

        let evicted = table.sweep(Duration::from_millis(20));
        assert_eq!(evicted, vec![addr(9001)]);
        assert!(!table.contains(addr(9001)));
        assert_eq!(table.snapshot(), vec![addr(9002)]);
    }

    #[test]
    fn test_sweep_on_fresh_table_evicts_nothing() {
        let table = ClientTable::new();
        table.register_or_touch(addr(9001));
        assert!(table.sweep(Duration::from_secs(5)).is_empty());
        assert_eq!(table.len(), 1);
    }
}
