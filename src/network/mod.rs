//! Network subsystem for UDP audio transport
//!
//! The server role fans each packet out to every live member of the
//! [`ClientTable`]; the client role talks to one fixed host. Both roles run
//! a timeout-bounded receive loop that decodes datagrams and pushes
//! [`NetworkEvent`]s into a bounded delivery channel.

pub mod client;
pub mod clients;
pub mod server;
pub mod udp;

pub use client::{ClientStats, StreamClient};
pub use clients::{ClientSession, ClientTable};
pub use server::{BroadcastServer, ServerStats};
pub use udp::create_socket;

use std::net::SocketAddr;

use crate::protocol::AudioPacket;

/// Push notifications delivered upward from the transport
///
/// Carried over a bounded crossbeam channel; when the consumer lags and the
/// channel fills up, events are dropped and counted rather than blocking the
/// receive loop.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A validated packet arrived from `from`
    Packet {
        from: SocketAddr,
        packet: AudioPacket,
    },
    /// First sighting of a peer
    PeerJoined(SocketAddr),
    /// A peer went silent past the liveness timeout
    PeerLeft(SocketAddr),
}
