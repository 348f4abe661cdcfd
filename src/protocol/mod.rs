//! Wire protocol for audio datagrams

pub mod packet;

pub use packet::{now_millis, seq_distance, seq_newer, AudioPacket};
