//! # LAN Audio Cast
//!
//! Low-latency one-to-many audio broadcast over a local network.
//!
//! One device (the host) captures or plays audio, chops it into checksummed
//! UDP packets, and fans each packet out to every enrolled peer. Each peer
//! reassembles the stream through an adaptive jitter buffer so playback stays
//! in near-lockstep without underruns.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── HOST ────────────────────────────┐
//! │  ┌────────────────┐      ┌──────────────────────────────┐    │
//! │  │ Capture source │─────▶│ BroadcastServer              │    │
//! │  │ (PCM chunks)   │      │  seq counter · ClientTable   │    │
//! │  └────────────────┘      │  [seq|ts|len|crc|payload]    │    │
//! │                          └───────┬──────────┬───────────┘    │
//! └──────────────────────────────────┼──────────┼────────────────┘
//!                            UDP     │          │     UDP
//!                ┌───────────────────┘          └──────────────────┐
//!                ▼                                                 ▼
//! ┌────────── PEER A ──────────────┐   ┌────────── PEER B ──────────────┐
//! │ StreamClient (receive loop)    │   │ StreamClient (receive loop)    │
//! │        │ decoded packets       │   │        │ decoded packets       │
//! │        ▼                       │   │        ▼                       │
//! │ PlaybackBuffer (jitter buffer) │   │ PlaybackBuffer (jitter buffer) │
//! │  reorder · pre-roll · evict    │   │  reorder · pre-roll · evict    │
//! │        │ paced chunks          │   │        │ paced chunks          │
//! │        ▼                       │   │        ▼                       │
//! │ Playback sink (audio device)   │   │ Playback sink (audio device)   │
//! └────────────────────────────────┘   └────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod playback;
pub mod protocol;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default bit depth
    pub const DEFAULT_BITS_PER_SAMPLE: u16 = 16;

    /// Default UDP port for audio streaming
    pub const DEFAULT_UDP_PORT: u16 = 5500;

    /// Fixed wire-header size in bytes
    pub const HEADER_SIZE: usize = 20;

    /// Maximum payload bytes per packet (fits under typical MTU with header room)
    pub const MAX_PAYLOAD_SIZE: usize = 1400;

    /// Maximum total packet size (header + payload)
    pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

    /// Default peer liveness timeout in milliseconds
    pub const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 5_000;

    /// Default membership sweep interval in milliseconds
    pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 10_000;

    /// Socket receive timeout, bounds shutdown latency of the receive loops
    pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 250;

    /// Default maximum buffered audio before eviction kicks in
    pub const DEFAULT_MAX_BUFFER_MS: u64 = 300;

    /// Default target buffer occupancy (buffer level 1.0)
    pub const DEFAULT_TARGET_BUFFER_MS: u64 = 100;

    /// Default pre-roll threshold before playback may start
    pub const DEFAULT_MIN_START_MS: u64 = 50;

    /// Capacity of the decoded-packet delivery channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 4096;
}
