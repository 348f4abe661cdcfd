//! Jitter buffer and playback scheduler
//!
//! Turns the unordered, lossy packet stream into a steady byte stream for
//! the audio output. Admission reorders and de-duplicates by sequence
//! number, counts gaps as loss, and bounds occupancy by evicting the oldest
//! packets. Draining is driven by an external pacing loop calling
//! [`PlaybackBuffer::next_chunk`] at the device's cadence; playback only
//! starts once a pre-roll threshold of audio has accumulated.
//!
//! The buffer is touched by the receive path (writer) and the pacing loop
//! (reader); one mutex scopes tightly around buffer mutation. Occupancy and
//! level are additionally published through atomics so UI/observability
//! readers never contend with either loop.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::config::{AudioFormat, JitterConfig};
use crate::constants::MAX_PAYLOAD_SIZE;
use crate::protocol::{now_millis, seq_distance, seq_newer, AudioPacket};

/// Per-stream playback state machine
///
/// There is no Paused state at this layer; pause/resume is an upstream
/// concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Nothing buffered, nothing played
    Idle,
    /// Accumulating pre-roll, pulls return empty
    Buffering,
    /// Pre-roll met, draining normally
    Playing,
}

/// Leftover bytes of a packet that did not fully fit into one pull
struct Remainder {
    bytes: Bytes,
    timestamp: u64,
}

struct Inner {
    /// Ascending by sequence: admission only accepts strictly newer
    /// sequences, so pushing at the tail keeps the order
    queue: VecDeque<AudioPacket>,
    remainder: Option<Remainder>,
    /// Highest sequence accepted so far; unset until the first packet
    last_accepted: Option<u32>,
    /// Timestamp of the first packet accepted into an empty buffer
    base_timestamp: Option<u64>,
    /// Total undrained payload bytes, including the remainder
    buffered_bytes: u64,
    /// Running totals for the average-packet-size estimate
    accepted_packets: u64,
    accepted_bytes: u64,
    state: BufferState,
    has_played: bool,
}

impl Inner {
    fn occupancy_cap(&self, format: &AudioFormat, config: &JitterConfig) -> usize {
        let avg_payload = if self.accepted_packets > 0 {
            (self.accepted_bytes / self.accepted_packets).max(1)
        } else {
            1
        };
        let max_bytes = config.max_buffer_ms * format.bytes_per_ms();
        ((max_bytes / avg_payload) as usize).max(1)
    }
}

/// Point-in-time diagnostics
#[derive(Debug, Clone)]
pub struct BufferStats {
    /// Packets fully drained into the output
    pub packets_played: u64,
    /// Loss due to sequence gaps plus loss due to overflow eviction
    pub packets_dropped: u64,
    /// Stale/duplicate packets rejected at admission
    pub packets_late: u64,
    /// Current occupancy in milliseconds of audio
    pub buffered_ms: u64,
    /// Occupancy normalized against the target duration, clamped to 0..=1
    pub buffer_level: f32,
    /// `now - timestamp of the next packet about to play`, if any
    pub latency_ms: Option<u64>,
    /// Anchor timestamp of the current fill, if any
    pub base_timestamp: Option<u64>,
    pub state: BufferState,
}

/// Reordering and pacing buffer between the receive path and audio output
pub struct PlaybackBuffer {
    format: AudioFormat,
    config: JitterConfig,
    inner: Mutex<Inner>,
    // Published observables, safe to read from any thread without blocking
    // the receive or pacing loops
    buffered_ms: AtomicU64,
    buffer_level_bits: AtomicU32,
    packets_played: AtomicU64,
    packets_dropped: AtomicU64,
    packets_late: AtomicU64,
}

impl PlaybackBuffer {
    pub fn new(format: AudioFormat, config: JitterConfig) -> Self {
        Self {
            format,
            config,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                remainder: None,
                last_accepted: None,
                base_timestamp: None,
                buffered_bytes: 0,
                accepted_packets: 0,
                accepted_bytes: 0,
                state: BufferState::Idle,
                has_played: false,
            }),
            buffered_ms: AtomicU64::new(0),
            buffer_level_bits: AtomicU32::new(0f32.to_bits()),
            packets_played: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            packets_late: AtomicU64::new(0),
        }
    }

    /// Admit one decoded packet
    ///
    /// Returns whether the packet was accepted. Stale and duplicate packets
    /// are rejected in favor of freshness; sequence gaps are counted as loss
    /// but never retransmitted.
    pub fn add_packet(&self, packet: AudioPacket) -> bool {
        if packet.payload.len() > MAX_PAYLOAD_SIZE {
            return false;
        }

        let mut inner = self.inner.lock();

        match inner.last_accepted {
            Some(last) if !seq_newer(packet.sequence, last) => {
                self.packets_late.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            Some(last) => {
                let gap = seq_distance(packet.sequence, last).saturating_sub(1);
                if gap > 0 {
                    self.packets_dropped.fetch_add(gap as u64, Ordering::Relaxed);
                    tracing::debug!(gap, sequence = packet.sequence, "sequence gap");
                }
            }
            None => {}
        }

        if inner.queue.is_empty() && inner.remainder.is_none() {
            inner.base_timestamp = Some(packet.timestamp);
            if inner.state == BufferState::Idle {
                inner.state = BufferState::Buffering;
            }
        }

        inner.last_accepted = Some(packet.sequence);
        inner.accepted_packets += 1;
        inner.accepted_bytes += packet.payload.len() as u64;
        inner.buffered_bytes += packet.payload.len() as u64;
        inner.queue.push_back(packet);

        // Bound worst-case latency: evict oldest while over the cap
        let cap = inner.occupancy_cap(&self.format, &self.config);
        while inner.queue.len() > cap {
            if let Some(evicted) = inner.queue.pop_front() {
                inner.buffered_bytes -= evicted.payload.len() as u64;
                self.packets_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(sequence = evicted.sequence, "evicted on overflow");
            }
        }

        self.republish(&inner);
        true
    }

    /// Pull up to `max_bytes` of contiguous audio for the output device
    ///
    /// Returns an empty result during pre-roll (buffered duration below the
    /// minimum-start threshold and nothing played yet) and on underrun. A
    /// packet that does not fully fit is split; its remainder is retained
    /// for the next pull.
    pub fn next_chunk(&self, max_bytes: usize) -> Bytes {
        let mut inner = self.inner.lock();

        if !inner.has_played {
            let buffered = self.format.bytes_to_ms(inner.buffered_bytes);
            if buffered < self.config.min_start_ms {
                return Bytes::new();
            }
        }

        let mut out = BytesMut::with_capacity(max_bytes);

        while out.len() < max_bytes {
            let space = max_bytes - out.len();

            if let Some(rem) = inner.remainder.take() {
                if rem.bytes.len() > space {
                    out.extend_from_slice(&rem.bytes[..space]);
                    inner.remainder = Some(Remainder {
                        bytes: rem.bytes.slice(space..),
                        timestamp: rem.timestamp,
                    });
                    inner.buffered_bytes -= space as u64;
                    break;
                }
                inner.buffered_bytes -= rem.bytes.len() as u64;
                out.extend_from_slice(&rem.bytes);
                self.packets_played.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let Some(packet) = inner.queue.pop_front() else {
                break;
            };

            if packet.payload.len() > space {
                out.extend_from_slice(&packet.payload[..space]);
                inner.remainder = Some(Remainder {
                    bytes: packet.payload.slice(space..),
                    timestamp: packet.timestamp,
                });
                inner.buffered_bytes -= space as u64;
                break;
            }

            inner.buffered_bytes -= packet.payload.len() as u64;
            out.extend_from_slice(&packet.payload);
            self.packets_played.fetch_add(1, Ordering::Relaxed);
        }

        if !out.is_empty() && !inner.has_played {
            inner.has_played = true;
            inner.state = BufferState::Playing;
            tracing::debug!("pre-roll met, playback started");
        }

        self.republish(&inner);
        out.freeze()
    }

    /// Reset to `Idle` at any time
    ///
    /// Cumulative play/drop/late totals persist for session diagnostics;
    /// everything else is cleared.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.remainder = None;
        inner.last_accepted = None;
        inner.base_timestamp = None;
        inner.buffered_bytes = 0;
        inner.accepted_packets = 0;
        inner.accepted_bytes = 0;
        inner.state = BufferState::Idle;
        inner.has_played = false;
        self.republish(&inner);
    }

    /// Current occupancy in milliseconds; lock-free
    pub fn buffered_ms(&self) -> u64 {
        self.buffered_ms.load(Ordering::Relaxed)
    }

    /// Occupancy against the target duration, 0..=1; lock-free
    pub fn buffer_level(&self) -> f32 {
        f32::from_bits(self.buffer_level_bits.load(Ordering::Relaxed))
    }

    pub fn state(&self) -> BufferState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.inner.lock();
        let next_timestamp = inner
            .remainder
            .as_ref()
            .map(|r| r.timestamp)
            .or_else(|| inner.queue.front().map(|p| p.timestamp));

        BufferStats {
            packets_played: self.packets_played.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            packets_late: self.packets_late.load(Ordering::Relaxed),
            buffered_ms: self.format.bytes_to_ms(inner.buffered_bytes),
            buffer_level: self.buffer_level(),
            latency_ms: next_timestamp.map(|ts| now_millis().saturating_sub(ts)),
            base_timestamp: inner.base_timestamp,
            state: inner.state,
        }
    }

    fn republish(&self, inner: &Inner) {
        let ms = self.format.bytes_to_ms(inner.buffered_bytes);
        let level = (ms as f32 / self.config.target_buffer_ms.max(1) as f32).clamp(0.0, 1.0);
        self.buffered_ms.store(ms, Ordering::Relaxed);
        self.buffer_level_bits.store(level.to_bits(), Ordering::Relaxed);
    }
}
