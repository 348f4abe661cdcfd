//! Capability interfaces for the platform audio devices
//!
//! Capture and output devices are external collaborators; the engine only
//! sees these two narrow traits plus the [`AudioFormat`](crate::config::AudioFormat)
//! contract. The concrete implementations here are the synthetic ones used
//! by the binaries and tests; real microphone/speaker backends plug in at
//! the same seam.

use std::f32::consts::TAU;

use crate::config::AudioFormat;

/// Source of raw PCM chunks (microphone, loopback capture, file, ...)
pub trait CaptureSource: Send {
    /// Fill `buf` with the next PCM bytes; returns the number written
    ///
    /// A return of 0 means no data is available right now, not end of
    /// stream.
    fn next_chunk(&mut self, buf: &mut [u8]) -> usize;

    fn format(&self) -> AudioFormat;
}

/// Destination for raw PCM chunks (speaker, virtual device, file, ...)
pub trait PlaybackSink: Send {
    fn write_chunk(&mut self, chunk: &[u8]);

    fn format(&self) -> AudioFormat;
}

/// Deterministic sine-wave source, 16-bit little-endian PCM
pub struct ToneSource {
    format: AudioFormat,
    frequency: f32,
    phase: f32,
}

impl ToneSource {
    pub fn new(format: AudioFormat, frequency: f32) -> Self {
        Self {
            format,
            frequency,
            phase: 0.0,
        }
    }
}

impl CaptureSource for ToneSource {
    fn next_chunk(&mut self, buf: &mut [u8]) -> usize {
        let channels = self.format.channel_count as usize;
        let frame_bytes = channels * 2;
        let frames = buf.len() / frame_bytes;
        let step = TAU * self.frequency / self.format.sample_rate as f32;

        for frame in 0..frames {
            let sample = (self.phase.sin() * 0.5 * i16::MAX as f32) as i16;
            self.phase = (self.phase + step) % TAU;
            let sample_bytes = sample.to_le_bytes();
            for channel in 0..channels {
                let offset = frame * frame_bytes + channel * 2;
                buf[offset..offset + 2].copy_from_slice(&sample_bytes);
            }
        }

        frames * frame_bytes
    }

    fn format(&self) -> AudioFormat {
        self.format
    }
}

/// Sink that discards audio while counting what it consumed
pub struct NullSink {
    format: AudioFormat,
    bytes_written: u64,
    chunks_written: u64,
}

impl NullSink {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            bytes_written: 0,
            chunks_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn chunks_written(&self) -> u64 {
        self.chunks_written
    }
}

impl PlaybackSink for NullSink {
    fn write_chunk(&mut self, chunk: &[u8]) {
        self.bytes_written += chunk.len() as u64;
        self.chunks_written += 1;
    }

    fn format(&self) -> AudioFormat {
        self.format
    }
}
