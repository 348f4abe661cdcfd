//! Configuration structures
//!
//! All knobs have working defaults; a TOML file can override any subset.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::*;
use crate::error::Error;

/// PCM format contract shared by capture, transport, and playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFormat {
    /// Samples per second per channel
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channel_count: u16,
    /// Bits per sample (16 = i16 little-endian PCM)
    pub bits_per_sample: u16,
    /// Preferred device buffer duration in milliseconds
    pub buffer_duration_ms: u64,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channel_count: DEFAULT_CHANNELS,
            bits_per_sample: DEFAULT_BITS_PER_SAMPLE,
            // 10 ms of mono 16-bit 44.1 kHz is 882 bytes, well under the
            // 1400-byte payload ceiling
            buffer_duration_ms: 10,
        }
    }
}

impl AudioFormat {
    /// PCM byte rate for this format
    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.channel_count as u64 * (self.bits_per_sample as u64 / 8)
    }

    /// PCM bytes per millisecond (at least 1 to keep divisions safe)
    pub fn bytes_per_ms(&self) -> u64 {
        (self.bytes_per_second() / 1000).max(1)
    }

    /// Byte length of a chunk spanning `ms` milliseconds
    pub fn chunk_bytes(&self, ms: u64) -> usize {
        (self.bytes_per_ms() * ms) as usize
    }

    /// Duration covered by `bytes` of PCM at this format
    pub fn bytes_to_ms(&self, bytes: u64) -> u64 {
        bytes / self.bytes_per_ms()
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// UDP port the server binds (clients bind an OS-assigned port)
    pub udp_port: u16,
    /// Socket receive timeout in milliseconds
    pub recv_timeout_ms: u64,
    /// Peer liveness timeout in milliseconds
    pub client_timeout_ms: u64,
    /// Membership sweep interval in milliseconds
    pub sweep_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            udp_port: DEFAULT_UDP_PORT,
            recv_timeout_ms: DEFAULT_RECV_TIMEOUT_MS,
            client_timeout_ms: DEFAULT_CLIENT_TIMEOUT_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl NetworkConfig {
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Jitter buffer configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterConfig {
    /// Maximum buffered audio in milliseconds before oldest-first eviction
    pub max_buffer_ms: u64,
    /// Occupancy at which the published buffer level reads 1.0
    pub target_buffer_ms: u64,
    /// Pre-roll threshold: playback starts once this much audio is buffered
    pub min_start_ms: u64,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            max_buffer_ms: DEFAULT_MAX_BUFFER_MS,
            target_buffer_ms: DEFAULT_TARGET_BUFFER_MS,
            min_start_ms: DEFAULT_MIN_START_MS,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioFormat,
    pub network: NetworkConfig,
    pub jitter: JitterConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// any missing fields
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format_byte_rate() {
        let format = AudioFormat::default();
        // 44100 Hz * 1 channel * 2 bytes
        assert_eq!(format.bytes_per_second(), 88_200);
        assert_eq!(format.bytes_per_ms(), 88);
        assert_eq!(format.chunk_bytes(20), 1760);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: AppConfig = toml::from_str(
            r#"
            [network]
            udp_port = 7000

            [jitter]
            target_buffer_ms = 150
            "#,
        )
        .unwrap();

        assert_eq!(config.network.udp_port, 7000);
        assert_eq!(config.jitter.target_buffer_ms, 150);
        // Untouched sections keep their defaults
        assert_eq!(config.audio.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(config.jitter.max_buffer_ms, DEFAULT_MAX_BUFFER_MS);
    }
}
