//! Audio packet encoding, decoding, and integrity checking
//!
//! One packet per UDP datagram, fixed 20-byte header, big-endian fields:
//!
//! ```text
//! offset  size  field
//! 0       4     sequence number (u32)
//! 4       8     capture timestamp (u64, ms, sender clock)
//! 12      4     payload length (i32, 0..=1400)
//! 16      4     checksum (CRC-32/ISO-HDLC over seq + timestamp + payload)
//! 20      N     raw PCM payload
//! ```
//!
//! Decoding is a pure function over the input bytes and never panics; any
//! malformed datagram yields a [`PacketError`] the receive loops count and
//! drop.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::{HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::PacketError;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// One unit of audio transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    /// Per-sender monotonically increasing counter, wraps modulo 2^32
    pub sequence: u32,
    /// Capture time in milliseconds on the sender's clock
    pub timestamp: u64,
    /// Raw PCM bytes, at most [`MAX_PAYLOAD_SIZE`]
    pub payload: Bytes,
}

impl AudioPacket {
    pub fn new(sequence: u32, timestamp: u64, payload: Bytes) -> Self {
        Self {
            sequence,
            timestamp,
            payload,
        }
    }

    /// Serialize into wire format
    ///
    /// Fails with [`PacketError::PayloadTooLarge`] rather than truncating an
    /// oversized payload.
    pub fn encode(&self) -> Result<Bytes, PacketError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(PacketError::PayloadTooLarge(self.payload.len()));
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u32(self.sequence);
        buf.put_u64(self.timestamp);
        buf.put_i32(self.payload.len() as i32);
        buf.put_u32(checksum(self.sequence, self.timestamp, &self.payload));
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Parse and validate one datagram
    ///
    /// Bytes beyond the declared payload length are ignored. All failure
    /// modes are reported as errors, never panics.
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < HEADER_SIZE {
            return Err(PacketError::TooShort(data.len()));
        }

        let mut header = &data[..HEADER_SIZE];
        let sequence = header.get_u32();
        let timestamp = header.get_u64();
        let declared_len = header.get_i32();
        let embedded_checksum = header.get_u32();

        if declared_len < 0 || declared_len as usize > MAX_PAYLOAD_SIZE {
            return Err(PacketError::InvalidPayloadLength(declared_len));
        }

        let payload_len = declared_len as usize;
        if data.len() < HEADER_SIZE + payload_len {
            return Err(PacketError::TooShort(data.len()));
        }

        let payload = &data[HEADER_SIZE..HEADER_SIZE + payload_len];
        let computed = checksum(sequence, timestamp, payload);
        if computed != embedded_checksum {
            return Err(PacketError::ChecksumMismatch {
                expected: computed,
                actual: embedded_checksum,
            });
        }

        Ok(Self {
            sequence,
            timestamp,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// Total encoded size in bytes
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// CRC-32 over the big-endian encodings of `sequence` and `timestamp`
/// followed by the payload bytes
///
/// The payload-length and checksum header fields are excluded from the input.
pub fn checksum(sequence: u32, timestamp: u64, payload: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(&sequence.to_be_bytes());
    digest.update(&timestamp.to_be_bytes());
    digest.update(payload);
    digest.finalize()
}

/// Wraparound-safe "is `a` newer than `b`" for 32-bit sequence numbers
///
/// Modular arithmetic as in RTP: `a` is newer when the forward distance from
/// `b` to `a` is in `1..2^31`.
pub fn seq_newer(a: u32, b: u32) -> bool {
    let diff = a.wrapping_sub(b);
    diff != 0 && diff < 1 << 31
}

/// Forward distance from `older` to `newer`, modulo 2^32
pub fn seq_distance(newer: u32, older: u32) -> u32 {
    newer.wrapping_sub(older)
}

/// Milliseconds since the Unix epoch on the local clock
///
/// The protocol only requires an arbitrary, fixed sender epoch; latency
/// estimates across machines assume their clocks are roughly aligned.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn packet(seq: u32, payload: &[u8]) -> AudioPacket {
        AudioPacket::new(seq, 123_456_789, Bytes::copy_from_slice(payload))
    }

    #[test]
    fn test_round_trip() {
        let original = packet(42, &[1, 2, 3, 4, 5]);
        let encoded = original.encode().unwrap();
        assert_eq!(encoded.len(), HEADER_SIZE + 5);

        let decoded = AudioPacket::decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_round_trip_empty_payload() {
        let original = packet(0, &[]);
        let encoded = original.encode().unwrap();
        assert_eq!(encoded.len(), HEADER_SIZE);
        assert_eq!(AudioPacket::decode(&encoded).unwrap(), original);
    }

    #[test]
    fn test_header_layout_is_big_endian() {
        let encoded = AudioPacket::new(0x01020304, 0x1112131415161718, Bytes::from_static(b"ab"))
            .encode()
            .unwrap();

        assert_eq!(&encoded[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(
            &encoded[4..12],
            &[0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18]
        );
        assert_eq!(&encoded[12..16], &[0, 0, 0, 2]);
        assert_eq!(&encoded[20..], b"ab");
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let too_big = AudioPacket::new(1, 0, Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]));
        assert_eq!(
            too_big.encode(),
            Err(PacketError::PayloadTooLarge(MAX_PAYLOAD_SIZE + 1))
        );

        let at_limit = AudioPacket::new(1, 0, Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE]));
        assert!(at_limit.encode().is_ok());
    }

    #[test]
    fn test_every_truncation_is_rejected() {
        let encoded = packet(7, &[9u8; 32]).encode().unwrap();
        for len in 0..encoded.len() {
            assert!(
                AudioPacket::decode(&encoded[..len]).is_err(),
                "prefix of {} bytes decoded",
                len
            );
        }
    }

    #[test]
    fn test_single_bit_flip_is_detected() {
        let encoded = packet(1234, &[7u8; 64]).encode().unwrap();

        for byte in 0..encoded.len() {
            for bit in 0..8 {
                let mut corrupted = encoded.to_vec();
                corrupted[byte] ^= 1 << bit;
                assert!(
                    AudioPacket::decode(&corrupted).is_err(),
                    "flip at byte {} bit {} went undetected",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_oversized_declared_length_rejected() {
        let mut bad = BytesMut::new();
        bad.put_u32(1);
        bad.put_u64(0);
        bad.put_i32(MAX_PAYLOAD_SIZE as i32 + 1);
        bad.put_u32(0);
        bad.put_slice(&vec![0u8; 2000]);
        assert_eq!(
            AudioPacket::decode(&bad),
            Err(PacketError::InvalidPayloadLength(MAX_PAYLOAD_SIZE as i32 + 1))
        );
    }

    #[test]
    fn test_negative_declared_length_rejected() {
        let mut bad = BytesMut::new();
        bad.put_u32(1);
        bad.put_u64(0);
        bad.put_i32(-1);
        bad.put_u32(0);
        assert_eq!(
            AudioPacket::decode(&bad),
            Err(PacketError::InvalidPayloadLength(-1))
        );
    }

    #[test]
    fn test_trailing_padding_ignored() {
        let original = packet(5, &[1, 2, 3]);
        let mut padded = original.encode().unwrap().to_vec();
        padded.extend_from_slice(&[0xAA; 16]);
        assert_eq!(AudioPacket::decode(&padded).unwrap(), original);
    }

    #[test]
    fn test_seq_newer_handles_wraparound() {
        assert!(seq_newer(1, 0));
        assert!(!seq_newer(0, 1));
        assert!(!seq_newer(5, 5));
        // Across the wrap point
        assert!(seq_newer(0, u32::MAX));
        assert!(seq_newer(3, u32::MAX - 2));
        assert!(!seq_newer(u32::MAX, 0));
        assert_eq!(seq_distance(2, u32::MAX), 3);
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let _ = AudioPacket::decode(&data);
        }

        #[test]
        fn prop_round_trip(
            seq in any::<u32>(),
            ts in any::<u64>(),
            payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD_SIZE),
        ) {
            let original = AudioPacket::new(seq, ts, Bytes::from(payload));
            let decoded = AudioPacket::decode(&original.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, original);
        }
    }
}
