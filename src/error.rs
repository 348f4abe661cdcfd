//! Error types for the audio broadcast engine

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire-format errors
///
/// Everything in here is raised at the codec boundary and absorbed there:
/// a malformed datagram is counted and dropped, never escalated past the
/// receive loop.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("Input too short: {0} bytes")]
    TooShort(usize),

    #[error("Declared payload length invalid: {0}")]
    InvalidPayloadLength(i32),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

/// Network transport errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Transport already running")]
    AlreadyRunning,

    #[error("Transport not running")]
    NotRunning,
}

/// Playback buffer errors
#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Invalid buffer configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
