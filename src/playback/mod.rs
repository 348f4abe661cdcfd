//! Receiver-side playback subsystem

pub mod jitter;

pub use jitter::{BufferState, BufferStats, PlaybackBuffer};
