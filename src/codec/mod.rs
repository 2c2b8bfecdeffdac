//! Opus codec wrapper
//!
//! Provides the frame encoder used by the remote voice transport.

pub mod encoder;

pub use encoder::{EncoderStats, FrameEncoder, OpusEncoder};
