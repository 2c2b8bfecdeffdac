//! # Voice File Mixer
//!
//! Real-time multi-track file mixing with local playback or an encrypted,
//! paced voice transport.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                            MIXING THREAD                                     │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐                        │
//! │  │  song.flac  │   │  intro.mp3  │   │  loop.ogg   │   (tracks::Track)      │
//! │  └──────┬──────┘   └──────┬──────┘   └──────┬──────┘                        │
//! │         ▼                 ▼                 ▼                               │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐                        │
//! │  │ Decode +    │   │ Decode +    │   │ Decode +    │  (audio::decoder)      │
//! │  │ Resample    │   │ Resample    │   │ Resample    │                        │
//! │  └──────┬──────┘   └──────┬──────┘   └──────┬──────┘                        │
//! │         ▼                 ▼                 ▼                               │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐                        │
//! │  │DecodedAudio │   │DecodedAudio │   │DecodedAudio │  (audio::buffer)       │
//! │  │   Buffer    │   │   Buffer    │   │   Buffer    │                        │
//! │  └──────┬──────┘   └──────┬──────┘   └──────┬──────┘                        │
//! │         └────────────┬────┴─────────────────┘                               │
//! │                      ▼                                                      │
//! │        ┌───────────────────────────┐                                        │
//! │        │ MixingEngine: 480 pairs,  │  (mixer::engine)                       │
//! │        │ volume + clamp per cycle  │                                        │
//! │        └─────────────┬─────────────┘                                        │
//! └──────────────────────┼──────────────────────────────────────────────────────┘
//!                        ▼  PlaybackSink::accept
//!          ┌───────────────────────────┐
//!          │ HandoffBuffer (20 frames) │  (audio::handoff)
//!          └─────────────┬─────────────┘
//!             ┌──────────┴──────────┐
//!             ▼                     ▼
//!   ┌──────────────────┐  ┌──────────────────────────────────────────┐
//!   │ LocalOutput      │  │ RemoteVoiceTransport (send thread)       │
//!   │ (cpal callback)  │  │ Opus → header → XSalsa20Poly1305 → pace  │
//!   └──────────────────┘  └────────────────────┬─────────────────────┘
//!                                              ▼ UDP
//!                                       voice server
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod mixer;
pub mod network;
pub mod tracks;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate of everything downstream of the decoders
    pub const SAMPLE_RATE: u32 = 48000;

    /// Output channel count (stereo)
    pub const CHANNELS: u16 = 2;

    /// Stereo pairs per playback frame (10ms at 48kHz)
    pub const FRAME_SIZE: usize = 480;

    /// Interleaved samples per playback frame
    pub const FRAME_SAMPLES: usize = FRAME_SIZE * CHANNELS as usize;

    /// Real-time length of one playback frame
    pub const FRAME_DURATION: std::time::Duration =
        std::time::Duration::from_nanos(FRAME_SIZE as u64 * 1_000_000_000 / SAMPLE_RATE as u64);

    /// Default handoff buffer capacity (in playback frames)
    pub const HANDOFF_CAPACITY_FRAMES: usize = 20;

    /// Default Opus bitrate in bits per second
    pub const DEFAULT_BITRATE: u32 = 128_000;

    /// Maximum packet size for UDP
    pub const MAX_PACKET_SIZE: usize = 1472; // MTU - IP/UDP headers

    /// Opus payload the voice server treats as silence
    pub const SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

    /// Silence frames sent after the stream ends
    pub const SILENCE_FRAME_COUNT: usize = 5;
}
