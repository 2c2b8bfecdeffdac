//! Opus encoder wrapper
//!
//! Compresses one 10ms 48kHz stereo playback frame at a time, writing
//! straight into the caller's packet buffer.

use opus::{Application, Channels, Encoder};

use crate::config::{OpusApplication, OpusConfig};
use crate::constants::FRAME_SAMPLES;
use crate::error::CodecError;

/// Compresses one playback frame into a byte block
pub trait FrameEncoder: Send {
    /// Encode `pcm` (exactly one interleaved frame) into `out`, returning
    /// the number of bytes written
    fn encode_frame(&mut self, pcm: &[f32], out: &mut [u8]) -> Result<usize, CodecError>;

    /// Running totals, for encoders that keep them
    fn stats(&self) -> Option<EncoderStats> {
        None
    }
}

/// Opus encoder wrapper with the configured settings applied
pub struct OpusEncoder {
    encoder: Encoder,
    config: OpusConfig,
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
}

impl OpusEncoder {
    /// Create a new Opus encoder with the specified configuration
    pub fn new(config: OpusConfig) -> Result<Self, CodecError> {
        config
            .validate()
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        let channels = match config.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => {
                return Err(CodecError::EncoderInit(format!(
                    "Unsupported channel count: {}",
                    config.channels
                )))
            }
        };

        let application = match config.application {
            OpusApplication::Voip => Application::Voip,
            OpusApplication::Audio => Application::Audio,
            OpusApplication::LowDelay => Application::LowDelay,
        };

        let mut encoder = Encoder::new(config.sample_rate, channels, application)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        Self::configure_encoder(&mut encoder, &config)?;

        Ok(Self {
            encoder,
            config,
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    /// Create encoder optimized for music
    pub fn music() -> Result<Self, CodecError> {
        Self::new(OpusConfig::music())
    }

    /// Configure the encoder with all settings
    fn configure_encoder(encoder: &mut Encoder, config: &OpusConfig) -> Result<(), CodecError> {
        encoder
            .set_bitrate(opus::Bitrate::Bits(config.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        encoder
            .set_vbr(config.vbr)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set VBR: {}", e)))?;

        if config.vbr && config.cvbr {
            encoder
                .set_vbr_constraint(true)
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set CVBR: {}", e)))?;
        }

        encoder
            .set_inband_fec(config.fec)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set FEC: {}", e)))?;

        if config.fec {
            encoder
                .set_packet_loss_perc(config.packet_loss_perc as i32)
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set packet loss: {}", e)))?;
        }

        Ok(())
    }

    /// Get current configuration
    pub fn config(&self) -> &OpusConfig {
        &self.config
    }
}

impl FrameEncoder for OpusEncoder {
    fn encode_frame(&mut self, pcm: &[f32], out: &mut [u8]) -> Result<usize, CodecError> {
        if pcm.len() != FRAME_SAMPLES {
            return Err(CodecError::InvalidFrameSize(pcm.len()));
        }

        let size = self
            .encoder
            .encode_float(pcm, out)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(size)
    }

    fn stats(&self) -> Option<EncoderStats> {
        Some(EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        })
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_creation() {
        let encoder = OpusEncoder::music().unwrap();
        assert_eq!(encoder.config().sample_rate, 48000);
        assert_eq!(encoder.config().channels, 2);
        assert_eq!(encoder.config().frame_size, 480);
    }

    #[test]
    fn test_encoding() {
        let mut encoder = OpusEncoder::music().unwrap();

        let samples: Vec<f32> = (0..FRAME_SAMPLES)
            .map(|i| ((i / 2) as f32 / 48000.0 * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5)
            .collect();
        let mut out = [0u8; 4000];

        let size = encoder.encode_frame(&samples, &mut out).unwrap();
        assert!(size > 0);
        assert!(size < FRAME_SAMPLES * 4); // Should be compressed

        let stats = encoder.stats().unwrap();
        assert_eq!(stats.frames_encoded, 1);
        assert_eq!(stats.bytes_produced, size as u64);
    }

    #[test]
    fn test_rejects_wrong_frame_size() {
        let mut encoder = OpusEncoder::music().unwrap();
        let mut out = [0u8; 4000];

        let result = encoder.encode_frame(&[0.0; 960 * 2], &mut out);
        assert!(matches!(result, Err(CodecError::InvalidFrameSize(1920))));
    }

    #[test]
    fn test_voice_profile() {
        let encoder = OpusEncoder::new(OpusConfig::voice());
        assert!(encoder.is_ok());
    }
}
