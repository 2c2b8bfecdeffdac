//! Application configuration
//!
//! Read from a TOML file; every section and field falls back to its default,
//! so an empty file (or no file) is a valid configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub output: OutputConfig,
    pub mixer: MixerConfig,
    pub opus: OpusConfig,
    pub network: NetworkConfig,
}

impl AppConfig {
    /// Default config file location for this platform
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "voice-file-mixer").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, or from the platform location when `None`
    ///
    /// A missing file at the platform location yields the defaults; a missing
    /// file at an explicit path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => {
                    debug!("No config file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    /// Load and validate a TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mixer.handoff_frames == 0 {
            return Err(Error::Config("mixer.handoff_frames must be at least 1".into()));
        }
        if self.mixer.default_volume.is_nan() || self.mixer.default_volume < 0.0 {
            return Err(Error::Config("mixer.default_volume must be non-negative".into()));
        }
        self.opus.validate()
    }
}

/// Where the mixed stream goes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Local,
    Remote,
}

/// Output selection and local device settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub mode: OutputMode,
    /// Local output device name (None = system default)
    pub device: Option<String>,
    /// Local driver buffer size in frames (None = driver default)
    pub buffer_size: Option<u32>,
}

/// Mixing engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Volume given to tracks added without one
    pub default_volume: f32,
    /// Handoff buffer size in playback frames
    pub handoff_frames: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            default_volume: 1.0,
            handoff_frames: HANDOFF_CAPACITY_FRAMES,
        }
    }
}

/// Transport socket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Socket send buffer size in bytes
    pub send_buffer_size: usize,
    /// How long to wait for the address discovery response
    pub discovery_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            send_buffer_size: 256 * 1024,
            discovery_timeout_ms: 5000,
        }
    }
}

/// Opus encoder application mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpusApplication {
    Voip,
    Audio,
    LowDelay,
}

/// Opus encoder settings
///
/// The voice server expects 48kHz stereo in 10ms frames, so those fields are
/// fixed and only checked by `validate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpusConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel per frame
    pub frame_size: usize,
    pub bitrate: u32,
    pub vbr: bool,
    pub cvbr: bool,
    /// In-band forward error correction
    pub fec: bool,
    /// Expected packet loss, tunes FEC redundancy
    pub packet_loss_perc: u8,
    pub application: OpusApplication,
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self::music()
    }
}

impl OpusConfig {
    /// Settings for mixed music (the usual content of this mixer)
    pub fn music() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            frame_size: FRAME_SIZE,
            bitrate: DEFAULT_BITRATE,
            vbr: true,
            cvbr: true,
            fec: true,
            packet_loss_perc: 15,
            application: OpusApplication::Audio,
        }
    }

    /// Settings for speech-heavy content
    pub fn voice() -> Self {
        Self {
            bitrate: 64_000,
            application: OpusApplication::Voip,
            ..Self::music()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate != SAMPLE_RATE || self.channels != CHANNELS || self.frame_size != FRAME_SIZE {
            return Err(Error::Config(format!(
                "opus must run at {}Hz, {} channels, {} samples per frame (got {}Hz, {}, {})",
                SAMPLE_RATE, CHANNELS, FRAME_SIZE, self.sample_rate, self.channels, self.frame_size
            )));
        }
        if self.packet_loss_perc > 100 {
            return Err(Error::Config(format!(
                "opus.packet_loss_perc {} is above 100",
                self.packet_loss_perc
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_is_default() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.output.mode, OutputMode::Local);
        assert_eq!(config.mixer.handoff_frames, 20);
        assert_eq!(config.opus.frame_size, 480);
        assert_eq!(config.network.discovery_timeout_ms, 5000);
    }

    #[test]
    fn test_partial_sections() {
        let config = AppConfig::from_toml(
            r#"
            [output]
            mode = "remote"

            [opus]
            bitrate = 96000
            application = "voip"
            "#,
        )
        .unwrap();

        assert_eq!(config.output.mode, OutputMode::Remote);
        assert_eq!(config.opus.bitrate, 96_000);
        assert_eq!(config.opus.application, OpusApplication::Voip);
        assert!(config.opus.fec);
    }

    #[test]
    fn test_rejects_other_frame_sizes() {
        let result = AppConfig::from_toml("[opus]\nframe_size = 960\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_handoff() {
        let result = AppConfig::from_toml("[mixer]\nhandoff_frames = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/config.toml")));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
