//! Error types for the mixer and its outputs

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Track error: {0}")]
    Track(#[from] TrackError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Failed to open source {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Resampling failed: {0}")]
    ResampleFailed(String),

    #[error("Output sink is stopping")]
    SinkStopped,
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Address discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("Secret key has not been installed")]
    MissingSecretKey,

    #[error("Secret key already installed")]
    SecretKeyAlreadySet,

    #[error("Invalid secret key length: {0} bytes")]
    InvalidSecretKey(usize),

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Timeout")]
    Timeout,
}

/// Track management errors
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("Track not found: {0}")]
    NotFound(String),

    #[error("Track already active: {0}")]
    AlreadyExists(String),

    #[error("Invalid volume: {0}")]
    InvalidVolume(f32),

    #[error("Mixing engine is not running")]
    EngineStopped,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
