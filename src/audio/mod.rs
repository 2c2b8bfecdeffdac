//! Audio subsystem module

pub mod buffer;
pub mod decoder;
pub mod device;
pub mod handoff;
pub mod output;
pub mod sink;

pub use buffer::DecodedAudioBuffer;
pub use decoder::{FileDecoder, StereoChunk, TrackDecoder};
pub use device::{get_output_device, list_output_devices, OutputDeviceInfo};
pub use handoff::{HandoffBuffer, SharedHandoffBuffer};
pub use output::LocalOutput;
pub use sink::PlaybackSink;
