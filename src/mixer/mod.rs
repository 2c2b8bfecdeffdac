//! Mixing engine and its control handle

pub mod engine;
pub mod handle;

pub use engine::MixingEngine;
pub use handle::{MixerHandle, TrackInfo};
