//! Output capability the mixing engine drives

use crate::error::{AudioError, Result};

/// Destination for mixed playback frames
///
/// Implemented by the local speaker output and the remote voice transport.
/// All methods are called from the mixing thread.
pub trait PlaybackSink: Send {
    /// Begin consuming frames; called when the first track becomes active
    fn start(&mut self) -> Result<()>;

    /// Stop consuming frames; called when the last track is removed
    fn stop(&mut self);

    /// Hand over one complete interleaved frame, blocking while the sink is full
    ///
    /// Returns [`AudioError::SinkStopped`] if the sink is shutting down.
    fn accept(&mut self, frame: &[f32]) -> std::result::Result<(), AudioError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

impl<S: PlaybackSink + ?Sized> PlaybackSink for Box<S> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) {
        (**self).stop()
    }

    fn accept(&mut self, frame: &[f32]) -> std::result::Result<(), AudioError> {
        (**self).accept(frame)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
