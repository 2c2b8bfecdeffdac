//! A playing file: decoder, its buffer, and mix settings

use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::audio::buffer::DecodedAudioBuffer;
use crate::audio::decoder::{FileDecoder, TrackDecoder};
use crate::constants::FRAME_SIZE;
use crate::error::{AudioError, Result, TrackError};

/// Outcome of topping up a track's buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    /// At least one full frame is buffered
    Ready,
    /// The source ended; whatever is buffered is all that is left
    Exhausted,
}

/// One source in the mix, identified by its path
pub struct Track {
    path: PathBuf,
    volume: f32,
    looping: bool,
    decoder: Box<dyn TrackDecoder>,
    buffer: DecodedAudioBuffer,
    /// Stereo pairs decoded since open or the last rewind
    decoded_since_rewind: u64,
}

impl Track {
    /// Open a media file for playback
    pub fn open(path: impl AsRef<Path>, volume: f32, looping: bool) -> Result<Self> {
        let path = path.as_ref();
        validate_volume(volume)?;
        let decoder = FileDecoder::open(path)?;
        Ok(Self::with_decoder(path, Box::new(decoder), volume, looping)?)
    }

    /// Wrap an already opened decoder
    pub fn with_decoder(
        path: impl Into<PathBuf>,
        decoder: Box<dyn TrackDecoder>,
        volume: f32,
        looping: bool,
    ) -> std::result::Result<Self, TrackError> {
        validate_volume(volume)?;
        let path = path.into();
        let capacity = DecodedAudioBuffer::capacity_for(decoder.max_chunk_frames());
        debug!("Track {}: buffer of {} pairs", path.display(), capacity);

        Ok(Self {
            path,
            volume,
            looping,
            decoder,
            buffer: DecodedAudioBuffer::new(capacity),
            decoded_since_rewind: 0,
        })
    }

    /// Decode until a full frame is buffered or the source runs out
    pub fn fill(&mut self) -> std::result::Result<FillStatus, AudioError> {
        while self.buffer.available() < FRAME_SIZE {
            match self.decoder.decode_next()? {
                Some(chunk) => {
                    self.buffer.write(chunk.left, chunk.right);
                    self.decoded_since_rewind += chunk.len() as u64;
                }
                None => {
                    trace!("Track {} exhausted", self.path.display());
                    return Ok(FillStatus::Exhausted);
                }
            }
        }
        Ok(FillStatus::Ready)
    }

    /// Mix up to one frame into `dest`, returning the pairs written
    pub fn read_into(&mut self, dest: &mut [f32], accumulate: bool) -> usize {
        let pairs = self.buffer.available().min(FRAME_SIZE);
        self.buffer.read(dest, pairs, self.volume, accumulate);
        pairs
    }

    /// Restart from the beginning of the source
    pub fn rewind(&mut self) -> std::result::Result<(), AudioError> {
        self.decoder.rewind()?;
        self.buffer.reset();
        self.decoded_since_rewind = 0;
        Ok(())
    }

    /// Whether the source produced anything since it was last (re)started
    pub fn has_produced_audio(&self) -> bool {
        self.decoded_since_rewind > 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) -> std::result::Result<(), TrackError> {
        validate_volume(volume)?;
        self.volume = volume;
        Ok(())
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Stereo pairs waiting in the buffer
    pub fn buffered(&self) -> usize {
        self.buffer.available()
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("path", &self.path)
            .field("volume", &self.volume)
            .field("looping", &self.looping)
            .field("buffered", &self.buffer.available())
            .finish()
    }
}

pub(crate) fn validate_volume(volume: f32) -> std::result::Result<(), TrackError> {
    if volume.is_finite() && volume >= 0.0 {
        Ok(())
    } else {
        Err(TrackError::InvalidVolume(volume))
    }
}
