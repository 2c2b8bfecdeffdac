//! File decoding using symphonia, resampled to 48kHz stereo with rubato
//!
//! A track's decoder yields planar stereo chunks of bounded size so that the
//! track's `DecodedAudioBuffer` can be sized once at open time.

use std::fs::File;
use std::path::{Path, PathBuf};

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, trace, warn};

use crate::constants::SAMPLE_RATE;
use crate::error::AudioError;

/// Source frames fed to the resampler per chunk
pub const DECODE_CHUNK_FRAMES: usize = 1024;

/// Corrupt packets tolerated in a row before the track is considered broken
const MAX_CONSECUTIVE_DECODE_ERRORS: usize = 16;

/// One decode unit of planar stereo samples at 48kHz
#[derive(Debug, Clone, Copy)]
pub struct StereoChunk<'a> {
    pub left: &'a [f32],
    pub right: &'a [f32],
}

impl StereoChunk<'_> {
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

/// A per-track source of 48kHz stereo audio
///
/// Resources are released when the decoder is dropped.
pub trait TrackDecoder: Send {
    /// Decode the next chunk; `Ok(None)` once the source is exhausted
    fn decode_next(&mut self) -> Result<Option<StereoChunk<'_>>, AudioError>;

    /// Go back to the start of the source
    fn rewind(&mut self) -> Result<(), AudioError>;

    /// Upper bound on the length of any chunk returned by `decode_next`
    fn max_chunk_frames(&self) -> usize;
}

/// How source channels map onto the stereo output, decided at open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelMap {
    /// Duplicate the only channel to both sides
    Mono,
    /// Take the first two channels as left/right
    Stereo,
}

/// Reusable f32 conversion target for decoded packets
struct ConvertBuffer {
    samples: SampleBuffer<f32>,
    spec: SignalSpec,
    frames: usize,
}

/// Symphonia-backed decoder with optional rubato resampling
pub struct FileDecoder {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    source_rate: u32,
    channel_map: ChannelMap,
    resampler: Option<FastFixedIn<f32>>,
    convert_buffer: Option<ConvertBuffer>,
    pending_left: Vec<f32>,
    pending_right: Vec<f32>,
    out_left: Vec<f32>,
    out_right: Vec<f32>,
    end_of_stream: bool,
}

impl FileDecoder {
    /// Open a file and prepare it for decoding
    ///
    /// # Errors
    /// - File cannot be opened
    /// - Unknown container or codec
    /// - No sample rate in the stream parameters
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AudioError> {
        let path = path.as_ref().to_path_buf();
        let open_failed = |reason: String| AudioError::OpenFailed {
            path: path.display().to_string(),
            reason,
        };

        let file = File::open(&path).map_err(|e| open_failed(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let detected = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| AudioError::UnsupportedFormat(format!("{}: {}", path.display(), e)))?;
        let format = detected.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| open_failed("no audio track found".to_string()))?;

        let track_id = track.id;
        let params = track.codec_params.clone();

        let source_rate = params
            .sample_rate
            .ok_or_else(|| AudioError::UnsupportedFormat("sample rate not found".to_string()))?;

        // Streams without layout metadata are treated as stereo for their lifetime
        let channel_map = match params.channels.map(|c| c.count()) {
            Some(1) => ChannelMap::Mono,
            Some(0) | None => {
                warn!("{}: no channel layout, assuming stereo", path.display());
                ChannelMap::Stereo
            }
            Some(_) => ChannelMap::Stereo,
        };

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| AudioError::UnsupportedFormat(format!("{}: {}", path.display(), e)))?;

        let resampler = if source_rate == SAMPLE_RATE {
            None
        } else {
            let resampler = FastFixedIn::<f32>::new(
                SAMPLE_RATE as f64 / source_rate as f64,
                1.0,
                PolynomialDegree::Septic,
                DECODE_CHUNK_FRAMES,
                2,
            )
            .map_err(|e| AudioError::ResampleFailed(e.to_string()))?;
            Some(resampler)
        };

        debug!(
            "Opened {}: {}Hz, {:?}, resampling={}",
            path.display(),
            source_rate,
            channel_map,
            resampler.is_some()
        );

        Ok(Self {
            path,
            format,
            decoder,
            track_id,
            source_rate,
            channel_map,
            resampler,
            convert_buffer: None,
            pending_left: Vec::with_capacity(DECODE_CHUNK_FRAMES * 2),
            pending_right: Vec::with_capacity(DECODE_CHUNK_FRAMES * 2),
            out_left: Vec::new(),
            out_right: Vec::new(),
            end_of_stream: false,
        })
    }

    /// Sample rate of the source before resampling
    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and decode packets until one lands in the pending buffers
    ///
    /// Returns `false` at end of stream.
    fn decode_packet(&mut self) -> Result<bool, AudioError> {
        let mut consecutive_errors = 0;

        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    trace!("{}: end of stream", self.path.display());
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    warn!("{}: stream reset required, ending track", self.path.display());
                    return Ok(false);
                }
                Err(e) => return Err(AudioError::DecodeFailed(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    Self::append_stereo(
                        decoded,
                        self.channel_map,
                        &mut self.convert_buffer,
                        &mut self.pending_left,
                        &mut self.pending_right,
                    );
                    return Ok(true);
                }
                Err(SymphoniaError::DecodeError(msg)) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_DECODE_ERRORS {
                        return Err(AudioError::DecodeFailed(msg.to_string()));
                    }
                    warn!("{}: skipping corrupt packet: {}", self.path.display(), msg);
                }
                Err(e) => return Err(AudioError::DecodeFailed(e.to_string())),
            }
        }
    }

    /// Convert a decoded packet to f32 and append it as stereo
    fn append_stereo(
        decoded: AudioBufferRef<'_>,
        channel_map: ChannelMap,
        convert_buffer: &mut Option<ConvertBuffer>,
        left: &mut Vec<f32>,
        right: &mut Vec<f32>,
    ) {
        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            return;
        }

        let needs_new = match convert_buffer {
            Some(buf) => buf.spec != spec || buf.frames < decoded.capacity(),
            None => true,
        };
        if needs_new {
            *convert_buffer = Some(ConvertBuffer {
                samples: SampleBuffer::new(decoded.capacity() as u64, spec),
                spec,
                frames: decoded.capacity(),
            });
        }

        let Some(buf) = convert_buffer.as_mut() else {
            return;
        };
        buf.samples.copy_planar_ref(decoded);

        // Planar layout: every channel's `frames` samples back to back
        let data = buf.samples.samples();
        let first = &data[..frames];
        let second = if channel_map == ChannelMap::Stereo && spec.channels.count() > 1 {
            &data[frames..frames * 2]
        } else {
            first
        };

        left.extend_from_slice(first);
        right.extend_from_slice(second);
    }

    /// Move up to `frames` pending samples through the resampler into the
    /// output buffers
    fn emit(&mut self, frames: usize, flush: bool) -> Result<(), AudioError> {
        self.out_left.clear();
        self.out_right.clear();

        match self.resampler.as_mut() {
            None => {
                self.out_left.extend(self.pending_left.drain(..frames));
                self.out_right.extend(self.pending_right.drain(..frames));
            }
            Some(resampler) => {
                let input = [&self.pending_left[..frames], &self.pending_right[..frames]];
                let output = if flush {
                    resampler.process_partial(Some(&input), None)
                } else {
                    resampler.process(&input, None)
                }
                .map_err(|e| AudioError::ResampleFailed(e.to_string()))?;

                self.out_left.extend_from_slice(&output[0]);
                self.out_right.extend_from_slice(&output[1]);
                self.pending_left.drain(..frames);
                self.pending_right.drain(..frames);
            }
        }

        Ok(())
    }
}

impl TrackDecoder for FileDecoder {
    fn decode_next(&mut self) -> Result<Option<StereoChunk<'_>>, AudioError> {
        while !self.end_of_stream && self.pending_left.len() < DECODE_CHUNK_FRAMES {
            if !self.decode_packet()? {
                self.end_of_stream = true;
            }
        }

        let pending = self.pending_left.len();
        if pending >= DECODE_CHUNK_FRAMES {
            self.emit(DECODE_CHUNK_FRAMES, false)?;
        } else if pending > 0 {
            self.emit(pending, true)?;
        } else {
            return Ok(None);
        }

        Ok(Some(StereoChunk {
            left: &self.out_left,
            right: &self.out_right,
        }))
    }

    fn rewind(&mut self) -> Result<(), AudioError> {
        let seek = self.format.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: 0,
                track_id: self.track_id,
            },
        );

        match seek {
            Ok(_) => {
                self.decoder.reset();
                if let Some(resampler) = self.resampler.as_mut() {
                    resampler.reset();
                }
                self.pending_left.clear();
                self.pending_right.clear();
                self.end_of_stream = false;
            }
            Err(e) => {
                debug!("{}: seek failed ({}), reopening", self.path.display(), e);
                let path = self.path.clone();
                *self = Self::open(&path)?;
            }
        }

        Ok(())
    }

    fn max_chunk_frames(&self) -> usize {
        match &self.resampler {
            Some(resampler) => resampler.output_frames_max(),
            None => DECODE_CHUNK_FRAMES,
        }
    }
}

impl Drop for FileDecoder {
    fn drop(&mut self) {
        trace!("Released decoder for {}", self.path.display());
    }
}
