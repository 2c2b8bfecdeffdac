//! Mixing engine
//!
//! Runs on its own thread. Each cycle tops up every active track, mixes one
//! 480-pair frame with per-track volume and clamping, and hands it to the
//! sink. The sink's blocking `accept` is what paces the loop.

use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use std::path::Path;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::audio::sink::PlaybackSink;
use crate::constants::FRAME_SAMPLES;
use crate::error::{AudioError, Result, TrackError};
use crate::mixer::handle::{Command, MixerHandle, TrackInfo};
use crate::tracks::{FillStatus, Track};

/// Why a track leaves the mix at the end of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finished {
    Exhausted,
    Failed,
}

/// Mixes the active tracks into a playback sink
pub struct MixingEngine {
    tracks: Vec<Track>,
    output: [f32; FRAME_SAMPLES],
    sink: Box<dyn PlaybackSink>,
    was_playing: bool,
    commands: Receiver<Command>,
}

impl MixingEngine {
    pub fn new(sink: Box<dyn PlaybackSink>) -> (Self, MixerHandle) {
        let (tx, rx) = unbounded();
        let engine = Self {
            tracks: Vec::new(),
            output: [0.0; FRAME_SAMPLES],
            sink,
            was_playing: false,
            commands: rx,
        };
        (engine, MixerHandle::new(tx))
    }

    /// Run the engine on a new "mixer" thread
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("mixer".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    /// Mix until shut down, or until idle with every handle dropped
    pub fn run(mut self) {
        info!("Mixing engine running ({} sink)", self.sink.name());

        'engine: loop {
            if self.tracks.is_empty() {
                self.stop_sink();
                match self.commands.recv() {
                    Ok(command) => {
                        if !self.apply(command) {
                            break;
                        }
                    }
                    Err(_) => break,
                }
                continue;
            }

            loop {
                match self.commands.try_recv() {
                    Ok(command) => {
                        if !self.apply(command) {
                            break 'engine;
                        }
                    }
                    // Keep playing what is queued even with no handles left
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }

            if !self.tracks.is_empty() {
                self.cycle();
            }
        }

        self.stop_sink();
        self.tracks.clear();
        info!("Mixing engine stopped");
    }

    /// One frame: start the sink if needed, mix, deliver, retire tracks
    fn cycle(&mut self) {
        if !self.was_playing {
            if let Err(e) = self.sink.start() {
                error!("Failed to start {} sink: {}", self.sink.name(), e);
                self.tracks.clear();
                return;
            }
            self.was_playing = true;
            debug!("{} sink started", self.sink.name());
        }

        let finished = self.mix_frame();
        self.retire(finished);

        if self.tracks.is_empty() {
            self.stop_sink();
        }
    }

    /// Mix one frame into the output buffer and hand it to the sink
    ///
    /// Returns the tracks (by index) that have to leave the mix.
    fn mix_frame(&mut self) -> Vec<(usize, Finished)> {
        let mut finished = Vec::new();
        let mut first = true;

        for (index, track) in self.tracks.iter_mut().enumerate() {
            let status = match track.fill() {
                Ok(status) => status,
                Err(e) => {
                    warn!("Track {} failed: {}", track.path().display(), e);
                    finished.push((index, Finished::Failed));
                    continue;
                }
            };

            let pairs = track.read_into(&mut self.output, !first);
            if first {
                // Nothing from the previous frame may survive past a short first track
                self.output[pairs * 2..].fill(0.0);
                first = false;
            }

            if status == FillStatus::Exhausted {
                finished.push((index, Finished::Exhausted));
            }
        }

        // No contributor means every track failed; there is no frame to send
        if !first {
            if let Err(e) = self.sink.accept(&self.output) {
                match e {
                    AudioError::SinkStopped => debug!("Frame discarded, sink is stopping"),
                    e => warn!("Sink rejected frame: {}", e),
                }
            }
        }

        finished
    }

    /// Remove finished tracks, rewinding the looping ones instead
    fn retire(&mut self, finished: Vec<(usize, Finished)>) {
        // Highest index first so earlier indices stay valid
        for (index, reason) in finished.into_iter().rev() {
            let track = &mut self.tracks[index];

            let keep = match reason {
                Finished::Failed => false,
                Finished::Exhausted if !track.is_looping() => false,
                Finished::Exhausted if !track.has_produced_audio() => {
                    warn!("Looping track {} has no audio, removing", track.path().display());
                    false
                }
                Finished::Exhausted => match track.rewind() {
                    Ok(()) => {
                        debug!("Track {} looped", track.path().display());
                        true
                    }
                    Err(e) => {
                        warn!("Track {} could not rewind: {}", track.path().display(), e);
                        false
                    }
                },
            };

            if !keep {
                let track = self.tracks.remove(index);
                info!("Track {} finished", track.path().display());
            }
        }
    }

    fn stop_sink(&mut self) {
        if self.was_playing {
            self.sink.stop();
            self.was_playing = false;
            debug!("{} sink stopped", self.sink.name());
        }
    }

    /// Apply a command; returns `false` on shutdown
    fn apply(&mut self, command: Command) -> bool {
        match command {
            Command::Add { track, reply } => {
                let _ = reply.send(self.add(track));
            }
            Command::Remove { path, reply } => {
                let result = self.position(&path).map(|index| {
                    self.tracks.remove(index);
                    info!("Track {} removed", path.display());
                });
                let _ = reply.send(result);
            }
            Command::SetVolume { path, volume, reply } => {
                let result = self
                    .position(&path)
                    .and_then(|index| self.tracks[index].set_volume(volume));
                let _ = reply.send(result);
            }
            Command::SetLooping { path, looping, reply } => {
                let result = self
                    .position(&path)
                    .map(|index| self.tracks[index].set_looping(looping));
                let _ = reply.send(result);
            }
            Command::List { reply } => {
                let _ = reply.send(Ok(self.track_info()));
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn add(&mut self, track: Track) -> std::result::Result<(), TrackError> {
        if self.position(track.path()).is_ok() {
            return Err(TrackError::AlreadyExists(track.path().display().to_string()));
        }
        info!(
            "Track {} added (volume {:.2}{})",
            track.path().display(),
            track.volume(),
            if track.is_looping() { ", looping" } else { "" }
        );
        self.tracks.push(track);
        Ok(())
    }

    fn position(&self, path: &Path) -> std::result::Result<usize, TrackError> {
        self.tracks
            .iter()
            .position(|track| track.path() == path)
            .ok_or_else(|| TrackError::NotFound(path.display().to_string()))
    }

    fn track_info(&self) -> Vec<TrackInfo> {
        self.tracks
            .iter()
            .map(|track| TrackInfo {
                path: track.path().to_path_buf(),
                volume: track.volume(),
                looping: track.is_looping(),
            })
            .collect()
    }
}
