//! Control surface for a running mixing engine

use crossbeam_channel::{bounded, Sender};
use std::path::{Path, PathBuf};

use crate::error::{Result, TrackError};
use crate::tracks::track::validate_volume;
use crate::tracks::Track;

type Reply<T> = Sender<std::result::Result<T, TrackError>>;

/// Requests handled by the mixing thread between cycles
pub(crate) enum Command {
    Add { track: Track, reply: Reply<()> },
    Remove { path: PathBuf, reply: Reply<()> },
    SetVolume { path: PathBuf, volume: f32, reply: Reply<()> },
    SetLooping { path: PathBuf, looping: bool, reply: Reply<()> },
    List { reply: Reply<Vec<TrackInfo>> },
    Shutdown,
}

/// Snapshot of one active track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub path: PathBuf,
    pub volume: f32,
    pub looping: bool,
}

/// Cloneable handle for adding and controlling tracks
///
/// Every call waits for the mixing thread to apply it, which happens at the
/// next frame boundary.
#[derive(Clone)]
pub struct MixerHandle {
    commands: Sender<Command>,
}

impl MixerHandle {
    pub(crate) fn new(commands: Sender<Command>) -> Self {
        Self { commands }
    }

    /// Open `path` on the calling thread and add it to the mix
    pub fn play(&self, path: impl AsRef<Path>, volume: f32, looping: bool) -> Result<()> {
        let track = Track::open(path, volume, looping)?;
        self.add_track(track)?;
        Ok(())
    }

    /// Add a prepared track; fails if a track with the same path is active
    pub fn add_track(&self, track: Track) -> std::result::Result<(), TrackError> {
        self.request(|reply| Command::Add { track, reply })
    }

    pub fn remove_track(&self, path: impl AsRef<Path>) -> std::result::Result<(), TrackError> {
        let path = path.as_ref().to_path_buf();
        self.request(|reply| Command::Remove { path, reply })
    }

    pub fn set_volume(&self, path: impl AsRef<Path>, volume: f32) -> std::result::Result<(), TrackError> {
        validate_volume(volume)?;
        let path = path.as_ref().to_path_buf();
        self.request(|reply| Command::SetVolume { path, volume, reply })
    }

    pub fn set_looping(&self, path: impl AsRef<Path>, looping: bool) -> std::result::Result<(), TrackError> {
        let path = path.as_ref().to_path_buf();
        self.request(|reply| Command::SetLooping { path, looping, reply })
    }

    /// Tracks currently in the mix
    pub fn tracks(&self) -> std::result::Result<Vec<TrackInfo>, TrackError> {
        self.request(|reply| Command::List { reply })
    }

    /// Stop the engine; the sink is stopped and all tracks are dropped
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> std::result::Result<T, TrackError> {
        let (reply, response) = bounded(1);
        self.commands
            .send(build(reply))
            .map_err(|_| TrackError::EngineStopped)?;
        response.recv().map_err(|_| TrackError::EngineStopped)?
    }
}
