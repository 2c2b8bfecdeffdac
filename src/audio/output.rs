//! Local speaker output
//!
//! The cpal stream lives on its own thread for as long as playback runs, and
//! its callback pulls mixed frames out of the handoff buffer.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::audio::device::get_output_device;
use crate::audio::handoff::{HandoffBuffer, SharedHandoffBuffer};
use crate::audio::sink::PlaybackSink;
use crate::config::OutputConfig;
use crate::constants::SAMPLE_RATE;
use crate::error::{AudioError, Result};

/// Extra time allowed for the device to play out queued frames on stop
const DRAIN_SLACK: Duration = Duration::from_millis(100);

/// Plays the mixed stream on a local output device
pub struct LocalOutput {
    /// Device name (None = default device)
    device_name: Option<String>,

    /// Requested driver buffer size in frames
    buffer_size: Option<u32>,

    /// Frames handed over by the mixing thread
    handoff: SharedHandoffBuffer,

    /// Whether the stream thread should keep running
    running: Arc<AtomicBool>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Callbacks that had to pad with silence since the last start
    padded_callbacks: Arc<AtomicU64>,
}

impl LocalOutput {
    pub fn new(config: &OutputConfig, handoff_frames: usize) -> Self {
        Self {
            device_name: config.device.clone(),
            buffer_size: config.buffer_size,
            handoff: Arc::new(HandoffBuffer::with_frames(handoff_frames)),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            padded_callbacks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Check if the stream is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn spawn_stream(&mut self) -> Result<()> {
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), AudioError>>(1);

        let device_name = self.device_name.clone();
        let buffer_size = self.buffer_size;
        let handoff = self.handoff.clone();
        let running = self.running.clone();
        let padded_callbacks = self.padded_callbacks.clone();

        self.running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("local-output".to_string())
            .spawn(move || {
                let stream = get_output_device(device_name.as_deref()).and_then(|device| {
                    let default_config = device
                        .default_output_config()
                        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
                    let channels = default_config.channels();

                    let config = StreamConfig {
                        channels,
                        sample_rate: cpal::SampleRate(SAMPLE_RATE),
                        buffer_size: match buffer_size {
                            Some(size) => cpal::BufferSize::Fixed(size),
                            None => cpal::BufferSize::Default,
                        },
                    };

                    debug!("Opening output stream: {} channels @ {}Hz", channels, SAMPLE_RATE);

                    device
                        .build_output_stream(
                            &config,
                            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                                if !fill_output(&handoff, data, channels as usize) {
                                    padded_callbacks.fetch_add(1, Ordering::Relaxed);
                                }
                            },
                            move |err| error!("Output stream error: {}", err),
                            None,
                        )
                        .map_err(|e| AudioError::StreamError(e.to_string()))
                });

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, stopping playback
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("output thread exited".to_string())));
        if let Err(e) = ready {
            self.running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.thread_handle.take() {
                let _ = handle.join();
            }
            return Err(e.into());
        }

        Ok(())
    }
}

/// Fill one driver buffer from the handoff buffer, mapping stereo pairs onto
/// the device's channel layout
///
/// Mono devices get the average of left and right; channels past the second
/// get silence. Once the buffer is stopping, or draining with less left than
/// `data` asks for, the rest of `data` is silenced and `false` is returned.
pub fn fill_output(handoff: &HandoffBuffer, data: &mut [f32], channels: usize) -> bool {
    let channels = channels.max(1);
    let frames = data.len() / channels;
    let max_pairs = handoff.capacity() / 2;
    let mut done = 0;

    while done < frames {
        let pairs = (frames - done).min(max_pairs);
        let out = &mut data[done * channels..(done + pairs) * channels];

        let delivered = handoff.pull_available(pairs * 2, |index, sample| {
            let frame = index / 2;
            let side = index % 2;

            if channels == 1 {
                if side == 0 {
                    out[frame] = sample * 0.5;
                } else {
                    out[frame] += sample * 0.5;
                }
            } else {
                let base = frame * channels;
                out[base + side] = sample;
                if side == 1 {
                    out[base + 2..base + channels].fill(0.0);
                }
            }
        });

        match delivered {
            Some(count) if count > 0 => done += count / 2,
            _ => {
                data[done * channels..].fill(0.0);
                return false;
            }
        }
    }

    true
}

impl PlaybackSink for LocalOutput {
    fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.handoff.reset();
        self.padded_callbacks.store(0, Ordering::Relaxed);
        self.spawn_stream()?;
        info!("Local output started");
        Ok(())
    }

    fn stop(&mut self) {
        if !self.is_running() {
            return;
        }

        // Let the device play what is queued; a dead stream just times out
        if !self.handoff.drain(self.handoff.playout_time() + DRAIN_SLACK) {
            debug!("Discarding {} queued samples", self.handoff.len());
        }

        self.running.store(false, Ordering::SeqCst);
        // A callback may be parked in pull
        self.handoff.release_waiter();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("Local output thread panicked");
            }
        }
        self.handoff.reset();
        info!(
            "Local output stopped ({} callbacks padded with silence)",
            self.padded_callbacks.load(Ordering::Relaxed)
        );
    }

    fn accept(&mut self, frame: &[f32]) -> std::result::Result<(), AudioError> {
        if self.handoff.push(frame) {
            Ok(())
        } else {
            Err(AudioError::SinkStopped)
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

impl Drop for LocalOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_stereo_device() {
        let handoff = HandoffBuffer::new(8);
        handoff.push(&[0.1, 0.2, 0.3, 0.4]);

        let mut data = [9.0f32; 4];
        assert!(fill_output(&handoff, &mut data, 2));
        assert_eq!(data, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_fill_mono_device_averages() {
        let handoff = HandoffBuffer::new(8);
        handoff.push(&[0.2, 0.4, -1.0, 1.0]);

        let mut data = [9.0f32; 2];
        assert!(fill_output(&handoff, &mut data, 1));
        assert!((data[0] - 0.3).abs() < 1e-6);
        assert!(data[1].abs() < 1e-6);
    }

    #[test]
    fn test_fill_surround_device_silences_extra_channels() {
        let handoff = HandoffBuffer::new(8);
        handoff.push(&[0.5, -0.5]);

        let mut data = [9.0f32; 4];
        assert!(fill_output(&handoff, &mut data, 4));
        assert_eq!(data, [0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_fill_larger_than_buffer_in_chunks() {
        let handoff = Arc::new(HandoffBuffer::new(4));
        let producer = {
            let handoff = handoff.clone();
            thread::spawn(move || {
                for i in 0..4 {
                    let v = i as f32 / 10.0;
                    handoff.push(&[v, -v]);
                }
            })
        };

        let mut data = [0.0f32; 8];
        assert!(fill_output(&handoff, &mut data, 2));
        producer.join().unwrap();

        assert_eq!(data, [0.0, -0.0, 0.1, -0.1, 0.2, -0.2, 0.3, -0.3]);
    }

    #[test]
    fn test_fill_when_stopping_plays_silence() {
        let handoff = HandoffBuffer::new(8);
        handoff.release_waiter();

        let mut data = [9.0f32; 6];
        assert!(!fill_output(&handoff, &mut data, 2));
        assert_eq!(data, [0.0; 6]);
    }

    #[test]
    fn test_drain_plays_out_tail_shorter_than_callback() {
        use crate::constants::FRAME_SAMPLES;

        let handoff = Arc::new(HandoffBuffer::with_frames(4));
        handoff.push(&[0.25; FRAME_SAMPLES]);

        // 512 pairs requested against a 480-pair tail
        let callback = {
            let handoff = handoff.clone();
            thread::spawn(move || {
                let mut data = vec![9.0f32; 1024];
                let complete = fill_output(&handoff, &mut data, 2);
                (complete, data)
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!callback.is_finished());

        assert!(handoff.drain(handoff.playout_time() + DRAIN_SLACK));
        assert!(handoff.is_empty());

        let (complete, data) = callback.join().unwrap();
        assert!(!complete);
        assert!(data[..FRAME_SAMPLES].iter().all(|&s| s == 0.25));
        assert!(data[FRAME_SAMPLES..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_accept_fails_while_stopping() {
        let mut output = LocalOutput::new(&OutputConfig::default(), 2);
        output.handoff.release_waiter();
        assert!(matches!(output.accept(&[0.0; 4]), Err(AudioError::SinkStopped)));
    }
}
