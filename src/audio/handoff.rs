//! Blocking handoff buffer between the mixing thread and an output consumer
//!
//! A bounded ring of interleaved samples guarded by one mutex and two
//! condition variables. The writer waits for space, the reader waits for
//! data; nothing is ever dropped. `release_waiter` wakes both sides during
//! shutdown and makes them return `false` until `reset` is called.
//!
//! While `drain` waits, `pull_available` hands out a short tail instead of
//! blocking for a full request.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::constants::{FRAME_DURATION, FRAME_SAMPLES, HANDOFF_CAPACITY_FRAMES};

struct RingState {
    samples: Vec<f32>,
    read_cursor: usize,
    write_cursor: usize,
    available: usize,
    stopping: bool,
    draining: bool,
}

impl RingState {
    fn capacity(&self) -> usize {
        self.samples.len()
    }

    fn free(&self) -> usize {
        self.capacity() - self.available
    }

    fn take<F>(&mut self, count: usize, mut sink: F)
    where
        F: FnMut(usize, f32),
    {
        let capacity = self.capacity();
        let mut index = self.read_cursor;
        for position in 0..count {
            sink(position, self.samples[index]);
            index += 1;
            if index == capacity {
                index = 0;
            }
        }

        self.read_cursor = index;
        self.available -= count;
    }
}

/// Bounded, blocking ring buffer of interleaved samples
pub struct HandoffBuffer {
    state: Mutex<RingState>,
    data_ready: Condvar,
    space_ready: Condvar,
}

impl HandoffBuffer {
    /// Create a buffer holding `capacity` interleaved samples
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "HandoffBuffer capacity must be non-zero");

        Self {
            state: Mutex::new(RingState {
                samples: vec![0.0; capacity],
                read_cursor: 0,
                write_cursor: 0,
                available: 0,
                stopping: false,
                draining: false,
            }),
            data_ready: Condvar::new(),
            space_ready: Condvar::new(),
        }
    }

    /// Create a buffer sized in playback frames
    pub fn with_frames(frames: usize) -> Self {
        Self::new(frames * FRAME_SAMPLES)
    }

    /// Copy all of `samples` in, blocking until there is room
    ///
    /// Returns `false` without writing if the buffer is stopping.
    ///
    /// # Panics
    /// If `samples` is larger than the whole buffer, since it could never fit.
    pub fn push(&self, samples: &[f32]) -> bool {
        let count = samples.len();
        let mut state = self.state.lock();
        assert!(
            count <= state.capacity(),
            "HandoffBuffer push of {} exceeds capacity {}",
            count,
            state.capacity()
        );

        while !state.stopping && state.free() < count {
            self.space_ready.wait(&mut state);
        }
        if state.stopping {
            return false;
        }

        let capacity = state.capacity();
        let start = state.write_cursor;
        let first = count.min(capacity - start);
        state.samples[start..start + first].copy_from_slice(&samples[..first]);
        if first < count {
            state.samples[..count - first].copy_from_slice(&samples[first..]);
        }

        state.write_cursor = (start + count) % capacity;
        state.available += count;
        drop(state);

        self.data_ready.notify_one();
        true
    }

    /// Fill all of `dest`, blocking until enough samples are buffered
    ///
    /// Returns `false` without touching `dest` if the buffer is stopping.
    pub fn pull(&self, dest: &mut [f32]) -> bool {
        self.pull_with(dest.len(), |index, sample| dest[index] = sample)
    }

    /// Take `count` samples, handing each to `sink` with its position
    ///
    /// Lets the consumer reformat (channel mapping, de-interleaving) while
    /// copying out. Returns `false` without delivering anything if the buffer
    /// is stopping.
    ///
    /// # Panics
    /// If `count` is larger than the whole buffer.
    pub fn pull_with<F>(&self, count: usize, sink: F) -> bool
    where
        F: FnMut(usize, f32),
    {
        let mut state = self.state.lock();
        assert!(
            count <= state.capacity(),
            "HandoffBuffer pull of {} exceeds capacity {}",
            count,
            state.capacity()
        );

        while !state.stopping && state.available < count {
            self.data_ready.wait(&mut state);
        }
        if state.stopping {
            return false;
        }

        state.take(count, sink);
        drop(state);

        // The writer and a draining stop() may both be waiting
        self.space_ready.notify_all();
        true
    }

    /// Take up to `max` samples, handing each to `sink` with its position
    ///
    /// Blocks like [`pull_with`](Self::pull_with) until `max` samples are
    /// buffered, except while a `drain` is in progress: then whatever is
    /// left is delivered at once, possibly nothing. Returns the number of
    /// samples delivered, or `None` if the buffer is stopping.
    ///
    /// # Panics
    /// If `max` is larger than the whole buffer.
    pub fn pull_available<F>(&self, max: usize, sink: F) -> Option<usize>
    where
        F: FnMut(usize, f32),
    {
        let mut state = self.state.lock();
        assert!(
            max <= state.capacity(),
            "HandoffBuffer pull of {} exceeds capacity {}",
            max,
            state.capacity()
        );

        while !state.stopping && !state.draining && state.available < max {
            self.data_ready.wait(&mut state);
        }
        if state.stopping {
            return None;
        }

        let count = state.available.min(max);
        state.take(count, sink);
        drop(state);

        if count > 0 {
            self.space_ready.notify_all();
        }
        Some(count)
    }

    /// Wait until the reader has taken everything, up to `timeout`
    ///
    /// Readers parked in `pull_available` are woken and take the tail short.
    /// The buffer stays in draining mode until `reset`.
    ///
    /// Returns `true` once the buffer is empty, `false` on timeout or if the
    /// buffer is stopping.
    pub fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        state.draining = true;
        self.data_ready.notify_all();

        while !state.stopping && state.available > 0 {
            if self.space_ready.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        !state.stopping && state.available == 0
    }

    /// Wake every blocked caller without delivering data
    ///
    /// The buffer stays in the stopping state, so later `push`/`pull` calls
    /// return `false` immediately until `reset`.
    pub fn release_waiter(&self) {
        self.state.lock().stopping = true;
        self.data_ready.notify_all();
        self.space_ready.notify_all();
    }

    /// Empty the buffer and leave the stopping state
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.read_cursor = 0;
        state.write_cursor = 0;
        state.available = 0;
        state.stopping = false;
        state.draining = false;
        drop(state);

        self.space_ready.notify_all();
    }

    pub fn is_stopping(&self) -> bool {
        self.state.lock().stopping
    }

    /// Get current buffer length
    pub fn len(&self) -> usize {
        self.state.lock().available
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get buffer capacity
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity()
    }

    /// Time a real-time reader needs to empty a full buffer
    pub fn playout_time(&self) -> Duration {
        let frames = self.capacity().div_ceil(FRAME_SAMPLES) as u32;
        FRAME_DURATION * frames
    }
}

impl Default for HandoffBuffer {
    fn default() -> Self {
        Self::with_frames(HANDOFF_CAPACITY_FRAMES)
    }
}

/// Thread-safe handle to a handoff buffer
pub type SharedHandoffBuffer = Arc<HandoffBuffer>;
