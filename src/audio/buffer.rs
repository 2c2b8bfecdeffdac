//! Per-track circular buffer for decoded audio
//!
//! Sits between a track's decoder and the mixing loop. Both sides run on the
//! mixing thread, so there is no locking here. Capacity is sized from the
//! decoder's largest decode unit; exceeding it means that sizing is wrong, so
//! overflow and underflow panic instead of returning an error.

use crate::constants::FRAME_SIZE;

/// Circular store of planar stereo samples
pub struct DecodedAudioBuffer {
    left: Vec<f32>,
    right: Vec<f32>,
    read_cursor: usize,
    write_cursor: usize,
    available: usize,
}

impl DecodedAudioBuffer {
    /// Create a buffer holding `capacity` stereo samples
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "DecodedAudioBuffer capacity must be non-zero");

        Self {
            left: vec![0.0; capacity],
            right: vec![0.0; capacity],
            read_cursor: 0,
            write_cursor: 0,
            available: 0,
        }
    }

    /// Capacity needed for a decoder whose chunks never exceed `max_chunk`
    /// samples: two decode units, and never less than one unit plus a frame.
    pub fn capacity_for(max_chunk: usize) -> usize {
        (max_chunk * 2).max(max_chunk + FRAME_SIZE)
    }

    /// Append samples from both channels
    ///
    /// # Panics
    /// If `left` and `right` differ in length, or if the write would exceed
    /// capacity.
    pub fn write(&mut self, left: &[f32], right: &[f32]) {
        assert_eq!(left.len(), right.len(), "channel length mismatch");

        let count = left.len();
        let capacity = self.capacity();
        assert!(
            self.available + count <= capacity,
            "DecodedAudioBuffer overflow: {} available + {} written > capacity {}",
            self.available,
            count,
            capacity
        );

        // At most two contiguous runs: up to the end, then from the start
        let first = count.min(capacity - self.write_cursor);
        let start = self.write_cursor;
        self.left[start..start + first].copy_from_slice(&left[..first]);
        self.right[start..start + first].copy_from_slice(&right[..first]);

        let rest = count - first;
        if rest > 0 {
            self.left[..rest].copy_from_slice(&left[first..]);
            self.right[..rest].copy_from_slice(&right[first..]);
        }

        self.write_cursor = (self.write_cursor + count) % capacity;
        self.available += count;
    }

    /// Read `count` samples into an interleaved stereo destination
    ///
    /// Each sample is scaled by `volume`, then either overwrites the
    /// destination or is added to it (`accumulate`), and the result is
    /// clamped to [-1.0, 1.0].
    ///
    /// # Panics
    /// If `count` exceeds the available samples or `dest` holds fewer than
    /// `count` stereo pairs.
    pub fn read(&mut self, dest: &mut [f32], count: usize, volume: f32, accumulate: bool) {
        assert!(
            count <= self.available,
            "DecodedAudioBuffer underflow: {} requested, {} available",
            count,
            self.available
        );
        assert!(dest.len() >= count * 2, "destination too small for {} pairs", count);

        let capacity = self.capacity();
        let mut index = self.read_cursor;

        for pair in dest[..count * 2].chunks_exact_mut(2) {
            let l = self.left[index] * volume;
            let r = self.right[index] * volume;

            if accumulate {
                pair[0] = (pair[0] + l).clamp(-1.0, 1.0);
                pair[1] = (pair[1] + r).clamp(-1.0, 1.0);
            } else {
                pair[0] = l.clamp(-1.0, 1.0);
                pair[1] = r.clamp(-1.0, 1.0);
            }

            index += 1;
            if index == capacity {
                index = 0;
            }
        }

        self.read_cursor = index;
        self.available -= count;
    }

    /// Logically empty the buffer; stale samples are overwritten before reuse
    pub fn reset(&mut self) {
        self.read_cursor = 0;
        self.write_cursor = 0;
        self.available = 0;
    }

    /// Samples ready to read
    pub fn available(&self) -> usize {
        self.available
    }

    /// Free space in samples
    pub fn free(&self) -> usize {
        self.capacity() - self.available
    }

    /// Get buffer capacity
    pub fn capacity(&self) -> usize {
        self.left.len()
    }

    pub fn read_cursor(&self) -> usize {
        self.read_cursor
    }

    pub fn write_cursor(&self) -> usize {
        self.write_cursor
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.available == 0
    }
}
