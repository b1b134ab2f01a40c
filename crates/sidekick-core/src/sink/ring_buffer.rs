//! Frame ring buffer between the background loop and an output context
//!
//! One producer (the session writing mixed frames) and one consumer (a PWM
//! timer or the audio device callback). Storage is guarded by a
//! `parking_lot::Mutex`; positions are atomics so occupancy can be polled
//! without taking the lock.

use crate::mixer::StereoFrame;
use crate::{Result, SidekickError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Largest accepted capacity in frames (16 MB of audio).
pub const MAX_CAPACITY: usize = 16 * 1024 * 1024 / std::mem::size_of::<StereoFrame>();

/// Bounded stereo frame queue
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Mutex<Vec<StereoFrame>>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    capacity: usize,
    mask: usize,
}

impl RingBuffer {
    /// Create a buffer; the capacity is rounded up to a power of two.
    ///
    /// # Errors
    ///
    /// Fails for a zero capacity or one above [`MAX_CAPACITY`].
    pub fn new(requested_capacity: usize) -> Result<Self> {
        if requested_capacity == 0 {
            return Err(SidekickError::Config(
                "ring buffer capacity must be greater than 0".into(),
            ));
        }

        let capacity = requested_capacity.next_power_of_two();
        if capacity > MAX_CAPACITY {
            return Err(SidekickError::Config(format!(
                "ring buffer capacity {capacity} exceeds maximum {MAX_CAPACITY}"
            )));
        }

        Ok(Self {
            buffer: Mutex::new(vec![StereoFrame::silence(); capacity]),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
        })
    }

    /// Capacity in frames. One slot always stays free.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames queued and not yet read.
    pub fn available_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Free slots.
    pub fn available_write(&self) -> usize {
        self.capacity - self.available_read() - 1
    }

    /// Append frames; returns how many fit.
    pub fn write(&self, frames: &[StereoFrame]) -> usize {
        let mut buf = self.buffer.lock();

        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let free = self.capacity - write_pos.wrapping_sub(read_pos) - 1;
        let count = frames.len().min(free);
        if count == 0 {
            return 0;
        }

        let start = write_pos & self.mask;
        let first = count.min(self.capacity - start);
        buf[start..start + first].copy_from_slice(&frames[..first]);
        buf[..count - first].copy_from_slice(&frames[first..count]);
        drop(buf);

        self.write_pos
            .store(write_pos.wrapping_add(count), Ordering::Release);
        count
    }

    /// Take up to `dest.len()` frames; returns how many were read.
    pub fn read(&self, dest: &mut [StereoFrame]) -> usize {
        let buf = self.buffer.lock();

        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let count = dest.len().min(write_pos.wrapping_sub(read_pos));
        if count == 0 {
            return 0;
        }

        let start = read_pos & self.mask;
        let first = count.min(self.capacity - start);
        dest[..first].copy_from_slice(&buf[start..start + first]);
        dest[first..count].copy_from_slice(&buf[..count - first]);
        drop(buf);

        self.read_pos
            .store(read_pos.wrapping_add(count), Ordering::Release);
        count
    }

    /// Take a single frame.
    pub fn pop(&self) -> Option<StereoFrame> {
        let mut frame = [StereoFrame::silence()];
        (self.read(&mut frame) == 1).then_some(frame[0])
    }

    /// Discard everything queued.
    pub fn flush(&self) {
        let _guard = self.buffer.lock();
        let write_pos = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write_pos, Ordering::Release);
    }

    /// Fill level between 0.0 and 1.0.
    pub fn fill_percentage(&self) -> f32 {
        self.available_read() as f32 / self.capacity as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(value: i16, count: usize) -> Vec<StereoFrame> {
        vec![StereoFrame::new(value, -value); count]
    }

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let rb = RingBuffer::new(1000).unwrap();
        assert_eq!(rb.capacity(), 1024);
        assert_eq!(rb.available_read(), 0);
        assert_eq!(rb.available_write(), 1023);
    }

    #[test]
    fn test_write_and_read() {
        let rb = RingBuffer::new(16).unwrap();
        let input = frames(7, 4);
        assert_eq!(rb.write(&input), 4);
        assert_eq!(rb.available_read(), 4);

        let mut out = frames(0, 4);
        assert_eq!(rb.read(&mut out), 4);
        assert_eq!(out, input);
    }

    #[test]
    fn test_wraparound_keeps_order() {
        let rb = RingBuffer::new(16).unwrap();
        rb.write(&frames(1, 10));
        let mut out = frames(0, 8);
        rb.read(&mut out);

        let tail: Vec<_> = (0..12).map(|i| StereoFrame::new(i, i)).collect();
        assert_eq!(rb.write(&tail), 12);

        let mut out = frames(0, 14);
        assert_eq!(rb.read(&mut out), 14);
        assert_eq!(&out[..2], &frames(1, 2)[..]);
        assert_eq!(&out[2..], &tail[..]);
    }

    #[test]
    fn test_full_buffer_rejects_writes() {
        let rb = RingBuffer::new(8).unwrap();
        assert_eq!(rb.write(&frames(1, 20)), 7);
        assert_eq!(rb.write(&frames(1, 1)), 0);
        assert!(rb.fill_percentage() > 0.8);
    }

    #[test]
    fn test_flush_and_pop() {
        let rb = RingBuffer::new(8).unwrap();
        rb.write(&frames(3, 2));
        assert_eq!(rb.pop(), Some(StereoFrame::new(3, -3)));
        rb.flush();
        assert_eq!(rb.pop(), None);
    }

    #[test]
    fn test_invalid_capacity() {
        let err = RingBuffer::new(0).unwrap_err();
        assert!(err.to_string().contains("greater than 0"));
        assert!(RingBuffer::new(MAX_CAPACITY + 1).is_err());
    }
}
