//! Periodic output path (PWM pins)
//!
//! The session side ([`PeriodicSink`]) fills a ring buffer; a timer context
//! owns the [`PeriodicOutput`] handle and pulls exactly one frame per timer
//! tick, converting it to PWM duty values.

use super::ring_buffer::RingBuffer;
use super::AudioSink;
use crate::mixer::StereoFrame;
use crate::Result;
use std::sync::Arc;

/// Default queue length in frames.
pub const DEFAULT_PERIODIC_CAPACITY: usize = 8192;

/// Convert a sample to a PWM duty value for a counter of `range` steps.
///
/// Uses half the range so the two pins of a channel pair never saturate.
#[inline]
pub fn pwm_duty(sample: i16, range: u32) -> u32 {
    let biased = u64::from((i32::from(sample) + 32_768) as u32);
    ((biased * u64::from(range)) >> 17) as u32
}

/// Writing side of the periodic path
#[derive(Debug)]
pub struct PeriodicSink {
    ring: Arc<RingBuffer>,
}

impl PeriodicSink {
    /// Create the sink and its pull handle sharing a queue of `capacity`
    /// frames. `range` is the PWM counter range.
    pub fn new(capacity: usize, range: u32) -> Result<(Self, PeriodicOutput)> {
        let ring = Arc::new(RingBuffer::new(capacity)?);
        let output = PeriodicOutput {
            ring: Arc::clone(&ring),
            range,
            underruns: 0,
        };
        Ok((Self { ring }, output))
    }
}

impl AudioSink for PeriodicSink {
    fn write(&mut self, frames: &[StereoFrame]) -> usize {
        self.ring.write(frames)
    }

    fn queue_occupancy(&self) -> Option<usize> {
        Some(self.ring.available_read())
    }
}

/// Pull handle owned by the timer context
#[derive(Debug)]
pub struct PeriodicOutput {
    ring: Arc<RingBuffer>,
    range: u32,
    underruns: u64,
}

impl PeriodicOutput {
    /// Next frame, or silence if the queue ran dry.
    #[inline]
    pub fn next_frame(&mut self) -> StereoFrame {
        self.ring.pop().unwrap_or_else(|| {
            self.underruns += 1;
            StereoFrame::silence()
        })
    }

    /// Next frame as (left, right) PWM duty values.
    #[inline]
    pub fn next_duty(&mut self) -> (u32, u32) {
        let frame = self.next_frame();
        (pwm_duty(frame.left, self.range), pwm_duty(frame.right, self.range))
    }

    /// Ticks that found the queue empty.
    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    /// Frames waiting.
    pub fn queued(&self) -> usize {
        self.ring.available_read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duty_mapping() {
        assert_eq!(pwm_duty(-32_768, 4096), 0);
        assert_eq!(pwm_duty(0, 4096), 1024);
        assert_eq!(pwm_duty(32_767, 4096), 2047);
    }

    #[test]
    fn test_frames_flow_in_order() {
        let (mut sink, mut output) = PeriodicSink::new(64, 4096).unwrap();
        let frames = [StereoFrame::new(1, 2), StereoFrame::new(3, 4)];
        assert_eq!(sink.write(&frames), 2);
        assert_eq!(sink.queue_occupancy(), Some(2));
        assert_eq!(output.next_frame(), frames[0]);
        assert_eq!(output.next_frame(), frames[1]);
        assert_eq!(output.underruns(), 0);
    }

    #[test]
    fn test_underrun_plays_silence() {
        let (_sink, mut output) = PeriodicSink::new(64, 4096).unwrap();
        assert_eq!(output.next_frame(), StereoFrame::silence());
        assert_eq!(output.next_duty(), (1024, 1024));
        assert_eq!(output.underruns(), 2);
    }
}
