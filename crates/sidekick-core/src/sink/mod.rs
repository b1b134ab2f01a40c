//! Audio sinks
//!
//! The session hands every mixed frame to exactly one [`AudioSink`], chosen
//! at session start. Sinks never block the caller; frames that do not fit
//! are dropped and the returned count says so.
//!
//! - [`NullSink`]: discards everything (headless runs, tests)
//! - [`PeriodicSink`]: ring buffer drained frame by frame through a
//!   [`PeriodicOutput`] handle (the PWM path)
//! - `StreamingSink` (feature `streaming`): system audio device via rodio

pub mod periodic;
pub mod ring_buffer;
#[cfg(feature = "streaming")]
pub mod streaming;

pub use periodic::{PeriodicOutput, PeriodicSink};
pub use ring_buffer::RingBuffer;
#[cfg(feature = "streaming")]
pub use streaming::StreamingSink;

use crate::mixer::StereoFrame;

/// Destination of the mixed stream
pub trait AudioSink: Send {
    /// Queue frames; returns how many were accepted.
    fn write(&mut self, frames: &[StereoFrame]) -> usize;

    /// Frames queued but not yet played, `None` if the sink cannot tell
    /// (not started or unavailable).
    fn queue_occupancy(&self) -> Option<usize>;
}

/// Sink that accepts and discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn write(&mut self, frames: &[StereoFrame]) -> usize {
        frames.len()
    }

    fn queue_occupancy(&self) -> Option<usize> {
        None
    }
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn write(&mut self, frames: &[StereoFrame]) -> usize {
        (**self).write(frames)
    }

    fn queue_occupancy(&self) -> Option<usize> {
        (**self).queue_occupancy()
    }
}
