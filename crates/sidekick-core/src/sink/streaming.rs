//! Streaming audio device output using rodio
//!
//! The rodio output stream is not `Send`, so it lives on a dedicated audio
//! thread for the lifetime of the sink. The session only touches the shared
//! ring buffer.

use super::ring_buffer::RingBuffer;
use super::AudioSink;
use crate::mixer::StereoFrame;
use crate::{Result, SidekickError};
use log::{info, warn};
use rodio::{OutputStream, Sink, Source};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default queue length in frames (~370 ms at 44.1 kHz).
pub const DEFAULT_STREAMING_CAPACITY: usize = 16 * 1024;

/// Frames pulled from the ring per batch.
const BATCH_FRAMES: usize = 512;

/// rodio source reading interleaved stereo from the ring buffer
struct RingBufferSource {
    ring: Arc<RingBuffer>,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    batch: Vec<StereoFrame>,
    batch_len: usize,
    batch_pos: usize,
    right_pending: Option<f32>,
}

impl RingBufferSource {
    fn new(ring: Arc<RingBuffer>, sample_rate: u32, running: Arc<AtomicBool>) -> Self {
        Self {
            ring,
            sample_rate,
            running,
            batch: vec![StereoFrame::silence(); BATCH_FRAMES],
            batch_len: 0,
            batch_pos: 0,
            right_pending: None,
        }
    }
}

impl Source for RingBufferSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(BATCH_FRAMES * 2)
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

impl Iterator for RingBufferSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if let Some(right) = self.right_pending.take() {
            return Some(right);
        }
        if !self.running.load(Ordering::Relaxed) {
            return None;
        }

        if self.batch_pos >= self.batch_len {
            self.batch_len = self.ring.read(&mut self.batch);
            self.batch_pos = 0;
            if self.batch_len == 0 {
                // underrun: keep the stream alive with silence
                self.right_pending = Some(0.0);
                return Some(0.0);
            }
        }

        let frame = self.batch[self.batch_pos];
        self.batch_pos += 1;
        self.right_pending = Some(f32::from(frame.right) / 32_768.0);
        Some(f32::from(frame.left) / 32_768.0)
    }
}

/// Sink playing through the default system audio device
pub struct StreamingSink {
    ring: Arc<RingBuffer>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StreamingSink {
    /// Open the default device at `sample_rate` with a queue of `capacity`
    /// frames and start playback.
    ///
    /// # Errors
    ///
    /// Returns [`SidekickError::AudioDevice`] if no output device can be
    /// opened.
    pub fn new(sample_rate: u32, capacity: usize) -> Result<Self> {
        let ring = Arc::new(RingBuffer::new(capacity)?);
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();

        let thread = thread::Builder::new().name("sidekick-audio".into()).spawn({
            let ring = Arc::clone(&ring);
            let running = Arc::clone(&running);
            move || {
                let (stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("Failed to create audio stream: {e}")));
                        return;
                    }
                };
                let sink = match Sink::try_new(&handle) {
                    Ok(sink) => sink,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("Failed to create audio sink: {e}")));
                        return;
                    }
                };
                sink.append(RingBufferSource::new(ring, sample_rate, Arc::clone(&running)));
                let _ = ready_tx.send(Ok(()));

                while running.load(Ordering::Relaxed) {
                    thread::park_timeout(Duration::from_millis(100));
                }
                sink.stop();
                drop(stream);
            }
        })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Audio device opened at {sample_rate} Hz ({} frame queue)", ring.capacity());
                Ok(Self {
                    ring,
                    running,
                    thread: Some(thread),
                })
            }
            Ok(Err(message)) => {
                let _ = thread.join();
                Err(SidekickError::AudioDevice(message))
            }
            Err(_) => {
                let _ = thread.join();
                Err(SidekickError::AudioDevice(
                    "audio thread exited during start-up".into(),
                ))
            }
        }
    }

    /// Fill level of the queue between 0.0 and 1.0.
    pub fn fill_percentage(&self) -> f32 {
        self.ring.fill_percentage()
    }
}

impl AudioSink for StreamingSink {
    fn write(&mut self, frames: &[StereoFrame]) -> usize {
        self.ring.write(frames)
    }

    fn queue_occupancy(&self) -> Option<usize> {
        self.thread
            .as_ref()
            .filter(|thread| !thread.is_finished())
            .map(|_| self.ring.available_read())
    }
}

impl Drop for StreamingSink {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                warn!("Audio thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for StreamingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSink")
            .field("queued", &self.ring.available_read())
            .field("capacity", &self.ring.capacity())
            .finish()
    }
}
