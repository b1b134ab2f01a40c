//! WAV capture sink

use hound::{SampleFormat, WavSpec, WavWriter};
use log::{error, info};
use sidekick::{AudioSink, Result, StereoFrame};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Sink writing 16-bit stereo PCM to a file
pub struct WavSink {
    writer: Option<WavWriter<BufWriter<File>>>,
    path: PathBuf,
    frames: u64,
}

impl WavSink {
    /// Create (or truncate) `path`.
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path.as_ref(), spec)
            .map_err(|e| format!("Failed to create WAV file: {}", e))?;
        Ok(Self {
            writer: Some(writer),
            path: path.as_ref().to_path_buf(),
            frames: 0,
        })
    }

    /// Frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn write_frame(writer: &mut WavWriter<BufWriter<File>>, frame: StereoFrame) -> hound::Result<()> {
        writer.write_sample(frame.left)?;
        writer.write_sample(frame.right)
    }
}

impl AudioSink for WavSink {
    fn write(&mut self, frames: &[StereoFrame]) -> usize {
        let Some(writer) = self.writer.as_mut() else {
            return 0;
        };
        for (written, &frame) in frames.iter().enumerate() {
            if let Err(e) = Self::write_frame(writer, frame) {
                error!("WAV capture stopped: {e}");
                self.writer = None;
                return written;
            }
            self.frames += 1;
        }
        frames.len()
    }

    // a file never backs up; rate control stays at nominal
    fn queue_occupancy(&self) -> Option<usize> {
        None
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            match writer.finalize() {
                Ok(()) => info!("Wrote {} frames to {}", self.frames, self.path.display()),
                Err(e) => error!("Failed to finalize WAV file: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_round_trip() {
        let path = std::env::temp_dir().join(format!("sidekick-wav-{}.wav", std::process::id()));
        {
            let mut sink = WavSink::create(&path, 44_100).unwrap();
            let frames = [StereoFrame::new(100, -100), StereoFrame::new(-32_768, 32_767)];
            assert_eq!(sink.write(&frames), 2);
            assert_eq!(sink.frames(), 2);
        }

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 44_100);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![100, -100, -32_768, 32_767]);
        std::fs::remove_file(&path).unwrap();
    }
}
