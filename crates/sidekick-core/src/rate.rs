//! Adaptive sample-rate control
//!
//! The bus clock that paces emulation and the audio sink's playback clock
//! are independent oscillators. Left alone, production and consumption
//! drift apart until the sink underruns or latency grows without bound.
//!
//! [`RateController`] watches the sink's queue occupancy once per generated
//! sample and, once per [`MEASUREMENT_WINDOW`], moves the generation rate by
//! at most [`RATE_STEP_HZ`]:
//!
//! 1. the first [`ACQUIRE_WINDOWS`] windows after a reset learn the sink's
//!    natural queueing delay as the target watermark (never below the
//!    configured minimum);
//! 2. the sink's real consumption rate is estimated from frames consumed
//!    over the last [`ESTIMATE_WINDOWS`] windows;
//! 3. the rate steps towards that estimate, biased by the occupancy error
//!    ([`OCCUPANCY_FRAMES_PER_HZ`]): below the watermark it runs faster,
//!    above it slower.
//!
//! Until enough windows exist for an estimate, the controller falls back to
//! plain up/down stepping outside a [`DEADBAND_FRAMES`] band.

use log::{debug, info};

/// Generated samples per measurement window.
pub const MEASUREMENT_WINDOW: u32 = 64;

/// Windows averaged before the watermark is locked.
pub const ACQUIRE_WINDOWS: u32 = 10;

/// Span, in windows, of the consumption-rate estimate (about six seconds
/// at 44.1 kHz). Long enough to resolve 1 Hz against whole-frame
/// occupancy readings.
pub const ESTIMATE_WINDOWS: usize = 4096;

/// Windows needed before the consumption-rate estimate is trusted.
pub const MIN_ESTIMATE_WINDOWS: usize = 16;

/// Occupancy error, in frames, worth one Hz of rate bias.
pub const OCCUPANCY_FRAMES_PER_HZ: f64 = 4.0;

/// Occupancy error, in frames, tolerated while no estimate exists.
pub const DEADBAND_FRAMES: i64 = 16;

/// Rate adjustment per window in Hz. Kept at 1 so pitch changes stay
/// inaudible.
pub const RATE_STEP_HZ: u32 = 1;

/// Maximum deviation from the nominal rate, in percent.
pub const MAX_DEVIATION_PERCENT: u32 = 10;

/// Occupancy below this share of the watermark (percent) while running
/// slow snaps the rate back to nominal.
pub const UNDERRUN_SNAP_PERCENT: i64 = 5;

/// Occupancy above this share of the watermark (percent) while running
/// fast snaps the rate back to nominal.
pub const OVERRUN_SNAP_PERCENT: i64 = 105;

/// Sample-rate controller
#[derive(Debug, Clone)]
pub struct RateController {
    nominal: u32,
    min_watermark: u32,
    rate: u32,
    samples_in_window: u32,
    occupancy_sum: u64,
    windows: u32,
    watermark: Option<u32>,
    last_average: Option<u32>,
    generated: u64,
    elapsed: f64,
    // (elapsed seconds, frames consumed) at the end of each window
    checkpoints: Vec<(f64, i64)>,
    checkpoint_len: usize,
    checkpoint_pos: usize,
    consumption_hz: Option<f64>,
}

impl RateController {
    /// Controller starting at `nominal` Hz that never targets fewer than
    /// `min_watermark` queued frames.
    pub fn new(nominal: u32, min_watermark: u32) -> Self {
        Self {
            nominal,
            min_watermark,
            rate: nominal,
            samples_in_window: 0,
            occupancy_sum: 0,
            windows: 0,
            watermark: None,
            last_average: None,
            generated: 0,
            elapsed: 0.0,
            checkpoints: vec![(0.0, 0); ESTIMATE_WINDOWS + 1],
            checkpoint_len: 0,
            checkpoint_pos: 0,
            consumption_hz: None,
        }
    }

    /// Current generation rate in Hz.
    #[inline]
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Nominal rate in Hz.
    pub fn nominal(&self) -> u32 {
        self.nominal
    }

    /// Locked target occupancy, `None` while still acquiring.
    pub fn watermark(&self) -> Option<u32> {
        self.watermark
    }

    /// Average occupancy of the last completed window.
    pub fn last_average(&self) -> Option<u32> {
        self.last_average
    }

    /// Estimated sink consumption rate in Hz, once enough windows exist.
    pub fn consumption_hz(&self) -> Option<f64> {
        self.consumption_hz
    }

    /// Completed measurement windows since the last reset.
    pub fn windows(&self) -> u32 {
        self.windows
    }

    /// Drop all statistics and re-acquire the watermark at the nominal rate.
    pub fn reset(&mut self) {
        self.rate = self.nominal;
        self.samples_in_window = 0;
        self.occupancy_sum = 0;
        self.windows = 0;
        self.watermark = None;
        self.last_average = None;
        self.generated = 0;
        self.elapsed = 0.0;
        self.checkpoints.fill((0.0, 0));
        self.checkpoint_len = 0;
        self.checkpoint_pos = 0;
        self.consumption_hz = None;
    }

    /// Account for one generated sample. `occupancy` is the sink's queued
    /// frame count after the sample was handed over, `None` if the sink
    /// cannot report it (nothing is measured then).
    ///
    /// Returns true when the rate changed.
    pub fn on_sample(&mut self, occupancy: Option<usize>) -> bool {
        let Some(occupancy) = occupancy else {
            return false;
        };

        self.generated += 1;
        self.elapsed += 1.0 / f64::from(self.rate);
        self.occupancy_sum += occupancy as u64;
        self.samples_in_window += 1;
        if self.samples_in_window < MEASUREMENT_WINDOW {
            return false;
        }

        let average = (self.occupancy_sum / u64::from(self.samples_in_window)) as u32;
        self.samples_in_window = 0;
        self.occupancy_sum = 0;
        self.windows = self.windows.saturating_add(1);
        self.last_average = Some(average);
        self.checkpoint(self.generated as i64 - occupancy as i64);

        let Some(watermark) = self.watermark else {
            if self.windows >= ACQUIRE_WINDOWS {
                let watermark = average.max(self.min_watermark);
                self.watermark = Some(watermark);
                info!("Rate control locked watermark at {watermark} frames");
            }
            return false;
        };

        self.adjust(i64::from(average), i64::from(watermark))
    }

    fn checkpoint(&mut self, consumed: i64) {
        let len = self.checkpoints.len();
        self.checkpoints[self.checkpoint_pos] = (self.elapsed, consumed);
        self.checkpoint_pos = (self.checkpoint_pos + 1) % len;
        if self.checkpoint_len < len {
            self.checkpoint_len += 1;
        }
        if self.checkpoint_len <= MIN_ESTIMATE_WINDOWS {
            self.consumption_hz = None;
            return;
        }

        let (since, consumed_then) = if self.checkpoint_len == len {
            self.checkpoints[self.checkpoint_pos]
        } else {
            self.checkpoints[0]
        };
        let seconds = self.elapsed - since;
        self.consumption_hz = (seconds > 0.0).then(|| (consumed - consumed_then) as f64 / seconds);
    }

    fn adjust(&mut self, average: i64, watermark: i64) -> bool {
        let error = average - watermark;
        let rate = f64::from(self.rate);
        let target = match self.consumption_hz {
            Some(hz) => hz - error as f64 / OCCUPANCY_FRAMES_PER_HZ,
            None if error < -DEADBAND_FRAMES => rate + 1.0,
            None if error > DEADBAND_FRAMES => rate - 1.0,
            None => rate,
        };
        let previous = self.rate;

        if target > rate + 0.5 {
            if average * 100 < watermark * UNDERRUN_SNAP_PERCENT && self.rate < self.nominal {
                self.rate = self.nominal;
            } else {
                self.rate += RATE_STEP_HZ;
            }
        } else if target < rate - 0.5 {
            if average * 100 > watermark * OVERRUN_SNAP_PERCENT && self.rate > self.nominal {
                self.rate = self.nominal;
            } else {
                self.rate -= RATE_STEP_HZ;
            }
        }

        let span = self.nominal / 100 * MAX_DEVIATION_PERCENT;
        self.rate = self.rate.clamp(self.nominal - span, self.nominal + span);

        if self.rate != previous {
            debug!(
                "Sample rate {previous} -> {} Hz (avg {average}, target {watermark})",
                self.rate
            );
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOMINAL: u32 = 44_100;

    /// Sink draining `consume_hz` frames per second while the controller
    /// generates at its own rate. Returns the lowest occupancy seen.
    fn simulate(
        controller: &mut RateController,
        consume_hz: f64,
        start_frames: f64,
        windows: u32,
    ) -> f64 {
        let mut occupancy = start_frames;
        let mut lowest = occupancy;
        for _ in 0..windows * MEASUREMENT_WINDOW {
            occupancy += 1.0 - consume_hz / f64::from(controller.rate());
            lowest = lowest.min(occupancy);
            controller.on_sample(Some(occupancy.max(0.0) as usize));
        }
        lowest
    }

    fn lock_at(controller: &mut RateController, occupancy: usize) {
        for _ in 0..ACQUIRE_WINDOWS * MEASUREMENT_WINDOW {
            controller.on_sample(Some(occupancy));
        }
    }

    #[test]
    fn test_acquires_watermark_after_window_count() {
        let mut controller = RateController::new(NOMINAL, 512);
        for _ in 0..(ACQUIRE_WINDOWS - 1) * MEASUREMENT_WINDOW {
            controller.on_sample(Some(2000));
        }
        assert_eq!(controller.watermark(), None);
        for _ in 0..MEASUREMENT_WINDOW {
            controller.on_sample(Some(2000));
        }
        assert_eq!(controller.watermark(), Some(2000));
        assert_eq!(controller.rate(), NOMINAL);
    }

    #[test]
    fn test_watermark_never_below_minimum() {
        let mut controller = RateController::new(NOMINAL, 512);
        lock_at(&mut controller, 100);
        assert_eq!(controller.watermark(), Some(512));
    }

    #[test]
    fn test_unavailable_sink_measures_nothing() {
        let mut controller = RateController::new(NOMINAL, 512);
        for _ in 0..10_000 {
            assert!(!controller.on_sample(None));
        }
        assert_eq!(controller.windows(), 0);
        assert_eq!(controller.rate(), NOMINAL);
    }

    #[test]
    fn test_low_occupancy_raises_rate_one_step() {
        let mut controller = RateController::new(NOMINAL, 512);
        lock_at(&mut controller, 2000);
        let mut changed = false;
        for _ in 0..MEASUREMENT_WINDOW {
            changed |= controller.on_sample(Some(1900));
        }
        assert!(changed);
        assert_eq!(controller.rate(), NOMINAL + RATE_STEP_HZ);
    }

    #[test]
    fn test_steady_sink_holds_nominal_rate() {
        let mut controller = RateController::new(NOMINAL, 512);
        for _ in 0..200 * MEASUREMENT_WINDOW {
            controller.on_sample(Some(2000));
        }
        let estimate = controller.consumption_hz().unwrap();
        assert!((estimate - f64::from(NOMINAL)).abs() < 0.01, "estimate {estimate}");
        assert_eq!(controller.rate(), NOMINAL);
    }

    #[test]
    fn test_deep_underrun_snaps_to_nominal() {
        let mut controller = RateController::new(NOMINAL, 512);
        lock_at(&mut controller, 2000);
        // a full buffer drives the rate below nominal
        for _ in 0..50 * MEASUREMENT_WINDOW {
            controller.on_sample(Some(2500));
        }
        assert!(controller.rate() < NOMINAL);
        for _ in 0..MEASUREMENT_WINDOW {
            controller.on_sample(Some(10));
        }
        assert_eq!(controller.rate(), NOMINAL);
    }

    #[test]
    fn test_rate_is_clamped() {
        let mut controller = RateController::new(NOMINAL, 512);
        lock_at(&mut controller, 4000);
        for _ in 0..10_000 * MEASUREMENT_WINDOW {
            controller.on_sample(Some(600));
        }
        assert_eq!(controller.rate(), NOMINAL + NOMINAL / 100 * MAX_DEVIATION_PERCENT);
    }

    #[test]
    fn test_reset_reacquires() {
        let mut controller = RateController::new(NOMINAL, 512);
        lock_at(&mut controller, 1000);
        for _ in 0..20 * MEASUREMENT_WINDOW {
            controller.on_sample(Some(800));
        }
        assert!(controller.rate() > NOMINAL);
        controller.reset();
        assert_eq!(controller.watermark(), None);
        assert_eq!(controller.windows(), 0);
        assert_eq!(controller.rate(), NOMINAL);
        assert_eq!(controller.last_average(), None);
        assert_eq!(controller.consumption_hz(), None);
    }

    #[test]
    fn test_converges_on_faster_sink() {
        let consume = f64::from(NOMINAL) * 1.045;
        let mut controller = RateController::new(NOMINAL, 512);
        let lowest = simulate(&mut controller, consume, 4096.0, 40_000);

        let watermark = f64::from(controller.watermark().unwrap());
        let average = f64::from(controller.last_average().unwrap());
        assert!(lowest > 0.0, "sink ran dry (lowest occupancy {lowest})");
        assert!(
            (f64::from(controller.rate()) - consume).abs() <= 1.0,
            "rate {} did not settle at {consume}",
            controller.rate()
        );
        assert!(
            (average - watermark).abs() < 64.0,
            "occupancy {average} did not return to watermark {watermark}"
        );
    }

    #[test]
    fn test_converges_on_slower_sink() {
        let consume = f64::from(NOMINAL) * 0.96;
        let mut controller = RateController::new(NOMINAL, 512);
        simulate(&mut controller, consume, 2048.0, 40_000);

        let watermark = f64::from(controller.watermark().unwrap());
        let average = f64::from(controller.last_average().unwrap());
        assert!((f64::from(controller.rate()) - consume).abs() <= 1.0);
        assert!((average - watermark).abs() < 64.0);
    }
}
