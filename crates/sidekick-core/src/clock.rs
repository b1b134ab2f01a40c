//! Bus clock measurement
//!
//! Crystal tolerance on the host computer is not guaranteed, so the
//! session counts real bus cycles over a wall-clock interval instead of
//! assuming the nominal PAL/NTSC frequency.

use crate::counter::BusClock;
use log::{info, warn};
use std::thread;
use std::time::{Duration, Instant};

/// Bus cycles that must be observed before the measurement interval
/// starts, so a machine still powering up is not measured.
pub const STARTUP_CYCLES: u64 = 10;

/// Polling interval while waiting for the first cycles.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Cycles per second from a cycle count over `elapsed`, `None` if nothing
/// was counted.
pub fn clock_from_count(cycles: u64, elapsed: Duration) -> Option<u32> {
    let nanos = elapsed.as_nanos();
    if cycles == 0 || nanos == 0 {
        return None;
    }
    let hz = u128::from(cycles) * 1_000_000_000 / nanos;
    u32::try_from(hz).ok().filter(|&hz| hz > 0)
}

/// Measure the bus clock over `interval`.
///
/// Waits up to `interval` for [`STARTUP_CYCLES`] cycles, then counts the
/// cycles published during a second `interval`. Falls back to
/// `fallback_hz` if the bus stays silent or a reset restarts the count
/// mid-measurement.
pub fn measure_clock(clock: &BusClock, interval: Duration, fallback_hz: u32) -> u32 {
    let wait_until = Instant::now() + interval;
    while clock.cycles() < STARTUP_CYCLES {
        if Instant::now() >= wait_until {
            warn!("No bus activity; assuming {fallback_hz} Hz");
            return fallback_hz;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let start_cycles = clock.cycles();
    let started = Instant::now();
    thread::sleep(interval);
    let end_cycles = clock.cycles();
    let elapsed = started.elapsed();

    match end_cycles
        .checked_sub(start_cycles)
        .and_then(|cycles| clock_from_count(cycles, elapsed))
    {
        Some(hz) => {
            info!("Measured bus clock: {hz} Hz");
            hz
        }
        None => {
            warn!("Bus clock measurement failed; assuming {fallback_hz} Hz");
            fallback_hz
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_count_to_hz() {
        assert_eq!(
            clock_from_count(985_248, Duration::from_secs(1)),
            Some(985_248)
        );
        assert_eq!(
            clock_from_count(511_363, Duration::from_millis(500)),
            Some(1_022_726)
        );
        assert_eq!(clock_from_count(0, Duration::from_secs(1)), None);
        assert_eq!(clock_from_count(10, Duration::ZERO), None);
    }

    #[test]
    fn test_silent_bus_falls_back() {
        let clock = BusClock::new();
        assert_eq!(measure_clock(&clock, Duration::from_millis(5), 985_248), 985_248);
    }

    #[test]
    fn test_measures_running_bus() {
        let clock = Arc::new(BusClock::new());
        let running = Arc::new(AtomicBool::new(true));
        let driver = thread::spawn({
            let clock = Arc::clone(&clock);
            let running = Arc::clone(&running);
            move || {
                let mut cycles = 0;
                while running.load(Ordering::Relaxed) {
                    cycles += 1_000;
                    clock.publish_cycles(cycles);
                    thread::sleep(Duration::from_micros(100));
                }
            }
        });

        let hz = measure_clock(&clock, Duration::from_millis(50), 1);
        running.store(false, Ordering::Relaxed);
        driver.join().unwrap();
        assert!(hz > 1, "expected a measured clock, got the fallback");
    }
}
