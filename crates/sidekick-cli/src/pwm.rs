//! Host stand-in for the PWM timer
//!
//! On the cartridge a timer interrupt pulls one frame per sample period
//! and loads the duty values into the PWM peripheral. Here a thread pulls
//! frames at the same average rate and keeps the last duty pair.

use log::debug;
use sidekick::PeriodicOutput;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// PWM counter range of the output pins.
pub const PWM_RANGE: u32 = 4096;

const TICK: Duration = Duration::from_millis(1);

/// Running timer thread
pub struct PwmTimer {
    running: Arc<AtomicBool>,
    handle: JoinHandle<PeriodicOutput>,
}

impl PwmTimer {
    /// Start pulling `sample_rate` frames per second from `output`.
    pub fn spawn(mut output: PeriodicOutput, sample_rate: u32) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let handle = thread::Builder::new().name("sidekick-pwm".into()).spawn({
            let running = Arc::clone(&running);
            move || {
                let started = Instant::now();
                let mut pulled = 0u64;
                let mut duty = (0, 0);
                while running.load(Ordering::Relaxed) {
                    let due = (started.elapsed().as_secs_f64() * f64::from(sample_rate)) as u64;
                    while pulled < due {
                        duty = output.next_duty();
                        pulled += 1;
                    }
                    thread::sleep(TICK);
                }
                debug!("PWM timer stopped after {pulled} frames, last duty {duty:?}");
                output
            }
        })?;
        Ok(Self { running, handle })
    }

    /// Stop the thread and return the output handle (for its underrun count).
    pub fn stop(self) -> Option<PeriodicOutput> {
        self.running.store(false, Ordering::Relaxed);
        self.handle.join().ok()
    }
}
