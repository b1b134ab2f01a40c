//! Session entry point
//!
//! A session is built from an immutable [`SessionConfig`] and split into
//! two owned halves:
//!
//! - [`RealtimePath`], handed to the interrupt context;
//! - [`Session`], the background loop: reset hand-over, catch-up
//!   emulation, exit conditions.
//!
//! Nothing outlives the session. Changing the configuration means building
//! a new one.

use crate::clock;
use crate::config::SessionConfig;
use crate::counter::BusClock;
use crate::engine::Engine;
use crate::queue::{event_queue, EventConsumer, EVENT_QUEUE_CAPACITY};
use crate::realtime::{ReadBack, RealtimePath};
use crate::sink::AudioSink;
use crate::Result;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Sleep between background-loop iterations that found nothing to do.
pub const IDLE_SLEEP: Duration = Duration::from_micros(250);

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Timeout elapsed or a stop was requested
    Normal,
    /// Reset held long enough to hand control back to the caller
    ReturnToCaller,
}

/// Background half of a running session
pub struct Session {
    config: SessionConfig,
    clock: Arc<BusClock>,
    read_back: Arc<ReadBack>,
    consumer: EventConsumer,
    engine: Engine,
    sink: Box<dyn AudioSink>,
    calibrated: bool,
    epoch: u32,
    resets: u32,
    started: Instant,
    stop: Arc<AtomicBool>,
}

impl Session {
    /// Build a session whose bus clock will be measured when [`Session::run`]
    /// starts (or [`Session::calibrate`] is called).
    ///
    /// # Errors
    ///
    /// Returns [`crate::SidekickError::Config`] for an invalid configuration.
    pub fn start(config: SessionConfig, sink: Box<dyn AudioSink>) -> Result<(Self, RealtimePath)> {
        let fallback = config.fallback_clock_hz;
        let (mut session, realtime) = Self::with_clock(config, fallback, sink)?;
        session.calibrated = false;
        Ok((session, realtime))
    }

    /// Build a session with a known bus clock; no measurement takes place.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SidekickError::Config`] for an invalid configuration.
    pub fn with_clock(
        config: SessionConfig,
        clock_hz: u32,
        sink: Box<dyn AudioSink>,
    ) -> Result<(Self, RealtimePath)> {
        config.validate()?;

        let (producer, consumer) = event_queue(EVENT_QUEUE_CAPACITY);
        let clock = Arc::new(BusClock::new());
        let read_back = Arc::new(ReadBack::new());
        let engine = Engine::new(&config, clock_hz, Arc::clone(&read_back));
        let realtime = RealtimePath::new(&config, producer, Arc::clone(&clock), Arc::clone(&read_back));

        info!(
            "Session: SID1 {}, SID2 {}, mapping {:?}, FM {}, output {:?} at {} Hz",
            config.sid1,
            config
                .sid2
                .map_or_else(|| "off".to_string(), |model| model.to_string()),
            config.mapping,
            if config.fm_enabled { "on" } else { "off" },
            config.output,
            config.nominal_sample_rate,
        );

        let session = Self {
            config,
            clock,
            read_back,
            consumer,
            engine,
            sink,
            calibrated: true,
            epoch: 0,
            resets: 0,
            started: Instant::now(),
            stop: Arc::new(AtomicBool::new(false)),
        };
        Ok((session, realtime))
    }

    /// Measure the bus clock and rebuild the chips for it. Events queued
    /// during the measurement are dropped; emulation continues from the
    /// current bus cycle.
    pub fn calibrate(&mut self) -> u32 {
        let hz = clock::measure_clock(
            &self.clock,
            Duration::from_millis(self.config.clock_measure_ms),
            self.config.fallback_clock_hz,
        );

        self.engine = Engine::new(&self.config, hz, Arc::clone(&self.read_back));
        self.epoch = self.clock.reset_marker().epoch;
        let now = self.clock.cycles();
        self.consumer.refresh();
        let dropped = self.consumer.drain_up_to(now).count();
        debug!("Dropped {dropped} events queued during clock measurement");
        self.engine.rebase(now);
        self.calibrated = true;
        hz
    }

    /// One background-loop iteration: take over a pending reset, catch the
    /// chips up to the bus, then check the exit conditions.
    ///
    /// A return-to-caller request ends the session without catching up; a
    /// stop request or timeout ends it after this iteration's catch-up.
    /// A reset that lands while the iteration reads the bus state skips
    /// the catch-up.
    pub fn step(&mut self) -> Option<ExitReason> {
        if self.clock.return_requested() {
            return Some(ExitReason::ReturnToCaller);
        }

        // loaded first so the catch-up below covers every cycle published
        // before the stop
        let stopping = self.stop.load(Ordering::Acquire);

        let marker = self.clock.reset_marker();
        if marker.epoch != self.epoch {
            self.epoch = marker.epoch;
            self.resets += 1;
            let discarded = self.consumer.discard_until(marker.queue_index);
            self.engine.reset();
            debug!("Bus reset #{}: discarded {discarded} queued events", self.resets);
        }

        // cycles before refresh: the bus context publishes a count only
        // after enqueueing every event stamped with it, so the refreshed
        // snapshot covers everything up to `real_cycles`
        let real_cycles = self.clock.cycles();
        self.consumer.refresh();
        if self.clock.reset_marker().epoch != self.epoch {
            // reset landed in between; take it over next iteration
            return None;
        }
        self.engine
            .run_until(real_cycles, &mut self.consumer, self.sink.as_mut());

        let timed_out = self
            .config
            .timeout_secs
            .is_some_and(|limit| self.started.elapsed() >= Duration::from_secs(limit));
        if timed_out || stopping {
            return Some(ExitReason::Normal);
        }
        None
    }

    /// Run until an exit condition. Measures the bus clock first unless it
    /// was given or already measured.
    pub fn run(&mut self) -> ExitReason {
        if !self.calibrated {
            self.calibrate();
        }
        if self.sink.queue_occupancy().is_none() {
            warn!("Audio sink reports no queue occupancy; sample rate stays at nominal");
        }

        let reason = loop {
            if let Some(reason) = self.step() {
                break reason;
            }
            if self.engine.cycles() >= self.clock.cycles() {
                thread::sleep(IDLE_SLEEP);
            }
        };

        info!(
            "Session ended ({reason:?}) after {:.1}s: {} resets, {} events, {} samples, {} frames dropped",
            self.started.elapsed().as_secs_f64(),
            self.resets,
            self.engine.events_applied(),
            self.engine.samples(),
            self.engine.dropped_frames(),
        );
        reason
    }

    /// Flag that ends the session at the next iteration when set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Configuration snapshot.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Shared cycle counter.
    pub fn clock(&self) -> &Arc<BusClock> {
        &self.clock
    }

    /// The chip engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Debounced resets taken over so far.
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// Queued events not yet applied (as of the last step).
    pub fn pending_events(&self) -> usize {
        self.consumer.len()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("engine", &self.engine)
            .field("epoch", &self.epoch)
            .field("calibrated", &self.calibrated)
            .finish()
    }
}
