//! Bus cycle counting and reset debouncing
//!
//! [`BusClock`] is the state the interrupt context publishes to the
//! background loop: the free-running cycle count and the reset marker. Only
//! the real-time path writes it.
//!
//! [`ResetDebouncer`] lives inside the real-time path and counts consecutive
//! cycles with the reset line asserted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Consecutive asserted cycles required before a reset counts as real.
///
/// Shorter pulses are electrical noise on the reset line.
pub const RESET_DEBOUNCE_CYCLES: u32 = 100;

/// Consecutive asserted cycles after which a held reset asks the session
/// to return to its caller (roughly half a second on PAL).
pub const RETURN_TO_CALLER_RESET_CYCLES: u32 = 500_000;

/// Cycles the session must have run before a held reset may end it, so
/// the power-on reset does not.
pub const RETURN_TO_CALLER_MIN_CYCLES: u64 = 2_000_000;

/// Reset hand-over record published by the interrupt context
///
/// `epoch` increments on every debounced reset. `queue_index` holds the low
/// 32 bits of the event queue's write index at the moment of the reset:
/// everything before it belongs to the old session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResetMarker {
    /// Number of resets observed since the session started
    pub epoch: u32,
    /// Event-queue write index at the reset
    pub queue_index: u32,
}

impl ResetMarker {
    const fn pack(self) -> u64 {
        ((self.epoch as u64) << 32) | self.queue_index as u64
    }

    const fn unpack(raw: u64) -> Self {
        Self {
            epoch: (raw >> 32) as u32,
            queue_index: raw as u32,
        }
    }
}

/// Cycle counter shared between the interrupt context and the background loop
#[derive(Debug, Default)]
pub struct BusClock {
    cycles: AtomicU64,
    reset_marker: AtomicU64,
    return_requested: AtomicBool,
}

impl BusClock {
    /// Create a counter at cycle zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus cycles since the session start or the last reset.
    #[inline]
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }

    /// Latest reset marker.
    #[inline]
    pub fn reset_marker(&self) -> ResetMarker {
        ResetMarker::unpack(self.reset_marker.load(Ordering::Acquire))
    }

    /// True once a long reset hold asked the session to end.
    pub fn return_requested(&self) -> bool {
        self.return_requested.load(Ordering::Acquire)
    }

    /// Store the cycle count. Only the real-time path calls this, after any
    /// event stamped with `cycles` has been enqueued.
    #[inline]
    pub(crate) fn publish_cycles(&self, cycles: u64) {
        self.cycles.store(cycles, Ordering::Release);
    }

    /// Publish a debounced reset and restart the count at zero.
    pub(crate) fn publish_reset(&self, queue_write_index: usize) -> ResetMarker {
        let previous = self.reset_marker();
        let marker = ResetMarker {
            epoch: previous.epoch.wrapping_add(1),
            queue_index: queue_write_index as u32,
        };
        // Marker first: a consumer that sees post-reset events must also
        // see the marker.
        self.reset_marker.store(marker.pack(), Ordering::Release);
        self.cycles.store(0, Ordering::Release);
        marker
    }

    pub(crate) fn request_return(&self) {
        self.return_requested.store(true, Ordering::Release);
    }
}

/// What the reset line did on one bus cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetLine {
    /// Not asserted, no pending reset
    Idle,
    /// Asserted for the given number of consecutive cycles
    Held(u32),
    /// Released after a hold longer than [`RESET_DEBOUNCE_CYCLES`]
    Released,
}

/// Consecutive-cycle reset debouncer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetDebouncer {
    asserted_run: u32,
}

impl ResetDebouncer {
    /// Create an idle debouncer.
    pub const fn new() -> Self {
        Self { asserted_run: 0 }
    }

    /// Feed the reset line level for one cycle.
    #[inline]
    pub fn observe(&mut self, asserted: bool) -> ResetLine {
        if asserted {
            self.asserted_run = self.asserted_run.saturating_add(1);
            return ResetLine::Held(self.asserted_run);
        }

        let run = std::mem::take(&mut self.asserted_run);
        if run > RESET_DEBOUNCE_CYCLES {
            ResetLine::Released
        } else {
            ResetLine::Idle
        }
    }

    /// Consecutive asserted cycles so far.
    pub fn asserted_run(&self) -> u32 {
        self.asserted_run
    }
}
