//! Model auto-detection responders
//!
//! Games and players check which SID is fitted with a fixed handshake:
//!
//! ```text
//! $D412 <- $FF, $D40E <- $FF, $D40F <- $FF   (voice 3 test bit, max freq)
//! $D412 <- $20                               (sawtooth)
//! read $D41B                                 (OSC3)
//! ```
//!
//! A real 8580 returns 2 and a 6581 returns 3 on that read. The Sound
//! Expander detection routine resets the FM timers and polls the status register for
//! the timer flags.

use crate::config::SidModel;
use crate::sid::registers::{control, CONTROL, OSC3, VOICE_STRIDE};

/// SID register read at the end of the handshake (OSC3).
pub const SID_DETECT_REGISTER: u8 = OSC3;

const VOICE3: u8 = 2 * VOICE_STRIDE;
// voice 3 frequency lo/hi and control
const SID_PRIMED_REGISTERS: [u8; 3] = [VOICE3, VOICE3 + 1, VOICE3 + CONTROL];
const SID_PRIME_VALUE: u8 = 0xFF;
const SID_TRIGGER: (u8, u8) = (VOICE3 + CONTROL, control::SAWTOOTH);
const SID_ALL_PRIMED: u8 = 0b111;

/// Step value once the full write sequence has been seen.
pub const SID_TERMINAL_STEP: u8 = 4;

/// Per-SID detection state
///
/// `step` counts the distinct priming registers seen in the current run of
/// handshake writes. The three priming writes may come in any order; any
/// write outside the handshake drops the run and the step back to 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SidDetection {
    step: u8,
    // bit i set: SID_PRIMED_REGISTERS[i] written with $FF in this run
    primed: u8,
    snapshot: [u8; 32],
}

impl Default for SidDetection {
    fn default() -> Self {
        Self::new()
    }
}

impl SidDetection {
    /// Fresh state, as after power-on or reset.
    pub const fn new() -> Self {
        Self {
            step: 0,
            primed: 0,
            snapshot: [0; 32],
        }
    }

    /// Forget the handshake progress and the register snapshot.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Current step.
    pub fn step(&self) -> u8 {
        self.step
    }

    /// Last value written to each register.
    pub fn snapshot(&self) -> &[u8; 32] {
        &self.snapshot
    }

    /// Track a register write.
    #[inline]
    pub fn on_write(&mut self, register: u8, value: u8) {
        let register = register & 0x1F;
        self.snapshot[register as usize] = value;

        let prime_bit = SID_PRIMED_REGISTERS
            .iter()
            .position(|&r| r == register)
            .filter(|_| value == SID_PRIME_VALUE)
            .map(|index| 1u8 << index);

        if (register, value) == SID_TRIGGER && self.primed == SID_ALL_PRIMED {
            self.primed = 0;
            self.step = SID_TERMINAL_STEP;
        } else if let Some(bit) = prime_bit {
            // a repeated priming write keeps the run alive without counting twice
            if self.step == SID_TERMINAL_STEP {
                self.primed = 0;
            }
            self.primed |= bit;
            self.step = self.primed.count_ones() as u8;
        } else {
            self.primed = 0;
            self.step = 0;
        }
    }

    /// Answer a register read if the handshake is complete and OSC3
    /// is read. Consumes the armed state.
    #[inline]
    pub fn on_read(&mut self, register: u8, model: SidModel) -> Option<u8> {
        if self.step == SID_TERMINAL_STEP && register & 0x1F == SID_DETECT_REGISTER {
            self.step = 0;
            Some(model.detection_sentinel())
        } else {
            None
        }
    }
}

/// IO2 offset of the FM status register as the detection routine polls it.
pub const FM_STATUS_OFFSET: u8 = 0x60;

/// Status value that the detection routine expects after the timers expire (both
/// timer flags plus the IRQ flag).
const FM_TIMER_FLAGS: u8 = 0xC0;

/// Sound Expander detection state
///
/// The detection routine writes timer-control register 4 twice (first 0x60 to mask
/// and reset the timers, then 0x80 to clear the IRQ) and then expects
/// the status register to alternate between idle and both timers expired.
/// The responder fakes that instead of running the OPL timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FmDetection {
    step: u8,
    fake_status: u8,
}

impl FmDetection {
    /// Fresh state.
    pub const fn new() -> Self {
        Self {
            step: 0,
            fake_status: 0,
        }
    }

    /// Forget the handshake progress.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Current step (4 when the full sequence was seen).
    pub fn step(&self) -> u8 {
        self.step
    }

    /// Track a write; `data_port` is false for the address port.
    #[inline]
    pub fn on_write(&mut self, data_port: bool, value: u8) {
        match (data_port, value, self.step) {
            (false, 0x04, 2) => self.step = 3,
            (false, 0x04, _) => self.step = 1,
            (true, 0x60, 1) => self.step = 2,
            (true, 0x80, 3) => {
                self.step = 4;
                self.fake_status = 0;
            }
            _ => {}
        }
    }

    /// Value returned by a status read; toggles on every read.
    #[inline]
    pub fn read_status(&mut self) -> u8 {
        let status = self.fake_status;
        self.fake_status = FM_TIMER_FLAGS - self.fake_status;
        status
    }
}
