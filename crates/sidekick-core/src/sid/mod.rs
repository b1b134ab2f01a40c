//! MOS 6581/8580 SID emulation
//!
//! The analog side (voices, envelopes, the model-specific filter and the
//! C64 output stage) is reSID via `resid-rs`. [`Sid`] wraps it with what
//! the cartridge needs on top: slice stepping with a cycle count, the last
//! value written to every register, OSC3/ENV3 read-back that can be served
//! through `&self`, and the external-input bias that makes `$D418` digis
//! audible on an 8580 with digi boost.

pub mod registers;

use std::fmt;

use crate::backend::ChipBackend;
use crate::config::SidModel;
use registers::{is_read_only, ENV3, OSC3, POT_X, POT_Y};
use resid::ChipModel;

/// External input fed to an 8580 with digi boost (full negative swing).
const DIGI_BOOST_INPUT: i32 = -32_768;

/// Paddle lines float high with nothing attached.
const POT_FLOATING: u8 = 0xFF;

/// SID chip
pub struct Sid {
    model: SidModel,
    chip: resid::Sid,
    registers: [u8; 32],
    // Refreshed after every clock slice so reads stay `&self`.
    osc3: u8,
    env3: u8,
    output: i16,
    cycles: u64,
}

impl Sid {
    /// Create a chip of the given model in its power-on state.
    pub fn new(model: SidModel) -> Self {
        let chip_model = if model.is_8580() {
            ChipModel::Mos8580
        } else {
            ChipModel::Mos6581
        };
        let mut sid = Self {
            model,
            chip: resid::Sid::new(chip_model),
            registers: [0; 32],
            osc3: 0,
            env3: 0,
            output: 0,
            cycles: 0,
        };
        sid.reset();
        sid
    }

    /// Chip model.
    pub fn model(&self) -> SidModel {
        self.model
    }

    /// Emulated cycles since the last reset.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Restore the power-on state and clear the writable registers.
    pub fn reset(&mut self) {
        self.chip.reset();
        if self.model == SidModel::Mos8580DigiBoost {
            self.chip.input(DIGI_BOOST_INPUT);
        }
        self.registers = [0; 32];
        self.cycles = 0;
        self.sync_outputs();
    }

    /// Write a register ($00–$1F; read-only registers are ignored).
    pub fn write(&mut self, register: u8, value: u8) {
        let register = register & 0x1F;
        if is_read_only(register) {
            return;
        }
        self.registers[register as usize] = value;
        self.chip.write(register, value);
    }

    /// Read a register the way the chip answers it: paddles float high,
    /// OSC3/ENV3 are live, everything else reads 0.
    pub fn read(&self, register: u8) -> u8 {
        match register & 0x1F {
            POT_X | POT_Y => POT_FLOATING,
            OSC3 => self.osc3,
            ENV3 => self.env3,
            _ => 0,
        }
    }

    /// Last value written to a register.
    pub fn register(&self, register: u8) -> u8 {
        self.registers[(register & 0x1F) as usize]
    }

    /// All 32 written register values.
    pub fn registers(&self) -> &[u8; 32] {
        &self.registers
    }

    /// Advance the chip by `cycles` CPU cycles.
    pub fn clock(&mut self, cycles: u32) {
        if cycles == 0 {
            return;
        }
        self.chip.clock_delta(cycles);
        self.cycles += u64::from(cycles);
        self.sync_outputs();
    }

    /// Current output sample.
    #[inline]
    pub fn output(&self) -> i16 {
        self.output
    }

    fn sync_outputs(&mut self) {
        self.osc3 = self.chip.read(OSC3);
        self.env3 = self.chip.read(ENV3);
        self.output = self.chip.output();
    }
}

impl fmt::Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sid")
            .field("model", &self.model)
            .field("registers", &self.registers)
            .field("osc3", &self.osc3)
            .field("env3", &self.env3)
            .field("output", &self.output)
            .field("cycles", &self.cycles)
            .finish_non_exhaustive()
    }
}

impl ChipBackend for Sid {
    fn reset(&mut self) {
        Sid::reset(self);
    }

    fn write_register(&mut self, register: u8, value: u8) {
        self.write(register, value);
    }

    fn read_register(&self, register: u8) -> u8 {
        self.read(register)
    }

    fn clock(&mut self, cycles: u32) {
        Sid::clock(self, cycles);
    }

    fn next_sample(&mut self) -> i16 {
        self.output()
    }
}
