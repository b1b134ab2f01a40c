//! YM3812 (OPL2) FM synthesis
//!
//! Nine two-operator channels with the four OPL2 waveforms, tremolo and
//! vibrato LFOs, self-feedback on the first operator and either FM or
//! additive connection. Rhythm mode is not synthesised: channels 6–8 always
//! play as melodic channels.
//!
//! The chip is programmed through two ports like the real part: port 0
//! latches a register address, port 1 writes data to it.
//!
//! ```
//! use sidekick::Opl2;
//!
//! let mut fm = Opl2::new(44_100);
//! fm.write(0, 0x20);
//! fm.write(1, 0x01);
//! let _sample: i16 = fm.next_sample();
//! ```

pub mod operator;

pub use operator::{EnvelopeState, Operator};

use crate::backend::ChipBackend;
use std::f32::consts::TAU;

/// Master clock of the YM3812 on the cartridge.
pub const OPL2_CLOCK_HZ: u32 = 3_579_545;

/// Number of melodic channels.
pub const CHANNELS: usize = 9;

/// Status register flags
pub mod status {
    /// Any unmasked timer expired
    pub const IRQ: u8 = 0x80;
    /// Timer 1 expired
    pub const TIMER1: u8 = 0x40;
    /// Timer 2 expired
    pub const TIMER2: u8 = 0x20;
}

/// Peak of one channel in the i16 output; nine channels can clip.
const CHANNEL_GAIN: f32 = 8_192.0;

/// Peak modulator phase offset in cycles.
const MODULATION_DEPTH: f32 = 2.0;

const TREMOLO_HZ: f32 = 3.7;
const VIBRATO_HZ: f32 = 6.1;

/// Timer 1 tick in seconds; timer 2 counts four times slower.
const TIMER1_TICK: f64 = 80e-6;

/// Operator slot offsets ($20–$35 etc.) to (channel, operator).
const SLOTS: [Option<(usize, usize)>; 22] = [
    Some((0, 0)),
    Some((1, 0)),
    Some((2, 0)),
    Some((0, 1)),
    Some((1, 1)),
    Some((2, 1)),
    None,
    None,
    Some((3, 0)),
    Some((4, 0)),
    Some((5, 0)),
    Some((3, 1)),
    Some((4, 1)),
    Some((5, 1)),
    None,
    None,
    Some((6, 0)),
    Some((7, 0)),
    Some((8, 0)),
    Some((6, 1)),
    Some((7, 1)),
    Some((8, 1)),
];

#[derive(Debug, Clone, Default)]
struct Channel {
    operators: [Operator; 2],
    fnum: u16,
    block: u8,
    key_on: bool,
    feedback: u8,
    additive: bool,
    history: [f32; 2],
}

impl Channel {
    fn output(&mut self, tremolo_db: f32, vibrato: f32, waveform_select: bool) -> f32 {
        let feedback = if self.feedback == 0 {
            0.0
        } else {
            // FB=1 is pi/16 peak, each step doubles
            (self.history[0] + self.history[1]) / 2.0 / 32.0 * f32::from(1u8 << (self.feedback - 1))
        };
        let [modulator, carrier] = &mut self.operators;
        let first = modulator.output(feedback, tremolo_db, vibrato, waveform_select);
        self.history = [self.history[1], first];

        if self.additive {
            first + carrier.output(0.0, tremolo_db, vibrato, waveform_select)
        } else {
            carrier.output(first * MODULATION_DEPTH, tremolo_db, vibrato, waveform_select)
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Timer {
    reload: u8,
    running: bool,
    masked: bool,
    elapsed: f64,
}

/// OPL2 chip
#[derive(Debug, Clone)]
pub struct Opl2 {
    clock_hz: u32,
    sample_rate: u32,
    address: u8,
    registers: [u8; 256],
    channels: [Channel; CHANNELS],
    waveform_select: bool,
    note_select: bool,
    deep_tremolo: bool,
    deep_vibrato: bool,
    lfo_time: f32,
    timers: [Timer; 2],
    status: u8,
    last_sample: i16,
}

impl Opl2 {
    /// Chip at the cartridge clock producing `sample_rate` samples/s.
    pub fn new(sample_rate: u32) -> Self {
        Self::with_clocks(OPL2_CLOCK_HZ, sample_rate)
    }

    /// Chip with an explicit master clock.
    pub fn with_clocks(clock_hz: u32, sample_rate: u32) -> Self {
        Self {
            clock_hz,
            sample_rate: sample_rate.max(1),
            address: 0,
            registers: [0; 256],
            channels: Default::default(),
            waveform_select: false,
            note_select: false,
            deep_tremolo: false,
            deep_vibrato: false,
            lfo_time: 0.0,
            timers: [Timer::default(); 2],
            status: 0,
            last_sample: 0,
        }
    }

    /// Output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Change the output sample rate, keeping pitch.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        let sample_rate = sample_rate.max(1);
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            for channel in 0..CHANNELS {
                self.update_channel_frequency(channel);
            }
        }
    }

    /// Return to the power-on state.
    pub fn reset(&mut self) {
        *self = Self::with_clocks(self.clock_hz, self.sample_rate);
    }

    /// Port write: port 0 latches the address, port 1 writes data.
    pub fn write(&mut self, port: u8, value: u8) {
        if port & 1 == 0 {
            self.address = value;
        } else {
            self.set_register(self.address, value);
        }
    }

    /// Status register.
    pub fn status(&self) -> u8 {
        self.status
    }

    /// Last value written to a register.
    pub fn register(&self, register: u8) -> u8 {
        self.registers[register as usize]
    }

    /// Operator `index` (0 or 1) of `channel`.
    pub fn operator(&self, channel: usize, index: usize) -> &Operator {
        &self.channels[channel].operators[index]
    }

    /// Write data to a register directly.
    pub fn set_register(&mut self, register: u8, value: u8) {
        self.registers[register as usize] = value;
        match register {
            0x01 => self.waveform_select = value & 0x20 != 0,
            0x02 => self.timers[0].reload = value,
            0x03 => self.timers[1].reload = value,
            0x04 => self.write_timer_control(value),
            0x08 => self.note_select = value & 0x40 != 0,
            0x20..=0x35 | 0x40..=0x55 | 0x60..=0x75 | 0x80..=0x95 | 0xE0..=0xF5 => {
                self.write_operator(register, value)
            }
            0xA0..=0xA8 => {
                let channel = (register - 0xA0) as usize;
                let ch = &mut self.channels[channel];
                ch.fnum = (ch.fnum & 0x300) | u16::from(value);
                self.update_channel_frequency(channel);
            }
            0xB0..=0xB8 => {
                let channel = (register - 0xB0) as usize;
                let ch = &mut self.channels[channel];
                ch.fnum = (ch.fnum & 0x0FF) | (u16::from(value & 0x03) << 8);
                ch.block = (value >> 2) & 0x07;
                let key_on = value & 0x20 != 0;
                if key_on != ch.key_on {
                    ch.key_on = key_on;
                    for op in &mut ch.operators {
                        if key_on {
                            op.key_on();
                        } else {
                            op.key_off();
                        }
                    }
                }
                self.update_channel_frequency(channel);
            }
            0xBD => {
                self.deep_tremolo = value & 0x80 != 0;
                self.deep_vibrato = value & 0x40 != 0;
            }
            0xC0..=0xC8 => {
                let ch = &mut self.channels[(register - 0xC0) as usize];
                ch.feedback = (value >> 1) & 0x07;
                ch.additive = value & 0x01 != 0;
            }
            _ => {}
        }
    }

    /// Generate one output sample.
    pub fn next_sample(&mut self) -> i16 {
        let dt = 1.0 / self.sample_rate as f32;
        self.lfo_time = (self.lfo_time + dt) % 100.0;

        let tremolo_depth = if self.deep_tremolo { 4.8 } else { 1.0 };
        let tremolo_db = tremolo_depth * (1.0 - (TAU * TREMOLO_HZ * self.lfo_time).cos()) / 2.0;
        let cents = if self.deep_vibrato { 14.0 } else { 7.0 };
        let vibrato = 2f32.powf(cents * (TAU * VIBRATO_HZ * self.lfo_time).sin() / 1200.0);

        let mut mix = 0.0;
        for channel in &mut self.channels {
            for op in &mut channel.operators {
                op.clock_envelope(self.sample_rate);
            }
            mix += channel.output(tremolo_db, vibrato, self.waveform_select);
        }

        self.clock_timers(f64::from(dt));

        self.last_sample = (mix * CHANNEL_GAIN).clamp(-32_768.0, 32_767.0) as i16;
        self.last_sample
    }

    fn write_operator(&mut self, register: u8, value: u8) {
        let Some((channel, index)) = SLOTS.get((register & 0x1F) as usize).copied().flatten()
        else {
            return;
        };
        let op = &mut self.channels[channel].operators[index];
        match register & 0xE0 {
            0x20 => op.set_flags(value),
            0x40 => op.set_levels(value),
            0x60 => op.set_attack_decay(value),
            0x80 => op.set_sustain_release(value),
            _ => op.waveform = value & 0x03,
        }
        self.update_channel_frequency(channel);
    }

    fn update_channel_frequency(&mut self, channel: usize) {
        let chip_rate = f64::from(self.clock_hz) / 72.0;
        let sample_rate = self.sample_rate;
        let note_select = self.note_select;
        let ch = &mut self.channels[channel];

        let base_hz = f64::from(ch.fnum) * f64::from(1u32 << ch.block) * chip_rate / f64::from(1u32 << 20);
        let nts_bit = if note_select {
            (ch.fnum >> 8) & 1
        } else {
            (ch.fnum >> 9) & 1
        };
        let key_code = ch.block * 2 + nts_bit as u8;
        let (fnum, block) = (ch.fnum, ch.block);
        for op in &mut ch.operators {
            op.update_frequency(base_hz, sample_rate, fnum, block, key_code);
        }
    }

    fn write_timer_control(&mut self, value: u8) {
        if value & 0x80 != 0 {
            self.status = 0;
            return;
        }
        self.timers[0].masked = value & 0x40 != 0;
        self.timers[1].masked = value & 0x20 != 0;
        for (index, timer) in self.timers.iter_mut().enumerate() {
            let start = value & (1 << index) != 0;
            if start && !timer.running {
                timer.elapsed = 0.0;
            }
            timer.running = start;
        }
    }

    fn clock_timers(&mut self, dt: f64) {
        for (index, timer) in self.timers.iter_mut().enumerate() {
            if !timer.running {
                continue;
            }
            let tick = if index == 0 { TIMER1_TICK } else { TIMER1_TICK * 4.0 };
            let period = tick * f64::from(256 - u32::from(timer.reload));
            timer.elapsed += dt;
            if timer.elapsed >= period {
                timer.elapsed -= period;
                if !timer.masked {
                    self.status |= status::IRQ | if index == 0 { status::TIMER1 } else { status::TIMER2 };
                }
            }
        }
    }
}

impl ChipBackend for Opl2 {
    fn reset(&mut self) {
        Opl2::reset(self);
    }

    fn write_register(&mut self, port: u8, value: u8) {
        self.write(port, value);
    }

    fn read_register(&self, _port: u8) -> u8 {
        self.status
    }

    fn next_sample(&mut self) -> i16 {
        Opl2::next_sample(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Channel 0 sine at ~440 Hz, instant attack, full sustain.
    fn key_on_a4(fm: &mut Opl2) {
        for (register, value) in [
            (0x20, 0x21),
            (0x23, 0x21),
            (0x40, 0x3F),
            (0x43, 0x00),
            (0x60, 0xF0),
            (0x63, 0xF0),
            (0x80, 0x0F),
            (0x83, 0x0F),
            (0xA0, 0x44),
            (0xB0, 0x32),
        ] {
            fm.write(0, register);
            fm.write(1, value);
        }
    }

    #[test]
    fn test_silent_after_power_on() {
        let mut fm = Opl2::new(44_100);
        for _ in 0..1000 {
            assert_eq!(fm.next_sample(), 0);
        }
    }

    #[test]
    fn test_key_on_produces_tone() {
        let mut fm = Opl2::new(44_100);
        key_on_a4(&mut fm);
        let peak = (0..4410).map(|_| i32::from(fm.next_sample()).abs()).max().unwrap_or(0);
        assert!(peak > 4000, "peak {peak}");
        assert_eq!(fm.operator(0, 1).state(), EnvelopeState::Sustain);
    }

    #[test]
    fn test_key_off_releases() {
        let mut fm = Opl2::new(44_100);
        key_on_a4(&mut fm);
        for _ in 0..100 {
            fm.next_sample();
        }
        fm.write(0, 0xB0);
        fm.write(1, 0x12);
        for _ in 0..4410 {
            fm.next_sample();
        }
        assert_eq!(fm.operator(0, 1).state(), EnvelopeState::Off);
        assert_eq!(fm.next_sample(), 0);
    }

    #[test]
    fn test_port_latch() {
        let mut fm = Opl2::new(44_100);
        fm.write(0, 0xBD);
        fm.write(1, 0xC0);
        assert_eq!(fm.register(0xBD), 0xC0);
        fm.write(1, 0x00);
        assert_eq!(fm.register(0xBD), 0x00, "address stays latched");
    }

    #[test]
    fn test_invalid_slot_ignored() {
        let mut fm = Opl2::new(44_100);
        fm.set_register(0x26, 0xFF);
        assert_eq!(fm.register(0x26), 0xFF);
        for channel in 0..CHANNELS {
            assert_eq!(fm.operator(channel, 0).multiplier, 0);
            assert_eq!(fm.operator(channel, 1).multiplier, 0);
        }
    }

    #[test]
    fn test_timer1_sets_status() {
        let mut fm = Opl2::new(44_100);
        fm.set_register(0x02, 0xFF);
        fm.set_register(0x04, 0x01);
        for _ in 0..10 {
            fm.next_sample();
        }
        assert_eq!(fm.status(), status::IRQ | status::TIMER1);
        fm.set_register(0x04, 0x80);
        assert_eq!(fm.status(), 0);
    }

    #[test]
    fn test_sample_rate_change_keeps_running() {
        let mut fm = Opl2::new(44_100);
        key_on_a4(&mut fm);
        fm.set_sample_rate(48_000);
        assert_eq!(fm.sample_rate(), 48_000);
        let peak = (0..4800).map(|_| i32::from(fm.next_sample()).abs()).max().unwrap_or(0);
        assert!(peak > 4000);
    }

    #[test]
    fn test_reset_silences() {
        let mut fm = Opl2::new(44_100);
        key_on_a4(&mut fm);
        fm.next_sample();
        fm.reset();
        assert_eq!(fm.register(0xB0), 0);
        assert_eq!(fm.next_sample(), 0);
    }
}
