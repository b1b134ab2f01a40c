//! FM operator: phase generator, envelope and waveform

use std::f32::consts::TAU;

/// Full attenuation range of the envelope in dB.
pub const MAX_ATTENUATION_DB: f32 = 96.0;

/// Seconds for a full 96 dB decay at effective rate 4 (register value 1).
const DECAY_BASE_SECONDS: f32 = 39.28;

/// Seconds for a full attack at effective rate 4.
const ATTACK_BASE_SECONDS: f32 = 2.826;

/// Frequency multiplier table, doubled so 0 means x0.5.
const MULTIPLIER_X2: [u32; 16] = [1, 2, 4, 6, 8, 10, 12, 14, 16, 18, 20, 20, 24, 24, 30, 30];

/// Key-scale-level attenuation at block 7 in dB, by the top 4 F-number bits.
const KSL_DB: [f32; 16] = [
    0.0, 9.0, 12.0, 13.875, 15.0, 16.125, 16.875, 17.625, 18.0, 18.75, 19.125, 19.5, 19.875,
    20.25, 20.625, 21.0,
];

/// Envelope state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    /// Silent
    Off,
    /// Key on, rising
    Attack,
    /// Falling towards the sustain level
    Decay,
    /// Holding (or falling at the release rate if not sustained)
    Sustain,
    /// Key off
    Release,
}

/// One of the two operators of a channel
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    pub(crate) tremolo: bool,
    pub(crate) vibrato: bool,
    pub(crate) sustained: bool,
    pub(crate) key_scale_rate: bool,
    pub(crate) multiplier: u8,
    pub(crate) key_scale_level: u8,
    pub(crate) total_level: u8,
    pub(crate) attack: u8,
    pub(crate) decay: u8,
    pub(crate) sustain_level: u8,
    pub(crate) release: u8,
    pub(crate) waveform: u8,

    phase: u32,
    phase_step: u32,
    rate_offset: u8,
    ksl_db: f32,
    attenuation_db: f32,
    state: EnvelopeState,
}

impl Default for Operator {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator {
    /// Silent operator with all parameters cleared.
    pub const fn new() -> Self {
        Self {
            tremolo: false,
            vibrato: false,
            sustained: false,
            key_scale_rate: false,
            multiplier: 0,
            key_scale_level: 0,
            total_level: 0,
            attack: 0,
            decay: 0,
            sustain_level: 0,
            release: 0,
            waveform: 0,
            phase: 0,
            phase_step: 0,
            rate_offset: 0,
            ksl_db: 0.0,
            attenuation_db: MAX_ATTENUATION_DB,
            state: EnvelopeState::Off,
        }
    }

    /// Register $20+: AM, VIB, EGT, KSR, MULT.
    pub fn set_flags(&mut self, value: u8) {
        self.tremolo = value & 0x80 != 0;
        self.vibrato = value & 0x40 != 0;
        self.sustained = value & 0x20 != 0;
        self.key_scale_rate = value & 0x10 != 0;
        self.multiplier = value & 0x0F;
    }

    /// Register $40+: KSL, TL.
    pub fn set_levels(&mut self, value: u8) {
        self.key_scale_level = value >> 6;
        self.total_level = value & 0x3F;
    }

    /// Register $60+: AR, DR.
    pub fn set_attack_decay(&mut self, value: u8) {
        self.attack = value >> 4;
        self.decay = value & 0x0F;
    }

    /// Register $80+: SL, RR.
    pub fn set_sustain_release(&mut self, value: u8) {
        self.sustain_level = value >> 4;
        self.release = value & 0x0F;
    }

    /// Envelope state.
    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    /// Current envelope attenuation in dB.
    pub fn attenuation_db(&self) -> f32 {
        self.attenuation_db
    }

    /// Recompute the phase step and key scaling for a channel frequency.
    ///
    /// `base_hz` is the channel frequency before the multiplier; `key_code`
    /// is block * 2 plus the note-select bit.
    pub(crate) fn update_frequency(
        &mut self,
        base_hz: f64,
        sample_rate: u32,
        fnum: u16,
        block: u8,
        key_code: u8,
    ) {
        let hz = base_hz * f64::from(MULTIPLIER_X2[self.multiplier as usize]) / 2.0;
        self.phase_step = (hz / f64::from(sample_rate.max(1)) * 4_294_967_296.0) as u64 as u32;

        self.rate_offset = if self.key_scale_rate {
            key_code
        } else {
            key_code >> 2
        };

        let ksl = (KSL_DB[(fnum >> 6) as usize & 0x0F] - 6.0 * f32::from(7 - block.min(7))).max(0.0);
        self.ksl_db = match self.key_scale_level {
            0 => 0.0,
            1 => ksl / 2.0,
            2 => ksl / 4.0,
            _ => ksl,
        };
    }

    /// Start the attack phase.
    pub(crate) fn key_on(&mut self) {
        if matches!(self.state, EnvelopeState::Off | EnvelopeState::Release) {
            self.phase = 0;
            self.state = EnvelopeState::Attack;
        }
    }

    /// Start the release phase.
    pub(crate) fn key_off(&mut self) {
        if self.state != EnvelopeState::Off {
            self.state = EnvelopeState::Release;
        }
    }

    /// Advance the envelope by one output sample.
    pub(crate) fn clock_envelope(&mut self, sample_rate: u32) {
        let rate = sample_rate.max(1) as f32;
        match self.state {
            EnvelopeState::Off => {}
            EnvelopeState::Attack => match self.seconds(self.attack, ATTACK_BASE_SECONDS) {
                Some(seconds) if seconds > 0.0 => {
                    self.attenuation_db -= MAX_ATTENUATION_DB / (seconds * rate);
                    if self.attenuation_db <= 0.0 {
                        self.attenuation_db = 0.0;
                        self.state = EnvelopeState::Decay;
                    }
                }
                Some(_) => {
                    self.attenuation_db = 0.0;
                    self.state = EnvelopeState::Decay;
                }
                None => {}
            },
            EnvelopeState::Decay => {
                let target = self.sustain_db();
                self.fall(self.decay, rate);
                if self.attenuation_db >= target {
                    self.attenuation_db = target;
                    self.state = EnvelopeState::Sustain;
                }
            }
            EnvelopeState::Sustain => {
                if !self.sustained {
                    self.fall(self.release, rate);
                    self.check_silent();
                }
            }
            EnvelopeState::Release => {
                self.fall(self.release, rate);
                self.check_silent();
            }
        }
    }

    /// Produce one sample in [-1, 1]. `modulation` is a phase offset in
    /// cycles; `tremolo_db` and `vibrato` come from the chip LFOs.
    pub(crate) fn output(
        &mut self,
        modulation: f32,
        tremolo_db: f32,
        vibrato: f32,
        waveform_select: bool,
    ) -> f32 {
        let step = if self.vibrato {
            (self.phase_step as f32 * vibrato) as u32
        } else {
            self.phase_step
        };
        self.phase = self.phase.wrapping_add(step);

        if self.state == EnvelopeState::Off {
            return 0.0;
        }

        let mut attenuation =
            self.attenuation_db + f32::from(self.total_level) * 0.75 + self.ksl_db;
        if self.tremolo {
            attenuation += tremolo_db;
        }
        if attenuation >= MAX_ATTENUATION_DB {
            return 0.0;
        }

        let position = (self.phase as f32 / 4_294_967_296.0 + modulation).rem_euclid(1.0);
        let waveform = if waveform_select { self.waveform } else { 0 };
        waveform_sample(waveform, position) * 10f32.powf(-attenuation / 20.0)
    }

    fn sustain_db(&self) -> f32 {
        if self.sustain_level == 15 {
            MAX_ATTENUATION_DB - 3.0
        } else {
            f32::from(self.sustain_level) * 3.0
        }
    }

    /// Seconds for a full sweep at `setting`, `None` if the rate is 0
    /// (frozen) and `Some(0.0)` for instant.
    fn seconds(&self, setting: u8, base: f32) -> Option<f32> {
        if setting == 0 {
            return None;
        }
        let effective = (u32::from(setting) * 4 + u32::from(self.rate_offset)).min(63);
        if base == ATTACK_BASE_SECONDS && effective >= 60 {
            return Some(0.0);
        }
        Some(base / 2f32.powf((effective as f32 - 4.0) / 4.0))
    }

    fn fall(&mut self, setting: u8, rate: f32) {
        if let Some(seconds) = self.seconds(setting, DECAY_BASE_SECONDS) {
            self.attenuation_db += MAX_ATTENUATION_DB / (seconds * rate);
        }
    }

    fn check_silent(&mut self) {
        if self.attenuation_db >= MAX_ATTENUATION_DB {
            self.attenuation_db = MAX_ATTENUATION_DB;
            self.state = EnvelopeState::Off;
        }
    }
}

/// Sample of OPL2 waveform `select` (0–3) at `position` in [0, 1).
pub fn waveform_sample(select: u8, position: f32) -> f32 {
    let sine = (TAU * position).sin();
    match select & 0x03 {
        0 => sine,
        1 => sine.max(0.0),
        2 => sine.abs(),
        _ => {
            // first and third quarter only
            if (position * 4.0) as u32 % 2 == 0 {
                sine.abs()
            } else {
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_waveforms() {
        assert_relative_eq!(waveform_sample(0, 0.25), 1.0);
        assert_relative_eq!(waveform_sample(1, 0.75), 0.0);
        assert_relative_eq!(waveform_sample(2, 0.75), 1.0, epsilon = 1e-6);
        assert_relative_eq!(waveform_sample(3, 0.375), 0.0);
        assert!(waveform_sample(3, 0.625) > 0.5);
    }

    #[test]
    fn test_instant_attack_then_sustain() {
        let mut op = Operator::new();
        op.set_attack_decay(0xF0);
        op.set_sustain_release(0x00);
        op.set_flags(0x20);
        op.key_on();
        op.clock_envelope(44_100);
        assert_eq!(op.state(), EnvelopeState::Decay);
        op.clock_envelope(44_100);
        assert_eq!(op.state(), EnvelopeState::Sustain);
        assert_relative_eq!(op.attenuation_db(), 0.0);
    }

    #[test]
    fn test_release_goes_silent() {
        let mut op = Operator::new();
        op.set_attack_decay(0xF0);
        op.set_sustain_release(0x0F);
        op.key_on();
        op.clock_envelope(44_100);
        op.key_off();
        for _ in 0..10_000 {
            op.clock_envelope(44_100);
        }
        assert_eq!(op.state(), EnvelopeState::Off);
    }

    #[test]
    fn test_zero_attack_rate_freezes() {
        let mut op = Operator::new();
        op.key_on();
        for _ in 0..1000 {
            op.clock_envelope(44_100);
        }
        assert_eq!(op.state(), EnvelopeState::Attack);
        assert_relative_eq!(op.attenuation_db(), MAX_ATTENUATION_DB);
    }

    #[test]
    fn test_key_scale_level_lowers_high_notes() {
        let mut op = Operator::new();
        op.set_levels(0xC0);
        op.update_frequency(440.0, 44_100, 0x3FF, 7, 14);
        assert_relative_eq!(op.ksl_db, 21.0);
        op.update_frequency(440.0, 44_100, 0x3FF, 3, 6);
        assert_relative_eq!(op.ksl_db, 0.0);
    }
}
