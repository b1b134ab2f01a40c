//! Volume/pan mixing of the chip outputs
//!
//! A pure per-sample transform: each source is weighted per channel, the
//! weighted sum is shifted down by 8 bits and clamped. No buffering.

use crate::config::{OutputPath, SessionConfig};

/// Number of mixer inputs: SID 1, SID 2, FM.
pub const SOURCES: usize = 3;

/// Mixer input of the FM chip.
pub const FM_SOURCE: usize = 2;

/// Output clamp; slightly inside the i16 range so the PWM conversion
/// never wraps.
pub const OUTPUT_MIN: i32 = -31_766;
/// Upper output clamp.
pub const OUTPUT_MAX: i32 = 31_765;

/// Weight of a full-scale source after normalisation (unity gain).
pub const UNITY_WEIGHT: i32 = 256;

/// One interleaved stereo sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StereoFrame {
    /// Left channel
    pub left: i16,
    /// Right channel
    pub right: i16,
}

impl StereoFrame {
    /// Build a frame.
    pub const fn new(left: i16, right: i16) -> Self {
        Self { left, right }
    }

    /// Frame with both channels at zero.
    pub const fn silence() -> Self {
        Self { left: 0, right: 0 }
    }

    /// Average of both channels.
    pub fn mono(self) -> i16 {
        ((i32::from(self.left) + i32::from(self.right)) / 2) as i16
    }
}

/// Per-source channel weights (×256 fixed point)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MixWeights {
    /// Left weight per source
    pub left: [i32; SOURCES],
    /// Right weight per source
    pub right: [i32; SOURCES],
}

impl MixWeights {
    /// Weights for a session. Disabled sources get zero weight; the PWM
    /// path is normalised to [`UNITY_WEIGHT`].
    pub fn from_config(config: &SessionConfig) -> Self {
        let mixes = [
            Some(config.sid1_mix),
            config.sid2.map(|_| config.sid2_mix),
            config.fm_enabled.then_some(config.fm_mix),
        ];

        let mut weights = Self::default();
        for (index, mix) in mixes.iter().enumerate() {
            if let Some(mix) = mix {
                let (left, right) = mix.weights();
                weights.left[index] = left;
                weights.right[index] = right;
            }
        }

        if config.output == OutputPath::Pwm {
            weights.normalized()
        } else {
            weights
        }
    }

    /// Scale so the largest weight is [`UNITY_WEIGHT`]. All-zero weights
    /// stay zero.
    pub fn normalized(self) -> Self {
        let max = self
            .left
            .iter()
            .chain(self.right.iter())
            .copied()
            .max()
            .unwrap_or(0);
        if max == 0 {
            return self;
        }
        let scale = |w: i32| w * UNITY_WEIGHT / max;
        Self {
            left: self.left.map(scale),
            right: self.right.map(scale),
        }
    }
}

/// Stereo mixer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mixer {
    weights: MixWeights,
    stereo: bool,
}

impl Mixer {
    /// Mixer with explicit weights.
    pub fn new(weights: MixWeights, stereo: bool) -> Self {
        Self { weights, stereo }
    }

    /// Mixer for a session configuration.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(MixWeights::from_config(config), config.stereo_mix)
    }

    /// Active weights.
    pub fn weights(&self) -> &MixWeights {
        &self.weights
    }

    /// Mix one sample from each source.
    #[inline]
    pub fn mix(&self, sources: [i16; SOURCES]) -> StereoFrame {
        let mut left = 0i32;
        let mut right = 0i32;
        for (index, &sample) in sources.iter().enumerate() {
            left += i32::from(sample) * self.weights.left[index];
            right += i32::from(sample) * self.weights.right[index];
        }
        let left = (left >> 8).clamp(OUTPUT_MIN, OUTPUT_MAX) as i16;
        let right = (right >> 8).clamp(OUTPUT_MIN, OUTPUT_MAX) as i16;

        let frame = StereoFrame::new(left, right);
        if self.stereo {
            frame
        } else {
            let mono = frame.mono();
            StereoFrame::new(mono, mono)
        }
    }
}
