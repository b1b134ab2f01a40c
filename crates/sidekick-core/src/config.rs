//! Session configuration snapshot
//!
//! Produced by the menu/settings side, read once at session start and
//! immutable afterwards. Changing anything requires a new session.

use crate::{Result, SidekickError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Nominal output sample rate in Hz.
pub const NOMINAL_SAMPLE_RATE: u32 = 44_100;

/// PAL C64 CPU clock, used when the bus clock cannot be measured.
pub const PAL_CLOCK_HZ: u32 = 985_248;

/// NTSC C64 CPU clock.
pub const NTSC_CLOCK_HZ: u32 = 1_022_727;

/// Highest volume setting.
pub const MAX_VOLUME: u8 = 15;

/// Highest pan setting (0 = hard left, 7 = centre, 14 = hard right).
pub const MAX_PAN: u8 = 14;

/// Emulated SID variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidModel {
    /// MOS 6581 (original breadbin C64)
    Mos6581,
    /// MOS 8580 (C64C)
    Mos8580,
    /// MOS 8580 with an external-input bias so volume-register digis play
    Mos8580DigiBoost,
}

impl SidModel {
    /// True for both 8580 variants.
    pub fn is_8580(self) -> bool {
        !matches!(self, SidModel::Mos6581)
    }

    /// Value the detection handshake reads back for this model.
    pub fn detection_sentinel(self) -> u8 {
        if self.is_8580() {
            2
        } else {
            3
        }
    }

    /// Cycles a value written to the SID stays readable from its write-only
    /// registers before the data bus fades to zero.
    pub fn bus_value_ttl(self) -> u32 {
        if self.is_8580() {
            0xA2000
        } else {
            0x1D00
        }
    }
}

impl std::fmt::Display for SidModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SidModel::Mos6581 => "6581",
            SidModel::Mos8580 => "8580",
            SidModel::Mos8580DigiBoost => "8580+digiboost",
        })
    }
}

/// Where the second SID lives in the C64 address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressMapping {
    /// One SID at $D400; the second slot must be disabled
    Single,
    /// Both SIDs share $D400 and receive every write
    Mirrored,
    /// Second SID at $D420 (A5 selects)
    D420,
    /// Second SID at $D500 (A8 selects)
    D500,
    /// Second SID in the IO1 area at $DE00
    De00,
}

impl AddressMapping {
    /// True if the mapping needs a second chip.
    pub fn is_dual(self) -> bool {
        !matches!(self, AddressMapping::Single)
    }
}

/// Which sink receives the mixed stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputPath {
    /// Direct periodic output (PWM pins), drained by a timer context
    Pwm,
    /// Buffered streaming audio device
    Streaming,
}

/// Volume and stereo position of one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMix {
    /// 0..=15
    pub volume: u8,
    /// 0..=14
    pub pan: u8,
}

impl ChannelMix {
    /// Create a channel setting.
    pub const fn new(volume: u8, pan: u8) -> Self {
        Self { volume, pan }
    }

    /// Un-normalised (left, right) weights: `v * (14 - p)` and `v * p`.
    pub fn weights(&self) -> (i32, i32) {
        let v = i32::from(self.volume.min(MAX_VOLUME));
        let p = i32::from(self.pan.min(MAX_PAN));
        (v * (i32::from(MAX_PAN) - p), v * p)
    }

    /// A source at volume zero.
    pub const fn muted() -> Self {
        Self { volume: 0, pan: 7 }
    }
}

impl Default for ChannelMix {
    fn default() -> Self {
        Self {
            volume: MAX_VOLUME,
            pan: 7,
        }
    }
}

/// Immutable per-session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Model of the first SID
    pub sid1: SidModel,
    /// Model of the second SID, `None` if disabled
    pub sid2: Option<SidModel>,
    /// Address layout of the SID chips
    pub mapping: AddressMapping,
    /// Mix settings of the first SID
    pub sid1_mix: ChannelMix,
    /// Mix settings of the second SID
    pub sid2_mix: ChannelMix,
    /// Mix settings of the FM chip
    pub fm_mix: ChannelMix,
    /// Emulate the Sound Expander FM chip in IO2
    pub fm_enabled: bool,
    /// Answer SID register reads
    pub register_read: bool,
    /// Keep left/right separate; when off both channels carry the average
    pub stereo_mix: bool,
    /// Output sink
    pub output: OutputPath,
    /// Nominal output sample rate in Hz
    pub nominal_sample_rate: u32,
    /// Lowest sink occupancy the rate controller will aim for, in frames
    pub min_watermark_frames: u32,
    /// Length of the bus clock measurement in milliseconds
    pub clock_measure_ms: u64,
    /// Clock assumed if the measurement sees no bus activity
    pub fallback_clock_hz: u32,
    /// End the session after this many seconds
    pub timeout_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sid1: SidModel::Mos6581,
            sid2: None,
            mapping: AddressMapping::Single,
            sid1_mix: ChannelMix::default(),
            sid2_mix: ChannelMix::default(),
            fm_mix: ChannelMix::default(),
            fm_enabled: false,
            register_read: true,
            stereo_mix: true,
            output: OutputPath::Streaming,
            nominal_sample_rate: NOMINAL_SAMPLE_RATE,
            min_watermark_frames: 512,
            clock_measure_ms: 1000,
            fallback_clock_hz: PAL_CLOCK_HZ,
            timeout_secs: None,
        }
    }
}

impl SessionConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject configurations a session cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (name, mix) in [
            ("sid1_mix", self.sid1_mix),
            ("sid2_mix", self.sid2_mix),
            ("fm_mix", self.fm_mix),
        ] {
            if mix.volume > MAX_VOLUME {
                return Err(SidekickError::Config(format!(
                    "{name}: volume {} exceeds {MAX_VOLUME}",
                    mix.volume
                )));
            }
            if mix.pan > MAX_PAN {
                return Err(SidekickError::Config(format!(
                    "{name}: pan {} exceeds {MAX_PAN}",
                    mix.pan
                )));
            }
        }

        match (self.mapping.is_dual(), self.sid2) {
            (true, None) => {
                return Err(SidekickError::Config(format!(
                    "address mapping {:?} needs a second SID",
                    self.mapping
                )))
            }
            (false, Some(model)) => {
                return Err(SidekickError::Config(format!(
                    "second SID ({model}) has no address with the single mapping"
                )))
            }
            _ => {}
        }

        if self.nominal_sample_rate == 0 {
            return Err(SidekickError::Config("sample rate must be non-zero".into()));
        }
        if self.fallback_clock_hz == 0 {
            return Err(SidekickError::Config(
                "fallback clock must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Number of emulated SIDs.
    pub fn sid_count(&self) -> usize {
        1 + usize::from(self.sid2.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_pan_weights() {
        assert_eq!(ChannelMix::new(15, 0).weights(), (210, 0));
        assert_eq!(ChannelMix::new(15, 14).weights(), (0, 210));
        assert_eq!(ChannelMix::new(10, 7).weights(), (70, 70));
    }

    #[test]
    fn test_dual_mapping_without_second_sid_fails() {
        let config = SessionConfig {
            mapping: AddressMapping::D420,
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(SidekickError::Config(_))));
    }

    #[test]
    fn test_single_mapping_with_second_sid_fails() {
        let config = SessionConfig {
            sid2: Some(SidModel::Mos8580),
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_volume_out_of_range_fails() {
        let config = SessionConfig {
            fm_mix: ChannelMix::new(16, 7),
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip_with_defaults() {
        let config = SessionConfig::from_json_str(
            r#"{ "sid1": "mos8580", "sid2": "mos6581", "mapping": "d500", "fm_enabled": true }"#,
        )
        .unwrap();
        assert_eq!(config.sid1, SidModel::Mos8580);
        assert_eq!(config.sid2, Some(SidModel::Mos6581));
        assert_eq!(config.mapping, AddressMapping::D500);
        assert_eq!(config.nominal_sample_rate, NOMINAL_SAMPLE_RATE);

        let again = SessionConfig::from_json_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn test_malformed_json_is_reported() {
        let err = SessionConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, SidekickError::Json(_)));
    }

    #[test]
    fn test_detection_sentinels() {
        assert_eq!(SidModel::Mos6581.detection_sentinel(), 3);
        assert_eq!(SidModel::Mos8580.detection_sentinel(), 2);
        assert_eq!(SidModel::Mos8580DigiBoost.detection_sentinel(), 2);
    }
}
