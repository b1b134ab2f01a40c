//! SID register map
//!
//! | Index     | Register |
//! |-----------|----------|
//! | $00–$06   | voice 1: freq lo/hi, pulse lo/hi, control, AD, SR |
//! | $07–$0D   | voice 2 (same layout) |
//! | $0E–$14   | voice 3 (same layout) |
//! | $15–$16   | filter cutoff lo (3 bits) / hi (8 bits) |
//! | $17       | resonance (hi nibble) + filter routing (lo nibble) |
//! | $18       | 3OFF, filter mode, master volume |
//! | $19–$1A   | paddle X/Y (read-only) |
//! | $1B       | OSC3 (read-only) |
//! | $1C       | ENV3 (read-only) |

/// Registers per voice.
pub const VOICE_STRIDE: u8 = 7;

/// Voice control register offset inside a voice block.
pub const CONTROL: u8 = 4;

/// Mode and volume.
pub const MODE_VOL: u8 = 0x18;
/// Paddle X.
pub const POT_X: u8 = 0x19;
/// Paddle Y.
pub const POT_Y: u8 = 0x1A;
/// Voice 3 oscillator output.
pub const OSC3: u8 = 0x1B;
/// Voice 3 envelope output.
pub const ENV3: u8 = 0x1C;

/// Control register bits.
pub mod control {
    /// Gate: starts attack when set, release when cleared
    pub const GATE: u8 = 0x01;
    /// Sawtooth waveform
    pub const SAWTOOTH: u8 = 0x20;
    /// Pulse waveform
    pub const PULSE: u8 = 0x40;
}

/// True for registers whose read value comes from the chip itself rather
/// than from the last write.
pub fn is_read_only(register: u8) -> bool {
    (POT_X..=ENV3).contains(&(register & 0x1F))
}
