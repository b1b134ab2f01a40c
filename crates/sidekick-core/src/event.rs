//! Timestamped register events
//!
//! A [`BusEvent`] is created by the real-time path for every write into a
//! chip-owned address region and consumed exactly once by the engine.

use std::fmt;

/// Chip addressed by a bus write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipTarget {
    /// First SID
    Sid1,
    /// Second SID
    Sid2,
    /// FM chip; the register index is the port (0 = address, 1 = data)
    Fm,
}

impl ChipTarget {
    const fn to_bits(self) -> u32 {
        match self {
            ChipTarget::Sid1 => 0,
            ChipTarget::Sid2 => 1,
            ChipTarget::Fm => 2,
        }
    }

    const fn from_bits(bits: u32) -> Self {
        match bits & 0x03 {
            0 => ChipTarget::Sid1,
            1 => ChipTarget::Sid2,
            _ => ChipTarget::Fm,
        }
    }
}

impl fmt::Display for ChipTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChipTarget::Sid1 => "SID1",
            ChipTarget::Sid2 => "SID2",
            ChipTarget::Fm => "FM",
        })
    }
}

/// A register write observed on the bus, stamped with the bus cycle it
/// happened on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusEvent {
    /// Destination chip
    pub target: ChipTarget,
    /// Register index (0..=31)
    pub register: u8,
    /// Written value
    pub value: u8,
    /// Bus cycle of the write
    pub cycle: u64,
}

impl BusEvent {
    /// Create an event; the register index is masked to 5 bits.
    pub const fn new(target: ChipTarget, register: u8, value: u8, cycle: u64) -> Self {
        Self {
            target,
            register: register & 0x1F,
            value,
            cycle,
        }
    }

    /// Pack target, register and value into one word for queue storage.
    pub(crate) const fn payload(&self) -> u32 {
        (self.target.to_bits() << 16) | ((self.register as u32) << 8) | self.value as u32
    }

    pub(crate) const fn from_parts(payload: u32, cycle: u64) -> Self {
        Self {
            target: ChipTarget::from_bits(payload >> 16),
            register: ((payload >> 8) & 0x1F) as u8,
            value: (payload & 0xFF) as u8,
            cycle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_preserves_fields() {
        let event = BusEvent::new(ChipTarget::Fm, 1, 0xA5, 42);
        let unpacked = BusEvent::from_parts(event.payload(), event.cycle);
        assert_eq!(unpacked, event);
    }

    #[test]
    fn test_register_index_is_masked() {
        let event = BusEvent::new(ChipTarget::Sid2, 0x38, 0, 0);
        assert_eq!(event.register, 0x18, "register index must stay within 0..=31");
    }
}
