//! Expansion bus signal decoding
//!
//! A [`BusLines`] value is the raw snapshot the interrupt context samples on
//! every cycle strobe: thirteen address lines, eight data lines and the
//! control lines in [`BusControl`]. Control bits are stored *asserted-high*
//! regardless of the electrical polarity on the connector.
//!
//! Bit layout of the snapshot word:
//!
//! | Bits   | Lines |
//! |--------|-------|
//! | 0–12   | A0–A12 |
//! | 13–20  | D0–D7 |
//! | 21–25  | control lines ([`BusControl`]) |

use crate::config::AddressMapping;
use bitflags::bitflags;
use std::fmt;

const ADDRESS_MASK: u32 = 0x1FFF;
const DATA_SHIFT: u32 = 13;
const DATA_MASK: u32 = 0xFF << DATA_SHIFT;

bitflags! {
    /// Control lines of the expansion port
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BusControl: u32 {
        /// R/W high: the CPU reads
        const READ = 1 << 21;
        /// IO1 select ($DE00–$DEFF)
        const IO1 = 1 << 22;
        /// IO2 select ($DF00–$DFFF)
        const IO2 = 1 << 23;
        /// SID chip select ($D400–$D7FF)
        const SID = 1 << 24;
        /// Reset asserted
        const RESET = 1 << 25;
    }
}

/// Raw snapshot of the bus lines for one cycle
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BusLines(u32);

impl BusLines {
    /// Assemble a snapshot from its parts.
    pub const fn new(address: u16, data: u8, control: BusControl) -> Self {
        Self(
            (address as u32 & ADDRESS_MASK)
                | ((data as u32) << DATA_SHIFT)
                | control.bits(),
        )
    }

    /// A CPU write of `data` to `address` with the given chip select.
    pub const fn write(address: u16, data: u8, select: BusControl) -> Self {
        Self::new(address, data, select)
    }

    /// A CPU read of `address` with the given chip select.
    pub const fn read(address: u16, select: BusControl) -> Self {
        Self::new(address, 0, select.union(BusControl::READ))
    }

    /// A cycle with no chip selected.
    pub const fn idle() -> Self {
        Self(BusControl::READ.bits())
    }

    /// A cycle with the reset line asserted.
    pub const fn reset() -> Self {
        Self(BusControl::RESET.bits())
    }

    /// Wrap a raw snapshot word.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw snapshot word.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// A0–A12.
    #[inline]
    pub const fn address(self) -> u16 {
        (self.0 & ADDRESS_MASK) as u16
    }

    /// D0–D7.
    #[inline]
    pub const fn data(self) -> u8 {
        ((self.0 & DATA_MASK) >> DATA_SHIFT) as u8
    }

    /// Control lines.
    #[inline]
    pub const fn control(self) -> BusControl {
        BusControl::from_bits_truncate(self.0)
    }

    /// True if the reset line is asserted.
    #[inline]
    pub const fn reset_asserted(self) -> bool {
        self.0 & BusControl::RESET.bits() != 0
    }
}

impl fmt::Debug for BusLines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusLines")
            .field("address", &format_args!("{:#06x}", self.address()))
            .field("data", &format_args!("{:#04x}", self.data()))
            .field("control", &self.control())
            .finish()
    }
}

/// Transfer direction, seen from the CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// CPU reads, the cartridge may drive the data lines
    Read,
    /// CPU writes
    Write,
}

/// Chip-select region active in a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// $D400–$D7FF
    Sid,
    /// $DE00–$DEFF
    Io1,
    /// $DF00–$DFFF
    Io2,
}

/// Logical view of one bus cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTransaction {
    /// Selected region, `None` when the cartridge is not addressed
    pub region: Option<Region>,
    /// Read or write
    pub direction: Direction,
    /// A0–A12
    pub address: u16,
    /// Data lines (meaningful for writes)
    pub data: u8,
}

impl BusTransaction {
    /// Decode a snapshot. The SID select wins over IO1 over IO2; the real
    /// bus never asserts two of them at once.
    #[inline]
    pub fn decode(lines: BusLines) -> Self {
        let control = lines.control();
        let region = if control.contains(BusControl::SID) {
            Some(Region::Sid)
        } else if control.contains(BusControl::IO1) {
            Some(Region::Io1)
        } else if control.contains(BusControl::IO2) {
            Some(Region::Io2)
        } else {
            None
        };
        let direction = if control.contains(BusControl::READ) {
            Direction::Read
        } else {
            Direction::Write
        };

        Self {
            region,
            direction,
            address: lines.address(),
            data: lines.data(),
        }
    }

    /// Register index inside a SID (A0–A4).
    #[inline]
    pub fn sid_register(&self) -> u8 {
        (self.address & 0x1F) as u8
    }

    /// Offset inside an IO page (A0–A7).
    #[inline]
    pub fn io_offset(&self) -> u8 {
        (self.address & 0xFF) as u8
    }
}

/// SID(s) a SID-region or IO1 access is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidSelect {
    /// First chip only
    First,
    /// Second chip only
    Second,
    /// Both chips (mirrored writes)
    Both,
}

impl AddressMapping {
    /// Route an access to the SID(s) it addresses, or `None` if this
    /// mapping does not claim the region.
    #[inline]
    pub fn select(self, region: Region, address: u16) -> Option<SidSelect> {
        match (self, region) {
            (AddressMapping::Single, Region::Sid) => Some(SidSelect::First),
            (AddressMapping::Mirrored, Region::Sid) => Some(SidSelect::Both),
            (AddressMapping::D420, Region::Sid) => Some(if address & 0x20 != 0 {
                SidSelect::Second
            } else {
                SidSelect::First
            }),
            (AddressMapping::D500, Region::Sid) => Some(if address & 0x100 != 0 {
                SidSelect::Second
            } else {
                SidSelect::First
            }),
            (AddressMapping::De00, Region::Sid) => Some(SidSelect::First),
            (AddressMapping::De00, Region::Io1) => Some(SidSelect::Second),
            _ => None,
        }
    }
}

/// What the cartridge does with the data lines in response to a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusResponse {
    /// Leave the data lines alone
    Release,
    /// Drive this value for the CPU to read
    Drive(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_fields() {
        let lines = BusLines::write(0x1418, 0x0F, BusControl::SID);
        assert_eq!(lines.address(), 0x1418);
        assert_eq!(lines.data(), 0x0F);
        assert_eq!(lines.control(), BusControl::SID);
        assert!(!lines.reset_asserted());
    }

    #[test]
    fn test_decode_read_and_write() {
        let write = BusTransaction::decode(BusLines::write(0xD418, 0x0F, BusControl::SID));
        assert_eq!(write.region, Some(Region::Sid));
        assert_eq!(write.direction, Direction::Write);
        assert_eq!(write.sid_register(), 0x18);

        let read = BusTransaction::decode(BusLines::read(0xDF60, BusControl::IO2));
        assert_eq!(read.region, Some(Region::Io2));
        assert_eq!(read.direction, Direction::Read);
        assert_eq!(read.io_offset(), 0x60);
    }

    #[test]
    fn test_idle_cycle_has_no_region() {
        assert_eq!(BusTransaction::decode(BusLines::idle()).region, None);
    }

    #[test]
    fn test_mapping_selects() {
        assert_eq!(
            AddressMapping::D420.select(Region::Sid, 0xD438),
            Some(SidSelect::Second)
        );
        assert_eq!(
            AddressMapping::D420.select(Region::Sid, 0xD418),
            Some(SidSelect::First)
        );
        assert_eq!(
            AddressMapping::D500.select(Region::Sid, 0xD518),
            Some(SidSelect::Second)
        );
        assert_eq!(
            AddressMapping::Mirrored.select(Region::Sid, 0xD400),
            Some(SidSelect::Both)
        );
        assert_eq!(
            AddressMapping::De00.select(Region::Io1, 0xDE05),
            Some(SidSelect::Second)
        );
        assert_eq!(AddressMapping::Single.select(Region::Io1, 0xDE05), None);
    }
}
