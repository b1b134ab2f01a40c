//! Backend trait abstraction for the emulated sound chips
//!
//! The engine drives every chip on the cartridge through this interface:
//! bus writes, clock steps, resets, read-back and sample generation all
//! share one dispatch path for SID and FM.

/// Common interface for chip backends
///
/// # Example
///
/// ```
/// use sidekick::{ChipBackend, Sid, SidModel};
///
/// fn start_tone<B: ChipBackend>(chip: &mut B) {
///     chip.write_register(0x01, 0x10); // voice 1 frequency high
///     chip.write_register(0x06, 0xF0); // sustain 15
///     chip.write_register(0x04, 0x21); // sawtooth + gate
///     chip.write_register(0x18, 0x0F); // volume 15
/// }
///
/// let mut sid = Sid::new(SidModel::Mos8580);
/// start_tone(&mut sid);
/// ChipBackend::clock(&mut sid, 1000);
/// let _ = sid.next_sample();
/// ```
pub trait ChipBackend {
    /// Reset the chip to its power-on state.
    fn reset(&mut self);

    /// Write a register (SID) or port (FM: 0 = address, 1 = data).
    fn write_register(&mut self, register: u8, value: u8);

    /// Read back what the chip itself would answer.
    fn read_register(&self, register: u8) -> u8;

    /// Advance by `cycles` bus cycles. Chips synthesised per output sample
    /// keep the default, which does nothing.
    fn clock(&mut self, _cycles: u32) {}

    /// Output for the next sample period. Chips synthesised per output
    /// sample generate one here.
    fn next_sample(&mut self) -> i16;
}
