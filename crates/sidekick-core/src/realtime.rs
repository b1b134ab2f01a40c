//! Interrupt-context path
//!
//! [`RealtimePath::service`] runs once per bus cycle. Every branch is a
//! handful of loads, stores and compares: it never allocates, never locks,
//! never logs and never steps a chip. Reads are answered from state that
//! is already at hand (detection responders, the bus-value latch, the
//! read-back registers the engine publishes); writes become [`BusEvent`]s
//! on the event queue.
//!
//! The path owns everything it mutates. The only state it shares with the
//! background loop is the [`BusClock`], the event queue indices and the
//! read-only [`ReadBack`] registers.

use crate::bus::{BusLines, BusResponse, BusTransaction, Direction, Region, SidSelect};
use crate::config::{AddressMapping, SessionConfig, SidModel};
use crate::counter::{
    BusClock, ResetDebouncer, ResetLine, RETURN_TO_CALLER_MIN_CYCLES,
    RETURN_TO_CALLER_RESET_CYCLES,
};
use crate::detect::{FmDetection, SidDetection, FM_STATUS_OFFSET};
use crate::event::{BusEvent, ChipTarget};
use crate::queue::EventProducer;
use crate::sid::registers::{ENV3, POT_X};
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// SID registers answered from chip state published by the engine.
pub const READ_BACK_REGISTERS: RangeInclusive<u8> = POT_X..=ENV3;

/// IO2 offsets of the Sound Expander keyboard matrix (not fitted, reads
/// 0xFF).
pub const FM_KEYBOARD_OFFSETS: RangeInclusive<u8> = 0x08..=0x0F;

/// Address line that selects the FM data port in IO2.
const FM_DATA_PORT_LINE: u16 = 0x10;

/// Live values of the SID output registers ($19–$1C), written by the
/// engine after every emulation slice and read by the interrupt context
#[derive(Debug, Default)]
pub struct ReadBack {
    registers: [[AtomicU8; 4]; 2],
}

impl ReadBack {
    /// All registers zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store register `register` ($19–$1C) of SID `chip` (0 or 1).
    #[inline]
    pub fn publish(&self, chip: usize, register: u8, value: u8) {
        if let Some(slot) = self.slot(chip, register) {
            slot.store(value, Ordering::Relaxed);
        }
    }

    /// Load register `register` ($19–$1C) of SID `chip`; 0 outside that
    /// range.
    #[inline]
    pub fn get(&self, chip: usize, register: u8) -> u8 {
        self.slot(chip, register)
            .map_or(0, |slot| slot.load(Ordering::Relaxed))
    }

    /// Zero every register.
    pub fn clear(&self) {
        for chip in &self.registers {
            for slot in chip {
                slot.store(0, Ordering::Relaxed);
            }
        }
    }

    fn slot(&self, chip: usize, register: u8) -> Option<&AtomicU8> {
        if !READ_BACK_REGISTERS.contains(&register) {
            return None;
        }
        self.registers
            .get(chip)
            .map(|regs| &regs[(register - POT_X) as usize])
    }
}

/// The bounded-latency half of a session
pub struct RealtimePath {
    producer: EventProducer,
    clock: Arc<BusClock>,
    read_back: Arc<ReadBack>,
    mapping: AddressMapping,
    models: [SidModel; 2],
    dual: bool,
    fm_enabled: bool,
    register_read: bool,
    cycles: u64,
    debouncer: ResetDebouncer,
    return_signalled: bool,
    sid_detect: [SidDetection; 2],
    fm_detect: FmDetection,
    bus_value: u8,
    bus_value_ttl: u32,
}

impl RealtimePath {
    pub(crate) fn new(
        config: &SessionConfig,
        producer: EventProducer,
        clock: Arc<BusClock>,
        read_back: Arc<ReadBack>,
    ) -> Self {
        Self {
            producer,
            clock,
            read_back,
            mapping: config.mapping,
            models: [config.sid1, config.sid2.unwrap_or(config.sid1)],
            dual: config.sid2.is_some(),
            fm_enabled: config.fm_enabled,
            register_read: config.register_read,
            cycles: 0,
            debouncer: ResetDebouncer::new(),
            return_signalled: false,
            sid_detect: [SidDetection::new(), SidDetection::new()],
            fm_detect: FmDetection::new(),
            bus_value: 0,
            bus_value_ttl: 0,
        }
    }

    /// Handle one bus cycle and say what to do with the data lines.
    #[inline]
    pub fn service(&mut self, lines: BusLines) -> BusResponse {
        self.cycles += 1;
        let cycle = self.cycles;

        if self.bus_value_ttl > 0 {
            self.bus_value_ttl -= 1;
            if self.bus_value_ttl == 0 {
                self.bus_value = 0;
            }
        }

        match self.debouncer.observe(lines.reset_asserted()) {
            ResetLine::Held(run) => {
                if run >= RETURN_TO_CALLER_RESET_CYCLES
                    && cycle > RETURN_TO_CALLER_MIN_CYCLES
                    && !self.return_signalled
                {
                    self.return_signalled = true;
                    self.clock.request_return();
                }
                self.clock.publish_cycles(cycle);
                return BusResponse::Release;
            }
            ResetLine::Released => {
                self.reset();
                return BusResponse::Release;
            }
            ResetLine::Idle => {}
        }

        let response = self.dispatch(BusTransaction::decode(lines), cycle);
        // publish after enqueueing so the consumer never sees a cycle
        // count ahead of the events stamped with it
        self.clock.publish_cycles(cycle);
        response
    }

    /// Cycles since session start or the last debounced reset.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Shared cycle counter.
    pub fn clock(&self) -> &Arc<BusClock> {
        &self.clock
    }

    /// Detection state of SID `chip` (0 or 1).
    pub fn sid_detection(&self, chip: usize) -> &SidDetection {
        &self.sid_detect[chip]
    }

    /// FM detection state.
    pub fn fm_detection(&self) -> &FmDetection {
        &self.fm_detect
    }

    /// Value a write-only SID register currently reads as.
    pub fn bus_value(&self) -> u8 {
        self.bus_value
    }

    fn reset(&mut self) {
        self.cycles = 0;
        self.sid_detect = [SidDetection::new(), SidDetection::new()];
        self.fm_detect.reset();
        self.bus_value = 0;
        self.bus_value_ttl = 0;
        self.clock.publish_reset(self.producer.write_index());
    }

    #[inline]
    fn dispatch(&mut self, tx: BusTransaction, cycle: u64) -> BusResponse {
        match tx.region {
            Some(Region::Io2) if self.fm_enabled => self.fm_access(tx, cycle),
            Some(region @ (Region::Sid | Region::Io1)) => {
                match self.mapping.select(region, tx.address) {
                    Some(select) => self.sid_access(tx, select, cycle),
                    None => BusResponse::Release,
                }
            }
            _ => BusResponse::Release,
        }
    }

    #[inline]
    fn sid_access(&mut self, tx: BusTransaction, select: SidSelect, cycle: u64) -> BusResponse {
        let register = tx.sid_register();
        let (first, second) = match select {
            SidSelect::First => (true, false),
            SidSelect::Second => (false, true),
            SidSelect::Both => (true, true),
        };
        let second = second && self.dual;

        match tx.direction {
            Direction::Write => {
                if first {
                    self.sid_write(0, register, tx.data, cycle);
                }
                if second {
                    self.sid_write(1, register, tx.data, cycle);
                }
                if first || second {
                    self.bus_value = tx.data;
                    self.bus_value_ttl = self.models[0].bus_value_ttl();
                }
                BusResponse::Release
            }
            Direction::Read if self.register_read && (first || second) => {
                let chip = if first { 0 } else { 1 };
                if let Some(sentinel) = self.sid_detect[chip].on_read(register, self.models[chip]) {
                    return BusResponse::Drive(sentinel);
                }
                if READ_BACK_REGISTERS.contains(&register) {
                    BusResponse::Drive(self.read_back.get(chip, register))
                } else {
                    BusResponse::Drive(self.bus_value)
                }
            }
            Direction::Read => BusResponse::Release,
        }
    }

    #[inline]
    fn sid_write(&mut self, chip: usize, register: u8, value: u8, cycle: u64) {
        let target = if chip == 0 {
            ChipTarget::Sid1
        } else {
            ChipTarget::Sid2
        };
        self.producer
            .enqueue(BusEvent::new(target, register, value, cycle));
        self.sid_detect[chip].on_write(register, value);
    }

    #[inline]
    fn fm_access(&mut self, tx: BusTransaction, cycle: u64) -> BusResponse {
        let offset = tx.io_offset();
        match tx.direction {
            Direction::Read if offset == FM_STATUS_OFFSET => {
                BusResponse::Drive(self.fm_detect.read_status())
            }
            Direction::Read if FM_KEYBOARD_OFFSETS.contains(&offset) => BusResponse::Drive(0xFF),
            Direction::Read => BusResponse::Release,
            Direction::Write => {
                let data_port = tx.address & FM_DATA_PORT_LINE != 0;
                self.producer.enqueue(BusEvent::new(
                    ChipTarget::Fm,
                    u8::from(data_port),
                    tx.data,
                    cycle,
                ));
                self.fm_detect.on_write(data_port, tx.data);
                BusResponse::Release
            }
        }
    }
}

impl fmt::Debug for RealtimePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimePath")
            .field("cycles", &self.cycles)
            .field("mapping", &self.mapping)
            .field("queued", &self.producer.len())
            .field("reset_run", &self.debouncer.asserted_run())
            .finish()
    }
}
