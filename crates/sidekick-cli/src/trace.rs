//! Bus traces and their replay
//!
//! A trace is a list of bus transactions stamped with the cycle they occur
//! on. The replay thread stands in for the interrupt context: it owns the
//! session's [`RealtimePath`] and calls `service` once per bus cycle,
//! optionally paced to the wall clock.

use log::{debug, info};
use sidekick::sid::registers::control;
use sidekick::{BusControl, BusLines, BusResponse, RealtimePath, Result, SidekickError};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Cycles between pacing checks.
const PACE_CHUNK: u64 = 1024;

/// One bus transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    /// CPU write
    Write {
        /// Bus address
        address: u16,
        /// Written value
        data: u8,
    },
    /// CPU read
    Read {
        /// Bus address
        address: u16,
    },
    /// Reset line held for this many cycles
    Reset {
        /// Consecutive asserted cycles
        cycles: u32,
    },
}

/// Transaction with its cycle stamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    /// Cycle the transaction starts on (1-based)
    pub cycle: u64,
    /// Transaction
    pub op: TraceOp,
}

impl TraceEntry {
    fn span(&self) -> u64 {
        match self.op {
            TraceOp::Reset { cycles } => u64::from(cycles),
            _ => 1,
        }
    }
}

/// Chip select asserted for an address, `None` outside the cartridge's
/// regions.
pub fn select_for(address: u16) -> Option<BusControl> {
    match address {
        0xD400..=0xD7FF => Some(BusControl::SID),
        0xDE00..=0xDEFF => Some(BusControl::IO1),
        0xDF00..=0xDFFF => Some(BusControl::IO2),
        _ => None,
    }
}

/// Ordered list of bus transactions
#[derive(Debug, Clone, Default)]
pub struct BusTrace {
    entries: Vec<TraceEntry>,
}

impl BusTrace {
    /// Parse the text format described in `--help`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries: Vec<TraceEntry> = Vec::new();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let line_no = index + 1;
            let bad = |what: &str| SidekickError::Other(format!("trace line {line_no}: {what}"));

            let fields: Vec<&str> = line.split_whitespace().collect();
            let cycle: u64 = fields[0].parse().map_err(|_| bad("invalid cycle"))?;
            let address = |field: Option<&&str>| -> Result<u16> {
                let value = field.ok_or_else(|| bad("missing address"))?;
                let address = u16::from_str_radix(value, 16).map_err(|_| bad("invalid address"))?;
                select_for(address)
                    .map(|_| address)
                    .ok_or_else(|| bad("address outside the cartridge regions"))
            };

            let op = match fields.get(1).map(|op| op.to_ascii_uppercase()).as_deref() {
                Some("W") => {
                    let value = fields.get(3).ok_or_else(|| bad("missing value"))?;
                    TraceOp::Write {
                        address: address(fields.get(2))?,
                        data: u8::from_str_radix(value, 16).map_err(|_| bad("invalid value"))?,
                    }
                }
                Some("R") => TraceOp::Read {
                    address: address(fields.get(2))?,
                },
                Some("RESET") => TraceOp::Reset {
                    cycles: fields
                        .get(2)
                        .and_then(|v| v.parse().ok())
                        .filter(|&n| n > 0)
                        .ok_or_else(|| bad("invalid reset length"))?,
                },
                _ => return Err(bad("unknown operation")),
            };

            let entry = TraceEntry { cycle, op };
            let earliest = entries.last().map_or(1, |last| last.cycle + last.span());
            if cycle < earliest {
                return Err(bad("cycles must increase and not overlap"));
            }
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    /// Read and parse a trace file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// A short arpeggio on voice 1 for a bus clocked at `clock_hz`.
    pub fn demo(clock_hz: u32) -> Self {
        const NOTES_HZ: [f64; 8] = [261.63, 329.63, 392.0, 523.25, 392.0, 329.63, 261.63, 196.0];
        let note_cycles = u64::from(clock_hz) / 4;
        let mut entries = Vec::new();
        let mut cycle = 1;
        let mut write = |cycle: &mut u64, address: u16, data: u8| {
            entries.push(TraceEntry {
                cycle: *cycle,
                op: TraceOp::Write { address, data },
            });
            *cycle += 1;
        };

        write(&mut cycle, 0xD418, 0x0F);
        write(&mut cycle, 0xD405, 0x09);
        write(&mut cycle, 0xD406, 0xA4);
        write(&mut cycle, 0xD403, 0x08);
        for (index, hz) in NOTES_HZ.iter().enumerate() {
            let start = 1_000 + index as u64 * note_cycles;
            let freq = (hz * 16_777_216.0 / f64::from(clock_hz)) as u16;
            let [lo, hi] = freq.to_le_bytes();
            let mut at = start;
            write(&mut at, 0xD400, lo);
            write(&mut at, 0xD401, hi);
            write(&mut at, 0xD404, control::PULSE | control::GATE);
            let mut release = start + note_cycles * 3 / 4;
            write(&mut release, 0xD404, control::PULSE);
        }

        Self { entries }
    }

    /// Transactions in cycle order.
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Cycle after the last transaction.
    pub fn end_cycle(&self) -> u64 {
        self.entries
            .last()
            .map_or(0, |last| last.cycle + last.span() - 1)
    }
}

/// How the replay thread drives the bus
#[derive(Debug, Clone, Copy)]
pub struct ReplayOptions {
    /// Bus clock in Hz
    pub clock_hz: u32,
    /// Sleep to keep servicing at `clock_hz`; off renders as fast as possible
    pub paced: bool,
    /// Idle cycles before the trace starts (power-on, clock measurement)
    pub lead_in: u64,
    /// Idle cycles after the trace
    pub tail: u64,
}

/// What the replay thread did
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayStats {
    /// Bus cycles serviced
    pub cycles: u64,
    /// Reads the cartridge answered
    pub reads_driven: u64,
    /// Replay ended early because the session stopped
    pub interrupted: bool,
}

struct Bus {
    realtime: RealtimePath,
    options: ReplayOptions,
    stop: Arc<AtomicBool>,
    started: Instant,
    stats: ReplayStats,
}

impl Bus {
    /// Service one cycle; false once the session has stopped.
    fn service(&mut self, lines: BusLines) -> bool {
        if let BusResponse::Drive(_) = self.realtime.service(lines) {
            self.stats.reads_driven += 1;
        }
        self.stats.cycles += 1;

        if self.stats.cycles % PACE_CHUNK != 0 {
            return true;
        }
        if self.stop.load(Ordering::Acquire) {
            self.stats.interrupted = true;
            return false;
        }
        if self.options.paced {
            let due = Duration::from_secs_f64(self.stats.cycles as f64 / f64::from(self.options.clock_hz));
            if let Some(ahead) = due.checked_sub(self.started.elapsed()) {
                thread::sleep(ahead);
            }
        }
        true
    }

    fn idle_until(&mut self, cycle: u64) -> bool {
        while self.stats.cycles + 1 < cycle {
            if !self.service(BusLines::idle()) {
                return false;
            }
        }
        true
    }

    fn replay(mut self, trace: &BusTrace) -> ReplayStats {
        let lead_in = self.options.lead_in;
        let mut running = self.idle_until(lead_in + 1);

        for entry in trace.entries() {
            if !running {
                break;
            }
            running = self.idle_until(lead_in + entry.cycle);
            running = running
                && match entry.op {
                    TraceOp::Write { address, data } => {
                        let select = select_for(address).unwrap_or(BusControl::empty());
                        self.service(BusLines::write(address, data, select))
                    }
                    TraceOp::Read { address } => {
                        let select = select_for(address).unwrap_or(BusControl::empty());
                        self.service(BusLines::read(address, select))
                    }
                    TraceOp::Reset { cycles } => {
                        (0..cycles).all(|_| self.service(BusLines::reset()))
                    }
                };
        }

        if running {
            let end = lead_in + trace.end_cycle() + self.options.tail;
            self.idle_until(end + 1);
        }
        // let the session catch up and end
        self.stop.store(true, Ordering::Release);
        debug!("Bus replay finished: {:?}", self.stats);
        self.stats
    }
}

/// Start the replay thread. It sets `stop` when the trace (plus tail) is
/// done and exits early once `stop` is set by someone else.
pub fn spawn_replay(
    trace: BusTrace,
    realtime: RealtimePath,
    options: ReplayOptions,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<ReplayStats>> {
    info!(
        "Replaying {} bus transactions over {} cycles at {} Hz{}",
        trace.entries().len(),
        trace.end_cycle(),
        options.clock_hz,
        if options.paced { "" } else { " (unpaced)" }
    );
    let handle = thread::Builder::new()
        .name("sidekick-bus".into())
        .spawn(move || {
            let bus = Bus {
                realtime,
                options,
                stop,
                started: Instant::now(),
                stats: ReplayStats::default(),
            };
            bus.replay(&trace)
        })?;
    Ok(handle)
}
