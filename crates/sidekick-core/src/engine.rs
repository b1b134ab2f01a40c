//! Cycle-accurate chip stepping
//!
//! The [`Engine`] owns every emulated chip and advances them in slices
//! towards the real bus cycle count. A slice never crosses the timestamp of
//! the next queued event or the next sample boundary, so writes land on the
//! exact emulated cycle they were observed on and samples are taken at
//! exactly `samples * clock / rate` cycles.
//!
//! Conversion between cycles and samples is rebased whenever the rate
//! controller moves the rate:
//!
//! ```text
//! samples = origin_samples + (cycles - origin_cycles) * rate / clock
//! ```
//!
//! Without the rebase a 1 Hz step would shift the whole history and
//! produce a burst (or gap) of samples proportional to the session length.

use crate::backend::ChipBackend;
use crate::config::SessionConfig;
use crate::event::{BusEvent, ChipTarget};
use crate::fm::Opl2;
use crate::mixer::{Mixer, StereoFrame, FM_SOURCE, SOURCES};
use crate::queue::EventConsumer;
use crate::rate::RateController;
use crate::realtime::{ReadBack, READ_BACK_REGISTERS};
use crate::sid::Sid;
use crate::sink::AudioSink;
use std::sync::Arc;

/// Longest single chip step, in cycles.
///
/// Bounds the work between two checks of the event queue and keeps chip
/// state hot in cache.
pub const MAX_SLICE_CYCLES: u64 = 256;

/// Chip stepping, sample generation and rate control
pub struct Engine {
    clock_hz: u32,
    sids: [Option<Sid>; 2],
    fm: Option<Opl2>,
    mixer: Mixer,
    rate: RateController,
    read_back: Arc<ReadBack>,
    cycles: u64,
    samples: u64,
    origin_cycles: u64,
    origin_samples: u64,
    next_sample_cycle: u64,
    events_applied: u64,
    late_events: u64,
    dropped_frames: u64,
}

impl Engine {
    /// Build the chips for `config`, clocked at the measured bus clock.
    pub fn new(config: &SessionConfig, clock_hz: u32, read_back: Arc<ReadBack>) -> Self {
        let clock_hz = clock_hz.max(1);
        let mut engine = Self {
            clock_hz,
            sids: [
                Some(Sid::new(config.sid1)),
                config.sid2.map(Sid::new),
            ],
            fm: config
                .fm_enabled
                .then(|| Opl2::new(config.nominal_sample_rate)),
            mixer: Mixer::from_config(config),
            rate: RateController::new(config.nominal_sample_rate, config.min_watermark_frames),
            read_back,
            cycles: 0,
            samples: 0,
            origin_cycles: 0,
            origin_samples: 0,
            next_sample_cycle: 0,
            events_applied: 0,
            late_events: 0,
            dropped_frames: 0,
        };
        engine.next_sample_cycle = engine.sample_boundary(1);
        engine.publish_read_back();
        engine
    }

    /// Return every chip, the rate controller and the cycle/sample
    /// baseline to their initial state.
    pub fn reset(&mut self) {
        for chip in self.chips().into_iter().flatten() {
            chip.reset();
        }
        self.rate.reset();
        if let Some(fm) = &mut self.fm {
            fm.set_sample_rate(self.rate.rate());
        }
        self.cycles = 0;
        self.samples = 0;
        self.origin_cycles = 0;
        self.origin_samples = 0;
        self.next_sample_cycle = self.sample_boundary(1);
        self.read_back.clear();
        self.publish_read_back();
    }

    /// Continue from bus cycle `cycles` without emulating the cycles before
    /// it.
    pub fn rebase(&mut self, cycles: u64) {
        self.cycles = cycles;
        self.origin_cycles = cycles;
        self.origin_samples = self.samples;
        self.next_sample_cycle = self.sample_boundary(self.samples + 1);
    }

    /// Catch up to `real_cycles`, applying every due event from `events`
    /// and handing generated frames to `sink`. Returns the number of
    /// samples generated.
    pub fn run_until(
        &mut self,
        real_cycles: u64,
        events: &mut EventConsumer,
        sink: &mut dyn AudioSink,
    ) -> u64 {
        let start = self.samples;

        loop {
            while let Some(event) = events.pop_due(self.cycles) {
                if event.cycle < self.cycles {
                    self.late_events += 1;
                }
                self.apply(event);
            }
            if self.cycles >= real_cycles {
                break;
            }

            let mut slice = (real_cycles - self.cycles)
                .min(MAX_SLICE_CYCLES)
                .min(self.next_sample_cycle - self.cycles);
            if let Some(next) = events.peek() {
                slice = slice.min(next.cycle - self.cycles);
            }

            for chip in self.chips().into_iter().flatten() {
                chip.clock(slice as u32);
            }
            self.cycles += slice;

            while self.cycles >= self.next_sample_cycle {
                self.generate_sample(sink);
            }
        }

        self.publish_read_back();
        self.samples - start
    }

    /// Apply one register write to its chip. Writes to a chip that is not
    /// fitted are dropped.
    pub fn apply(&mut self, event: BusEvent) {
        let source = match event.target {
            ChipTarget::Sid1 => 0,
            ChipTarget::Sid2 => 1,
            ChipTarget::Fm => FM_SOURCE,
        };
        let chip = self.chips().into_iter().nth(source).flatten();
        if let Some(chip) = chip {
            chip.write_register(event.register, event.value);
            self.events_applied += 1;
        }
    }

    /// Emulated cycles since the last reset.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Samples generated since the last reset.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Bus clock the chips are stepped at.
    pub fn clock_hz(&self) -> u32 {
        self.clock_hz
    }

    /// Rate controller state.
    pub fn rate(&self) -> &RateController {
        &self.rate
    }

    /// SID `index` (0 or 1), if fitted.
    pub fn sid(&self, index: usize) -> Option<&Sid> {
        self.sids.get(index).and_then(Option::as_ref)
    }

    /// FM chip, if enabled.
    pub fn fm(&self) -> Option<&Opl2> {
        self.fm.as_ref()
    }

    /// Mixer in use.
    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    /// Events applied since the engine was built.
    pub fn events_applied(&self) -> u64 {
        self.events_applied
    }

    /// Events that only became visible after the chips had already been
    /// stepped past their timestamp. Stays 0 as long as the caller never
    /// asks for cycles whose events it has not yet refreshed.
    pub fn late_events(&self) -> u64 {
        self.late_events
    }

    /// Frames the sink refused since the engine was built.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Every chip slot in mixer source order; `None` where nothing is
    /// fitted.
    fn chips(&mut self) -> [Option<&mut dyn ChipBackend>; SOURCES] {
        let [sid1, sid2] = &mut self.sids;
        [
            sid1.as_mut().map(|sid| sid as &mut dyn ChipBackend),
            sid2.as_mut().map(|sid| sid as &mut dyn ChipBackend),
            self.fm.as_mut().map(|fm| fm as &mut dyn ChipBackend),
        ]
    }

    /// Cycle at which sample number `sample` is due.
    fn sample_boundary(&self, sample: u64) -> u64 {
        let since_origin = (sample - self.origin_samples) * u64::from(self.clock_hz);
        self.origin_cycles + since_origin.div_ceil(u64::from(self.rate.rate()))
    }

    fn generate_sample(&mut self, sink: &mut dyn AudioSink) {
        let mut sources = [0i16; SOURCES];
        for (source, chip) in sources.iter_mut().zip(self.chips()) {
            if let Some(chip) = chip {
                *source = chip.next_sample();
            }
        }

        let frame: StereoFrame = self.mixer.mix(sources);
        if sink.write(std::slice::from_ref(&frame)) == 0 {
            self.dropped_frames += 1;
        }
        self.samples += 1;

        if self.rate.on_sample(sink.queue_occupancy()) {
            self.origin_cycles = self.cycles;
            self.origin_samples = self.samples;
            if let Some(fm) = &mut self.fm {
                fm.set_sample_rate(self.rate.rate());
            }
        }
        self.next_sample_cycle = self.sample_boundary(self.samples + 1);
    }

    fn publish_read_back(&self) {
        for (chip, sid) in self.sids.iter().enumerate() {
            if let Some(sid) = sid {
                for register in READ_BACK_REGISTERS {
                    self.read_back
                        .publish(chip, register, sid.read_register(register));
                }
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("clock_hz", &self.clock_hz)
            .field("cycles", &self.cycles)
            .field("samples", &self.samples)
            .field("rate", &self.rate.rate())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AddressMapping, SidModel, PAL_CLOCK_HZ};
    use crate::queue::{event_queue, EventProducer};
    use crate::sid::registers::ENV3;
    use crate::sink::NullSink;

    struct CaptureSink {
        frames: Vec<StereoFrame>,
        occupancy: Option<usize>,
    }

    impl AudioSink for CaptureSink {
        fn write(&mut self, frames: &[StereoFrame]) -> usize {
            self.frames.extend_from_slice(frames);
            frames.len()
        }

        fn queue_occupancy(&self) -> Option<usize> {
            self.occupancy
        }
    }

    fn engine(config: &SessionConfig) -> (Engine, EventProducer, EventConsumer, Arc<ReadBack>) {
        let (producer, consumer) = event_queue(256);
        let read_back = Arc::new(ReadBack::new());
        let engine = Engine::new(config, PAL_CLOCK_HZ, Arc::clone(&read_back));
        (engine, producer, consumer, read_back)
    }

    fn sid1(register: u8, value: u8, cycle: u64) -> BusEvent {
        BusEvent::new(ChipTarget::Sid1, register, value, cycle)
    }

    #[test]
    fn test_events_wait_for_their_cycle() {
        let (mut engine, mut producer, mut consumer, _) = engine(&SessionConfig::default());
        producer.enqueue(sid1(0x00, 0x11, 10));
        producer.enqueue(sid1(0x00, 0x22, 10));
        producer.enqueue(sid1(0x01, 0x33, 500));
        consumer.refresh();

        engine.run_until(499, &mut consumer, &mut NullSink);
        let sid = engine.sid(0).unwrap();
        assert_eq!(sid.register(0x00), 0x22, "same-cycle writes apply in order");
        assert_eq!(sid.register(0x01), 0x00, "future write must not be applied");

        engine.run_until(500, &mut consumer, &mut NullSink);
        assert_eq!(engine.sid(0).unwrap().register(0x01), 0x33);
        assert_eq!(engine.cycles(), 500);
        assert_eq!(engine.events_applied(), 3);
    }

    #[test]
    fn test_event_behind_the_chips_counts_as_late() {
        let (mut engine, mut producer, mut consumer, _) = engine(&SessionConfig::default());
        consumer.refresh();
        producer.enqueue(sid1(0x18, 0x0F, 100));

        // stale snapshot: the chips run past cycle 100 without the event
        engine.run_until(5000, &mut consumer, &mut NullSink);
        assert_eq!(engine.sid(0).unwrap().register(0x18), 0x00);

        consumer.refresh();
        engine.run_until(5000, &mut consumer, &mut NullSink);
        assert_eq!(engine.sid(0).unwrap().register(0x18), 0x0F);
        assert_eq!(engine.late_events(), 1);
    }

    #[test]
    fn test_slices_land_on_event_cycles() {
        let (mut engine, mut producer, mut consumer, _) = engine(&SessionConfig::default());
        producer.enqueue(sid1(0x00, 0x01, 1000));
        consumer.refresh();

        engine.run_until(5000, &mut consumer, &mut NullSink);
        assert_eq!(engine.sid(0).unwrap().cycles(), 5000);
        assert_eq!(engine.sid(0).unwrap().register(0x00), 0x01);
    }

    #[test]
    fn test_one_second_yields_nominal_samples() {
        let config = SessionConfig::default();
        let (mut engine, _producer, mut consumer, _) = engine(&config);
        let generated = engine.run_until(u64::from(PAL_CLOCK_HZ), &mut consumer, &mut NullSink);
        assert_eq!(generated, u64::from(config.nominal_sample_rate));
    }

    #[test]
    fn test_volume_write_reaches_output() {
        let (mut engine, mut producer, mut consumer, _) = engine(&SessionConfig::default());
        producer.enqueue(sid1(0x18, 0x0F, 100));
        consumer.refresh();

        let mut sink = CaptureSink {
            frames: Vec::new(),
            occupancy: None,
        };
        engine.run_until(2000, &mut consumer, &mut sink);
        assert_eq!(sink.frames[0], StereoFrame::silence());
        let last = sink.frames.last().copied().unwrap();
        assert_ne!(last.left, 0, "6581 DC level scaled by volume is audible");
        assert_eq!(last.left, last.right);
    }

    #[test]
    fn test_read_back_published_after_run() {
        let (mut engine, mut producer, mut consumer, read_back) = engine(&SessionConfig::default());
        producer.enqueue(sid1(0x14, 0xF0, 1));
        producer.enqueue(sid1(0x12, 0x01, 2));
        consumer.refresh();

        engine.run_until(20_000, &mut consumer, &mut NullSink);
        assert_eq!(read_back.get(0, ENV3), engine.sid(0).unwrap().read(ENV3));
        assert!(read_back.get(0, ENV3) > 0);
    }

    #[test]
    fn test_missing_chips_ignore_writes() {
        let (mut engine, _producer, _consumer, _) = engine(&SessionConfig::default());
        engine.apply(BusEvent::new(ChipTarget::Sid2, 0x18, 0x0F, 1));
        engine.apply(BusEvent::new(ChipTarget::Fm, 0x00, 0x20, 1));
        assert!(engine.sid(1).is_none());
        assert!(engine.fm().is_none());
        assert_eq!(engine.events_applied(), 0);
    }

    #[test]
    fn test_fm_events_use_ports() {
        let config = SessionConfig {
            fm_enabled: true,
            ..SessionConfig::default()
        };
        let (mut engine, _producer, _consumer, _) = engine(&config);
        engine.apply(BusEvent::new(ChipTarget::Fm, 0, 0xA0, 1));
        engine.apply(BusEvent::new(ChipTarget::Fm, 1, 0x44, 2));
        assert_eq!(engine.fm().unwrap().register(0xA0), 0x44);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let config = SessionConfig {
            sid2: Some(SidModel::Mos8580),
            mapping: AddressMapping::D420,
            ..SessionConfig::default()
        };
        let (mut engine, mut producer, mut consumer, read_back) = engine(&config);
        producer.enqueue(sid1(0x18, 0x0F, 5));
        producer.enqueue(BusEvent::new(ChipTarget::Sid2, 0x04, 0x11, 6));
        consumer.refresh();
        engine.run_until(10_000, &mut consumer, &mut NullSink);

        engine.reset();
        assert_eq!(engine.cycles(), 0);
        assert_eq!(engine.samples(), 0);
        assert_eq!(engine.sid(0).unwrap().registers(), &[0; 32]);
        assert_eq!(engine.sid(1).unwrap().registers(), &[0; 32]);
        assert_eq!(engine.rate().windows(), 0);
        assert_eq!(read_back.get(0, ENV3), 0);
    }

    #[test]
    fn test_starved_sink_raises_rate_and_fm_follows() {
        let config = SessionConfig {
            fm_enabled: true,
            ..SessionConfig::default()
        };
        let (mut engine, _producer, mut consumer, _) = engine(&config);
        let mut sink = CaptureSink {
            frames: Vec::new(),
            occupancy: Some(0),
        };

        engine.run_until(u64::from(PAL_CLOCK_HZ) / 2, &mut consumer, &mut sink);
        let rate = engine.rate().rate();
        assert!(rate > config.nominal_sample_rate, "rate {rate}");
        assert_eq!(engine.fm().unwrap().sample_rate(), rate);
        assert!(engine.samples() > u64::from(config.nominal_sample_rate) / 2);
    }
}
