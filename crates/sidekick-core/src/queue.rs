//! Lock-free single-producer/single-consumer event queue
//!
//! Bridges the interrupt context (producer) and the background loop
//! (consumer). The two ends are separate owned handles: neither implements
//! `Clone`, so a queue has exactly one writer and one reader.
//!
//! Each slot stores the event timestamp and a packed payload in two atomics,
//! which keeps the whole queue free of `unsafe`. The write index is published
//! with release ordering after the slot stores, and the consumer acquires it
//! before touching slots, so a visible index always covers initialised slots.

use crate::event::BusEvent;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Default queue capacity.
///
/// Sized to absorb the worst write burst between two background-loop drains
/// with a wide margin; overflow is treated as a fatal sizing bug.
pub const EVENT_QUEUE_CAPACITY: usize = 128 * 1024;

struct Slot {
    cycle: AtomicU64,
    payload: AtomicU32,
}

struct Shared {
    slots: Box<[Slot]>,
    mask: usize,
    write_index: AtomicUsize,
    read_index: AtomicUsize,
}

impl Shared {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn load(&self, index: usize) -> BusEvent {
        let slot = &self.slots[index & self.mask];
        BusEvent::from_parts(
            slot.payload.load(Ordering::Relaxed),
            slot.cycle.load(Ordering::Relaxed),
        )
    }
}

/// Create a queue holding `capacity` events.
///
/// The capacity is rounded up to the next power of two so indices can be
/// masked instead of divided.
///
/// # Panics
///
/// Panics if `capacity` is 0.
pub fn event_queue(capacity: usize) -> (EventProducer, EventConsumer) {
    assert!(capacity > 0, "event queue capacity must be greater than 0");
    let capacity = capacity.next_power_of_two();

    let slots = (0..capacity)
        .map(|_| Slot {
            cycle: AtomicU64::new(0),
            payload: AtomicU32::new(0),
        })
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let shared = Arc::new(Shared {
        slots,
        mask: capacity - 1,
        write_index: AtomicUsize::new(0),
        read_index: AtomicUsize::new(0),
    });

    (
        EventProducer {
            shared: Arc::clone(&shared),
            write_index: 0,
        },
        EventConsumer {
            shared,
            read_index: 0,
            visible_write: 0,
        },
    )
}

/// Writing end of the event queue, owned by the interrupt context
pub struct EventProducer {
    shared: Arc<Shared>,
    write_index: usize,
}

impl EventProducer {
    /// Append an event.
    ///
    /// Constant time, never allocates or blocks.
    ///
    /// # Panics
    ///
    /// Panics when the queue already holds `capacity` events. The capacity
    /// is dimensioned so this cannot happen under correct operation.
    #[inline]
    pub fn enqueue(&mut self, event: BusEvent) {
        let read = self.shared.read_index.load(Ordering::Acquire);
        let pending = self.write_index.wrapping_sub(read);
        assert!(
            pending < self.shared.capacity(),
            "event queue overflow: {pending} events pending"
        );

        let slot = &self.shared.slots[self.write_index & self.shared.mask];
        slot.cycle.store(event.cycle, Ordering::Relaxed);
        slot.payload.store(event.payload(), Ordering::Relaxed);

        self.write_index = self.write_index.wrapping_add(1);
        self.shared
            .write_index
            .store(self.write_index, Ordering::Release);
    }

    /// Monotonic write index (number of events ever enqueued, wrapping).
    pub fn write_index(&self) -> usize {
        self.write_index
    }

    /// Events enqueued but not yet consumed.
    pub fn len(&self) -> usize {
        self.write_index
            .wrapping_sub(self.shared.read_index.load(Ordering::Acquire))
    }

    /// True if the consumer has caught up.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue capacity in events.
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

impl fmt::Debug for EventProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventProducer")
            .field("write_index", &self.write_index)
            .field("capacity", &self.shared.capacity())
            .finish()
    }
}

/// Reading end of the event queue, owned by the background loop
///
/// The consumer only looks at events below its *visible* write index, a
/// snapshot taken by [`EventConsumer::refresh`]. Taking the snapshot before
/// inspecting the reset marker guarantees that events enqueued after a
/// reset are never mistaken for pre-reset events.
pub struct EventConsumer {
    shared: Arc<Shared>,
    read_index: usize,
    visible_write: usize,
}

impl EventConsumer {
    /// Snapshot the producer's write index.
    pub fn refresh(&mut self) {
        self.visible_write = self.shared.write_index.load(Ordering::Acquire);
    }

    /// Events visible since the last refresh.
    pub fn len(&self) -> usize {
        self.visible_write.wrapping_sub(self.read_index)
    }

    /// True if no visible events remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Oldest visible event without consuming it.
    pub fn peek(&self) -> Option<BusEvent> {
        if self.is_empty() {
            return None;
        }
        Some(self.shared.load(self.read_index))
    }

    /// Remove and return the oldest visible event.
    pub fn pop(&mut self) -> Option<BusEvent> {
        let event = self.peek()?;
        self.advance(1);
        Some(event)
    }

    /// Remove and return the oldest visible event if it is due at `cycle`.
    pub fn pop_due(&mut self, cycle: u64) -> Option<BusEvent> {
        match self.peek() {
            Some(event) if event.cycle <= cycle => {
                self.advance(1);
                Some(event)
            }
            _ => None,
        }
    }

    /// Iterate over all visible events with a timestamp `<= cycle`, in
    /// enqueue order, consuming them.
    pub fn drain_up_to(&mut self, cycle: u64) -> DrainUpTo<'_> {
        DrainUpTo {
            consumer: self,
            cycle,
        }
    }

    /// Drop every event enqueued before the producer reached `mark`
    /// (the low 32 bits of a write index). Returns the number discarded.
    pub fn discard_until(&mut self, mark: u32) -> usize {
        self.refresh();
        let behind = (mark.wrapping_sub(self.read_index as u32)) as usize;
        let count = behind.min(self.len());
        self.advance(count);
        count
    }

    /// Monotonic read index.
    pub fn read_index(&self) -> usize {
        self.read_index
    }

    /// Queue capacity in events.
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    fn advance(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.read_index = self.read_index.wrapping_add(count);
        self.shared
            .read_index
            .store(self.read_index, Ordering::Release);
    }
}

impl fmt::Debug for EventConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventConsumer")
            .field("read_index", &self.read_index)
            .field("visible_write", &self.visible_write)
            .field("capacity", &self.shared.capacity())
            .finish()
    }
}

/// Iterator returned by [`EventConsumer::drain_up_to`]
pub struct DrainUpTo<'a> {
    consumer: &'a mut EventConsumer,
    cycle: u64,
}

impl Iterator for DrainUpTo<'_> {
    type Item = BusEvent;

    fn next(&mut self) -> Option<BusEvent> {
        self.consumer.pop_due(self.cycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChipTarget;
    use std::thread;

    fn write(cycle: u64, value: u8) -> BusEvent {
        BusEvent::new(ChipTarget::Sid1, 0x18, value, cycle)
    }

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let (producer, consumer) = event_queue(1000);
        assert_eq!(producer.capacity(), 1024);
        assert_eq!(consumer.capacity(), 1024);
    }

    #[test]
    fn test_fill_to_exact_capacity() {
        let (mut producer, mut consumer) = event_queue(16);
        for i in 0..16 {
            producer.enqueue(write(i, i as u8));
        }
        assert_eq!(producer.len(), 16, "all N enqueues must succeed");

        consumer.refresh();
        let drained: Vec<_> = consumer.drain_up_to(u64::MAX).collect();
        assert_eq!(drained.len(), 16);
        assert!(drained.iter().enumerate().all(|(i, e)| e.cycle == i as u64));
    }

    #[test]
    #[should_panic(expected = "event queue overflow")]
    fn test_overflow_is_fatal() {
        let (mut producer, _consumer) = event_queue(4);
        for i in 0..5 {
            producer.enqueue(write(i, 0));
        }
    }

    #[test]
    fn test_drain_stops_at_cycle() {
        let (mut producer, mut consumer) = event_queue(8);
        producer.enqueue(write(10, 1));
        producer.enqueue(write(20, 2));
        producer.enqueue(write(30, 3));
        consumer.refresh();

        let first: Vec<_> = consumer.drain_up_to(20).map(|e| e.value).collect();
        assert_eq!(first, vec![1, 2]);
        assert_eq!(consumer.peek().map(|e| e.cycle), Some(30));
    }

    #[test]
    fn test_events_invisible_until_refresh() {
        let (mut producer, mut consumer) = event_queue(8);
        consumer.refresh();
        producer.enqueue(write(1, 1));
        assert!(consumer.pop().is_none(), "snapshot must hide later events");
        consumer.refresh();
        assert_eq!(consumer.pop().map(|e| e.value), Some(1));
    }

    #[test]
    fn test_wraparound_keeps_order() {
        let (mut producer, mut consumer) = event_queue(4);
        let mut expected = 0u64;
        for round in 0..10u64 {
            for i in 0..3 {
                producer.enqueue(write(round * 3 + i, 0));
            }
            consumer.refresh();
            while let Some(event) = consumer.pop() {
                assert_eq!(event.cycle, expected);
                expected += 1;
            }
        }
        assert_eq!(expected, 30);
    }

    #[test]
    fn test_discard_until_mark() {
        let (mut producer, mut consumer) = event_queue(8);
        producer.enqueue(write(1, 1));
        producer.enqueue(write(2, 2));
        let mark = producer.write_index() as u32;
        producer.enqueue(write(0, 3));

        assert_eq!(consumer.discard_until(mark), 2);
        assert_eq!(consumer.pop().map(|e| e.value), Some(3));
    }

    #[test]
    fn test_cross_thread_order() {
        let (mut producer, mut consumer) = event_queue(64);
        let total = 10_000u64;

        let writer = thread::spawn(move || {
            for cycle in 0..total {
                while producer.len() == producer.capacity() {
                    thread::yield_now();
                }
                producer.enqueue(write(cycle, cycle as u8));
            }
        });

        let mut next = 0u64;
        while next < total {
            consumer.refresh();
            while let Some(event) = consumer.pop() {
                assert_eq!(event.cycle, next, "events must arrive in enqueue order");
                assert_eq!(event.value, next as u8);
                next += 1;
            }
        }
        writer.join().unwrap();
    }
}
