#![allow(unsafe_code)]
//! Elastic buffers: bounded FIFOs implementing the transfer handshake on
//! both sides.
//!
//! Two variants share the same level-counter bookkeeping:
//!
//! - [`ElasticBuffer`]: plain single-context queue decoupling producer and
//!   consumer rates within one execution domain.
//! - [`cross_domain`]: an SPSC pair bridging two independently scheduled
//!   execution domains. This is the *only* primitive in the engine that is
//!   allowed to carry data across domains; everything else stays inside
//!   one domain.
//!
//! Both publish monotonic `read_level`/`write_level` counters. The
//! cross-domain variant publishes them with Release stores and reads the
//! opposite counter with Acquire loads, so a consumer can never observe an
//! occupancy increase before the slot write behind it is visible: the
//! software equivalent of gray-coded pointer synchronization between clock
//! domains.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Result, StoreError};
use crate::stream::flow::{Item, Sink, Source};

/// Spins before falling back to `yield_now` in bounded waits.
const SPIN_BUDGET: u32 = 64;

// ---------------------------------------------------------------------------
// Same-domain variant
// ---------------------------------------------------------------------------

/// Fixed-capacity circular buffer of items with monotonic level counters.
///
/// Never resized after creation. A depth of zero degenerates to a direct
/// one-slot hand-off: an item pushed in one step must be popped before the
/// next push succeeds, which wires the producer straight to the consumer
/// with no rate decoupling.
#[derive(Debug)]
pub struct ElasticBuffer<P> {
    slots: Box<[Option<Item<P>>]>,
    read_level: u64,
    write_level: u64,
}

impl<P> ElasticBuffer<P> {
    /// Create a buffer holding up to `depth` items (`depth == 0` gives the
    /// direct-wire degenerate form).
    pub fn new(depth: usize) -> Self {
        let slots = (0..depth.max(1)).map(|_| None).collect();
        Self {
            slots,
            read_level: 0,
            write_level: 0,
        }
    }

    /// Append an item; hands it back if the buffer is full.
    pub fn push(&mut self, item: Item<P>) -> Result<(), Item<P>> {
        if self.is_full() {
            return Err(item);
        }
        let idx = (self.write_level % self.slots.len() as u64) as usize;
        self.slots[idx] = Some(item);
        self.write_level += 1;
        Ok(())
    }

    /// Remove the oldest item, or `None` when empty.
    pub fn pop(&mut self) -> Option<Item<P>> {
        if self.is_empty() {
            return None;
        }
        let idx = (self.read_level % self.slots.len() as u64) as usize;
        let item = self.slots[idx].take();
        self.read_level += 1;
        item
    }

    /// Peek at the oldest item without consuming it.
    pub fn front(&self) -> Option<&Item<P>> {
        if self.is_empty() {
            return None;
        }
        let idx = (self.read_level % self.slots.len() as u64) as usize;
        self.slots[idx].as_ref()
    }

    /// Monotonic `(read_level, write_level)` counters. Their difference is
    /// the current occupancy.
    pub fn occupancy(&self) -> (u64, u64) {
        (self.read_level, self.write_level)
    }

    /// Items currently buffered.
    pub fn len(&self) -> usize {
        (self.write_level - self.read_level) as usize
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.write_level == self.read_level
    }

    /// True when a push would be refused.
    pub fn is_full(&self) -> bool {
        self.len() == self.slots.len()
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl<P> Source<P> for ElasticBuffer<P> {
    fn valid(&self) -> bool {
        !self.is_empty()
    }

    fn take(&mut self) -> Option<Item<P>> {
        self.pop()
    }
}

impl<P> Sink<P> for ElasticBuffer<P> {
    fn ready(&self) -> bool {
        !self.is_full()
    }

    fn accept(&mut self, item: Item<P>) -> Result<(), Item<P>> {
        self.push(item)
    }
}

// ---------------------------------------------------------------------------
// Cross-domain variant
// ---------------------------------------------------------------------------

struct Shared<P> {
    slots: Box<[UnsafeCell<Option<Item<P>>>]>,
    /// Oldest unconsumed slot, owned by the consumer, read by the producer.
    read_level: AtomicU64,
    /// Next free slot, owned by the producer, read by the consumer.
    write_level: AtomicU64,
}

// SAFETY: each slot is accessed mutably by exactly one side at a time. The
// producer writes slot `w` only after observing (Acquire) that the consumer
// has advanced read_level past it, and publishes the write with a Release
// store of write_level; the consumer takes slot `r` only after observing
// (Acquire) write_level > r. The level counters therefore hand exclusive
// slot ownership back and forth with a happens-before edge in each
// direction.
unsafe impl<P: Send> Sync for Shared<P> {}
unsafe impl<P: Send> Send for Shared<P> {}

impl<P> Shared<P> {
    fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }
}

/// Create a cross-domain SPSC elastic buffer of the given depth.
///
/// Returns the producer and consumer halves; each half is `Send` but not
/// cloneable, so exactly one execution domain drives each side. A depth of
/// zero degenerates to a one-slot hand-off, as with [`ElasticBuffer`].
pub fn cross_domain<P: Send>(depth: usize) -> (FifoProducer<P>, FifoConsumer<P>) {
    let shared = Arc::new(Shared {
        slots: (0..depth.max(1)).map(|_| UnsafeCell::new(None)).collect(),
        read_level: AtomicU64::new(0),
        write_level: AtomicU64::new(0),
    });
    (
        FifoProducer {
            shared: Arc::clone(&shared),
        },
        FifoConsumer { shared },
    )
}

/// Producer half of a cross-domain elastic buffer.
pub struct FifoProducer<P: Send> {
    shared: Arc<Shared<P>>,
}

impl<P: Send> FifoProducer<P> {
    /// Append an item; hands it back if the buffer is full.
    pub fn try_push(&mut self, item: Item<P>) -> Result<(), Item<P>> {
        // write_level is producer-owned, so a Relaxed load sees our own
        // last store; read_level needs Acquire to make the consumer's slot
        // take visible before we overwrite it.
        let w = self.shared.write_level.load(Ordering::Relaxed);
        let r = self.shared.read_level.load(Ordering::Acquire);
        if w - r >= self.shared.capacity() {
            return Err(item);
        }
        let idx = (w % self.shared.capacity()) as usize;
        // SAFETY: slot `idx` was drained by the consumer (r advanced past
        // it) and no other producer exists, so we hold exclusive access.
        unsafe {
            *self.shared.slots[idx].get() = Some(item);
        }
        self.shared.write_level.store(w + 1, Ordering::Release);
        Ok(())
    }

    /// Append an item, waiting up to `timeout` for space.
    ///
    /// An expired wait commits nothing: the item comes back unchanged in
    /// `Err`, which doubles as the timeout signal.
    pub fn push_timeout(&mut self, mut item: Item<P>, timeout: Duration) -> Result<(), Item<P>> {
        let deadline = Instant::now() + timeout;
        let mut spins = 0u32;
        loop {
            match self.try_push(item) {
                Ok(()) => return Ok(()),
                Err(back) => item = back,
            }
            if Instant::now() >= deadline {
                return Err(item);
            }
            if spins < SPIN_BUDGET {
                spins += 1;
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Monotonic `(read_level, write_level)` counters.
    pub fn occupancy(&self) -> (u64, u64) {
        (
            self.shared.read_level.load(Ordering::Acquire),
            self.shared.write_level.load(Ordering::Acquire),
        )
    }
}

impl<P: Send> Sink<P> for FifoProducer<P> {
    fn ready(&self) -> bool {
        let (r, w) = self.occupancy();
        w - r < self.shared.capacity()
    }

    fn accept(&mut self, item: Item<P>) -> Result<(), Item<P>> {
        self.try_push(item)
    }
}

/// Consumer half of a cross-domain elastic buffer.
pub struct FifoConsumer<P: Send> {
    shared: Arc<Shared<P>>,
}

impl<P: Send> FifoConsumer<P> {
    /// Remove the oldest item, or `None` when empty.
    pub fn try_pop(&mut self) -> Option<Item<P>> {
        // read_level is consumer-owned; write_level needs Acquire so the
        // producer's slot write is visible before we read it.
        let r = self.shared.read_level.load(Ordering::Relaxed);
        let w = self.shared.write_level.load(Ordering::Acquire);
        if r == w {
            return None;
        }
        let idx = (r % self.shared.capacity()) as usize;
        // SAFETY: write_level > r guarantees the producer published this
        // slot and will not touch it again until read_level passes it.
        let item = unsafe { (*self.shared.slots[idx].get()).take() };
        self.shared.read_level.store(r + 1, Ordering::Release);
        item
    }

    /// Remove the oldest item, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&mut self, timeout: Duration) -> Result<Item<P>> {
        let deadline = Instant::now() + timeout;
        let mut spins = 0u32;
        loop {
            if let Some(item) = self.try_pop() {
                return Ok(item);
            }
            if Instant::now() >= deadline {
                return Err(StoreError::Timeout {
                    what: "item in cross-domain buffer",
                    timeout,
                });
            }
            if spins < SPIN_BUDGET {
                spins += 1;
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Monotonic `(read_level, write_level)` counters.
    pub fn occupancy(&self) -> (u64, u64) {
        (
            self.shared.read_level.load(Ordering::Acquire),
            self.shared.write_level.load(Ordering::Acquire),
        )
    }
}

impl<P: Send> Source<P> for FifoConsumer<P> {
    fn valid(&self) -> bool {
        let (r, w) = self.occupancy();
        w > r
    }

    fn take(&mut self) -> Option<Item<P>> {
        self.try_pop()
    }
}
