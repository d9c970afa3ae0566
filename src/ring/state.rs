//! Writer-published ring state shared with readers.
//!
//! The ring writer is the sole mutator of everything in here; readers are
//! read-only observers plus their own private index. That removes any
//! need for locking between writer and readers, but makes the publication
//! order load-bearing: a segment's `write_level` is stored (Release)
//! *before* the completion counter and write index that mark the segment
//! complete, and readers load the completion counter (Acquire) *before*
//! touching levels or data. The Acquire/Release pair also orders the
//! arena byte writes that the flush drained before publication.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::config::EngineConfig;

/// Segment metadata and completion signals, shared via `Arc`.
#[derive(Debug)]
pub(crate) struct RingShared {
    pub(crate) segment_capacity: u64,
    pub(crate) segment_count: usize,
    pub(crate) base_address: u64,
    /// Bytes committed per segment. Only meaningful for completed
    /// segments; the in-progress segment's entry trails the writer.
    levels: Box<[AtomicU64]>,
    /// Latched once per offending packet, cleared when the segment is
    /// rewritten.
    overflowed: Box<[AtomicBool]>,
    /// Segment currently owned by the writer.
    write_index: AtomicUsize,
    /// Monotonic count of completed packets.
    packets_committed: AtomicU64,
    /// Wakes async waiters on segment completion.
    pub(crate) notify: Notify,
    /// Wakes blocking waiters on segment completion. The mutex guards no
    /// data (the predicate is the atomics above); it only serializes the
    /// sleep/notify handoff so completions cannot slip between a waiter's
    /// predicate check and its wait.
    pub(crate) completion_mutex: Mutex<()>,
    pub(crate) completion_cv: Condvar,
}

impl RingShared {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        Self {
            segment_capacity: config.segment_capacity,
            segment_count: config.segment_count,
            base_address: config.arena_base_address,
            levels: (0..config.segment_count).map(|_| AtomicU64::new(0)).collect(),
            overflowed: (0..config.segment_count)
                .map(|_| AtomicBool::new(false))
                .collect(),
            write_index: AtomicUsize::new(0),
            packets_committed: AtomicU64::new(0),
            notify: Notify::new(),
            completion_mutex: Mutex::new(()),
            completion_cv: Condvar::new(),
        }
    }

    /// Bus address of segment `index`'s first byte.
    pub(crate) fn segment_base(&self, index: usize) -> u64 {
        self.base_address + self.segment_capacity * index as u64
    }

    /// Arena byte offset of segment `index`'s first byte.
    pub(crate) fn arena_offset(&self, index: usize) -> u64 {
        self.segment_capacity * index as u64
    }

    pub(crate) fn publish_level(&self, index: usize, level: u64) {
        self.levels[index].store(level, Ordering::Release);
    }

    pub(crate) fn level(&self, index: usize) -> u64 {
        self.levels[index].load(Ordering::Acquire)
    }

    /// Latch the overflow flag; returns `true` if it was newly set.
    pub(crate) fn latch_overflow(&self, index: usize) -> bool {
        !self.overflowed[index].swap(true, Ordering::Relaxed)
    }

    pub(crate) fn clear_overflow(&self, index: usize) {
        self.overflowed[index].store(false, Ordering::Relaxed);
    }

    pub(crate) fn overflowed(&self, index: usize) -> bool {
        self.overflowed[index].load(Ordering::Relaxed)
    }

    pub(crate) fn write_index(&self) -> usize {
        self.write_index.load(Ordering::Acquire)
    }

    pub(crate) fn packets_committed(&self) -> u64 {
        self.packets_committed.load(Ordering::Acquire)
    }

    /// Publish a completed segment: the writer has already stored the
    /// final level, so ordering here makes it (and the arena data behind
    /// it) visible before any reader can observe the completion.
    pub(crate) fn publish_completion(&self, next_write_index: usize) {
        self.write_index.store(next_write_index, Ordering::Release);
        self.packets_committed.fetch_add(1, Ordering::Release);
        self.notify.notify_waiters();
        // Empty critical section: see the field docs.
        drop(self.completion_mutex.lock());
        self.completion_cv.notify_all();
    }
}
