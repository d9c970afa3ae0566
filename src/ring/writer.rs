//! The ring writer: one producer rotating packets across the segments.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bus::protocol::WORD_BYTES;
use crate::burst::writer::BurstWriter;
use crate::ring::state::RingShared;
use crate::stream::flow::{Item, Sink};
use crate::telemetry::FaultCounters;

/// Sole producer of a packet ring.
///
/// Each accepted item lands at `segment_base(write_index) + offset`
/// through the burst engine. A `last` marker completes the packet: the
/// engine is flushed so every byte is durably in the arena, the final
/// level is published, and the writer rotates to the next segment.
///
/// A packet that outgrows its segment is truncated fail-soft: excess
/// items are dropped (consumed but unwritten), the segment's overflow
/// flag latches exactly once, and writing resumes cleanly at the next
/// `last`. Neighboring segments are never touched.
#[derive(Debug)]
pub struct RingWriter {
    shared: Arc<RingShared>,
    engine: BurstWriter,
    index: usize,
    offset: u64,
    in_overflow: bool,
    faults: Arc<FaultCounters>,
}

impl RingWriter {
    pub(crate) fn new(
        shared: Arc<RingShared>,
        engine: BurstWriter,
        faults: Arc<FaultCounters>,
    ) -> Self {
        Self {
            shared,
            engine,
            index: 0,
            offset: 0,
            in_overflow: false,
            faults,
        }
    }

    /// Segment currently being written.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Bytes written into the current segment so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Completed packets since creation.
    pub fn packets_committed(&self) -> u64 {
        self.shared.packets_committed()
    }

    /// Advance the underlying burst engine one step. Call this from the
    /// writer's scheduling loop between accepts so requests keep draining.
    pub fn step(&mut self) {
        self.engine.step();
    }

    fn complete_segment(&mut self) {
        // Drain everything outstanding before the segment is declared
        // complete; a failed flush has already been counted and reset.
        self.engine.flush();
        debug!(
            segment = self.index,
            level = self.offset,
            truncated = self.in_overflow,
            "segment complete"
        );
        let next = (self.index + 1) % self.shared.segment_count;
        self.index = next;
        self.offset = 0;
        self.in_overflow = false;
        self.shared.clear_overflow(next);
        self.shared.publish_completion(next);
    }
}

impl Sink<u64> for RingWriter {
    /// Items that the overflow path will drop are always "accepted"; real
    /// writes require the burst engine to have room.
    fn ready(&self) -> bool {
        self.offset + WORD_BYTES > self.shared.segment_capacity || self.engine.can_accept()
    }

    fn accept(&mut self, item: Item<u64>) -> Result<(), Item<u64>> {
        if self.offset + WORD_BYTES > self.shared.segment_capacity {
            // Packet outgrew the segment: drop the item, latch the fault
            // once, keep consuming until the packet ends.
            if !self.in_overflow {
                self.in_overflow = true;
                if self.shared.latch_overflow(self.index) {
                    self.faults.record_overflow();
                }
                warn!(
                    segment = self.index,
                    capacity = self.shared.segment_capacity,
                    "packet exceeded segment capacity; truncating"
                );
            }
            if item.last {
                self.complete_segment();
            }
            return Ok(());
        }

        let address = self.shared.segment_base(self.index) + self.offset;
        if !self.engine.try_accept(address, item.payload) {
            // Backpressure: nothing committed, caller retries after step().
            return Err(item);
        }
        self.offset += WORD_BYTES;
        self.shared.publish_level(self.index, self.offset);
        if item.last {
            self.complete_segment();
        }
        Ok(())
    }
}
