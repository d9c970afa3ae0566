//! Archival reader: every completed packet, exactly once, in order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::trace;

use crate::bus::arena::Arena;
use crate::error::{Result, StoreError};
use crate::ring::state::RingShared;

/// In-order consumer of completed segments.
///
/// The reader owns nothing but its private index and consumption count;
/// segment metadata is observed through the writer-published counters.
/// Segment `k` may only be read while `k != write_index`, which a live
/// single-writer round-robin guarantees is a completed segment.
///
/// Waits are bounded: both the async and the blocking variant return
/// [`StoreError::Timeout`] instead of hanging, and an abandoned wait
/// commits nothing; the next call resumes at the same segment.
#[derive(Debug)]
pub struct ArchivalReader {
    shared: Arc<RingShared>,
    arena: Arc<Arena>,
    read_index: usize,
    consumed: u64,
}

impl ArchivalReader {
    pub(crate) fn new(shared: Arc<RingShared>, arena: Arc<Arena>) -> Self {
        Self {
            shared,
            arena,
            read_index: 0,
            consumed: 0,
        }
    }

    /// Segment the reader will consume next.
    pub fn index(&self) -> usize {
        self.read_index
    }

    /// Completed packets not yet consumed by this reader.
    ///
    /// A lag at or beyond `segment_count` means the writer has lapped this
    /// reader and overwritten unread packets; exactly-once delivery holds
    /// only while consumption keeps the lag under one full rotation.
    pub fn lag(&self) -> u64 {
        self.shared.packets_committed() - self.consumed
    }

    fn ready(&self) -> bool {
        self.shared.packets_committed() > self.consumed
            && self.read_index != self.shared.write_index()
    }

    fn make_handle(&mut self) -> SegmentHandle<'_> {
        let index = self.read_index;
        let level = self.shared.level(index);
        trace!(segment = index, level, "archival segment ready");
        SegmentHandle {
            index,
            level,
            overflowed: self.shared.overflowed(index),
            reader: self,
        }
    }

    /// Take the next completed segment without waiting, if one is ready.
    pub fn try_next_segment(&mut self) -> Option<SegmentHandle<'_>> {
        if self.ready() {
            Some(self.make_handle())
        } else {
            None
        }
    }

    /// Wait (async) until the next segment is complete, bounded by
    /// `timeout`.
    pub async fn wait_for_next_segment(
        &mut self,
        timeout: Duration,
    ) -> Result<SegmentHandle<'_>> {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.ready() {
            // Register for the wakeup before the re-check so a completion
            // landing in between cannot be missed.
            let notified = self.shared.notify.notified();
            if self.ready() {
                break;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(StoreError::Timeout {
                    what: "next completed segment",
                    timeout,
                });
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
        Ok(self.make_handle())
    }

    /// Wait (blocking) until the next segment is complete, bounded by
    /// `timeout`. For capture tools without an async runtime.
    pub fn wait_for_next_segment_blocking(
        &mut self,
        timeout: Duration,
    ) -> Result<SegmentHandle<'_>> {
        let deadline = Instant::now() + timeout;
        if !self.ready() {
            let mut guard = self.shared.completion_mutex.lock();
            while !self.ready() {
                let now = Instant::now();
                if now >= deadline {
                    return Err(StoreError::Timeout {
                        what: "next completed segment",
                        timeout,
                    });
                }
                self.shared
                    .completion_cv
                    .wait_for(&mut guard, deadline - now);
            }
        }
        Ok(self.make_handle())
    }
}

/// A completed segment held out for reading.
///
/// Dropping the handle without [`SegmentHandle::read_raw`] leaves the
/// reader in place; the same segment is offered again next time.
#[derive(Debug)]
pub struct SegmentHandle<'a> {
    reader: &'a mut ArchivalReader,
    index: usize,
    level: u64,
    overflowed: bool,
}

impl SegmentHandle<'_> {
    /// Ring index of this segment.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Packet length in bytes (`write_level`).
    pub fn len(&self) -> u64 {
        self.level
    }

    /// True for a zero-length packet (cannot occur through the writer).
    pub fn is_empty(&self) -> bool {
        self.level == 0
    }

    /// True when the packet was truncated to the segment capacity.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Bulk-copy the packet bytes `[base, base + write_level)` out of the
    /// arena and advance the reader to the next segment.
    pub fn read_raw(self) -> Bytes {
        let bytes = self
            .reader
            .arena
            .read_bytes(self.reader.shared.arena_offset(self.index), self.level);
        self.reader.consumed += 1;
        self.reader.read_index = (self.index + 1) % self.reader.shared.segment_count;
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ring::PacketRing;
    use crate::stream::flow::{Item, Sink};

    fn test_config() -> EngineConfig {
        EngineConfig {
            segment_capacity: 64,
            segment_count: 4,
            arena_base_address: 0,
            bus_response_latency: 0,
            ..Default::default()
        }
    }

    fn write_packet(writer: &mut crate::ring::RingWriter, words: &[u64]) {
        for (i, &word) in words.iter().enumerate() {
            let mut item = Item::new(word);
            item.first = i == 0;
            item.last = i == words.len() - 1;
            loop {
                match writer.accept(item) {
                    Ok(()) => break,
                    Err(back) => {
                        item = back;
                        writer.step();
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn test_exactly_once_in_order() {
        let ring = PacketRing::new(&test_config()).unwrap();
        let mut writer = ring.writer().unwrap();
        let mut reader = ring.archival_reader();

        write_packet(&mut writer, &[10, 11]);
        write_packet(&mut writer, &[20]);

        let handle = reader
            .wait_for_next_segment(Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(handle.index(), 0);
        assert_eq!(handle.len(), 16);
        let bytes = handle.read_raw();
        assert_eq!(&bytes[..8], &10u64.to_le_bytes());
        assert_eq!(&bytes[8..], &11u64.to_le_bytes());

        let handle = reader
            .wait_for_next_segment(Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(handle.index(), 1);
        assert_eq!(handle.read_raw(), Bytes::from(20u64.to_le_bytes().to_vec()));
        assert_eq!(reader.lag(), 0);
    }

    #[tokio::test]
    async fn test_wait_times_out_without_writer() {
        let ring = PacketRing::new(&test_config()).unwrap();
        let mut reader = ring.archival_reader();
        let err = reader
            .wait_for_next_segment(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_abandoned_handle_commits_nothing() {
        let ring = PacketRing::new(&test_config()).unwrap();
        let mut writer = ring.writer().unwrap();
        let mut reader = ring.archival_reader();
        write_packet(&mut writer, &[5]);

        let handle = reader
            .wait_for_next_segment(Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(handle.index(), 0);
        drop(handle);

        // Same segment again: the drop advanced nothing.
        let handle = reader.try_next_segment().unwrap();
        assert_eq!(handle.index(), 0);
        assert_eq!(reader.lag(), 1);
    }

    #[test]
    fn test_blocking_wait_wakes_on_completion() {
        let ring = Arc::new(PacketRing::new(&test_config()).unwrap());
        let mut writer = ring.writer().unwrap();
        let ring_for_reader = Arc::clone(&ring);

        let reader_thread = std::thread::spawn(move || {
            let mut reader = ring_for_reader.archival_reader();
            let handle = reader
                .wait_for_next_segment_blocking(Duration::from_secs(5))
                .unwrap();
            handle.read_raw()
        });

        std::thread::sleep(Duration::from_millis(20));
        write_packet(&mut writer, &[42]);
        let bytes = reader_thread.join().unwrap();
        assert_eq!(bytes, Bytes::from(42u64.to_le_bytes().to_vec()));
    }

    #[test]
    fn test_blocking_wait_times_out() {
        let ring = PacketRing::new(&test_config()).unwrap();
        let mut reader = ring.archival_reader();
        let start = Instant::now();
        let err = reader
            .wait_for_next_segment_blocking(Duration::from_millis(15))
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[tokio::test]
    async fn test_reader_blocks_on_segment_being_written() {
        // Three packets into a 4-deep ring: the fourth wait must block
        // because segment 3 is the writer's current segment.
        let ring = PacketRing::new(&test_config()).unwrap();
        let mut writer = ring.writer().unwrap();
        let mut reader = ring.archival_reader();
        for i in 0..3u64 {
            write_packet(&mut writer, &[i]);
        }
        for _ in 0..3 {
            reader
                .wait_for_next_segment(Duration::from_millis(20))
                .await
                .unwrap()
                .read_raw();
        }
        assert!(reader.try_next_segment().is_none());
    }
}
