//! Latest (display) reader: always the newest completed segment, never
//! waiting, happily skipping anything stale.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::bus::arena::Arena;
use crate::bus::protocol::WORD_BYTES;
use crate::burst::reader::BurstReader;
use crate::ring::state::RingShared;
use crate::stream::flow::Item;

/// Segment currently being streamed out.
#[derive(Debug)]
struct ActiveSegment {
    index: usize,
    words_total: u64,
    words_issued: u64,
    words_delivered: u64,
}

/// Freshness-over-completeness consumer.
///
/// Whenever it needs a new segment it unconditionally takes
/// `(write_index - 1) mod N`, the most recently completed one, and
/// streams it out through the burst read engine, boundary markers
/// reattached. There is no notion of being caught up and no blocking;
/// anything the writer completed in between is silently skipped.
///
/// The policy assumes the reader drains a segment faster than the writer
/// can lap the whole ring; `EngineConfig::max_reader_lag_segments`
/// makes that assumption an explicitly validated relationship. A lapped
/// reader observes torn data, not a crash.
#[derive(Debug)]
pub struct LatestReader {
    shared: Arc<RingShared>,
    arena: Arc<Arena>,
    engine: BurstReader,
    active: Option<ActiveSegment>,
    last_served: Option<usize>,
}

impl LatestReader {
    pub(crate) fn new(shared: Arc<RingShared>, arena: Arc<Arena>, engine: BurstReader) -> Self {
        Self {
            shared,
            arena,
            engine,
            active: None,
            last_served: None,
        }
    }

    /// Segment currently being streamed, if any.
    pub fn current_index(&self) -> Option<usize> {
        self.active.as_ref().map(|active| active.index)
    }

    /// Most recently selected segment, retained after its delivery
    /// completes. Useful for observing which segments the skip-ahead
    /// policy actually served.
    pub fn last_served_index(&self) -> Option<usize> {
        self.last_served
    }

    /// Select the newest completed segment and issue as many of its word
    /// addresses as the engine will take.
    fn select_and_issue(&mut self) {
        if self.active.is_none() {
            if self.shared.packets_committed() == 0 {
                return;
            }
            let index =
                (self.shared.write_index() + self.shared.segment_count - 1) % self.shared.segment_count;
            let level = self.shared.level(index);
            if level == 0 {
                return;
            }
            debug!(segment = index, level, "latest reader serving segment");
            self.last_served = Some(index);
            self.active = Some(ActiveSegment {
                index,
                words_total: level / WORD_BYTES,
                words_issued: 0,
                words_delivered: 0,
            });
        }
        if let Some(active) = self.active.as_mut() {
            while active.words_issued < active.words_total {
                let address = self.shared.segment_base(active.index)
                    + active.words_issued * WORD_BYTES;
                let last = active.words_issued + 1 == active.words_total;
                if !self.engine.try_accept_address(address, last) {
                    break;
                }
                active.words_issued += 1;
            }
        }
    }

    /// Produce the next item of the segment being served.
    ///
    /// Returns `None` while idle (nothing completed yet, or the engine is
    /// between beats); once a segment's final item (marked `last`) has
    /// been delivered, the next call skips ahead to whatever segment is
    /// newest by then.
    pub fn poll(&mut self) -> Option<Item<u64>> {
        self.select_and_issue();
        self.engine.step();
        let mut item = self.engine.poll()?;
        if let Some(active) = self.active.as_mut() {
            item.first = active.words_delivered == 0;
            active.words_delivered += 1;
            if active.words_delivered == active.words_total {
                self.active = None;
            }
        }
        Some(item)
    }

    /// Abandon the segment in flight (if any) and discard everything the
    /// engine holds, so the next [`LatestReader::poll`] re-selects fresh.
    pub fn abandon(&mut self) {
        self.active = None;
        self.engine.reset();
    }

    /// Bulk-copy the newest completed segment without streaming, as
    /// `(segment index, packet bytes)`.
    pub fn snapshot_latest(&self) -> Option<(usize, Bytes)> {
        if self.shared.packets_committed() == 0 {
            return None;
        }
        let index =
            (self.shared.write_index() + self.shared.segment_count - 1) % self.shared.segment_count;
        let level = self.shared.level(index);
        Some((
            index,
            self.arena.read_bytes(self.shared.arena_offset(index), level),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ring::PacketRing;
    use crate::stream::flow::Sink;
    use std::time::Duration;

    fn test_config() -> EngineConfig {
        EngineConfig {
            segment_capacity: 64,
            segment_count: 4,
            arena_base_address: 0,
            bus_response_latency: 0,
            flush_timeout: Duration::from_millis(100),
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

    /// Poll until one full segment (ending in `last`) has been collected.
    fn read_segment(reader: &mut LatestReader) -> Option<(usize, Vec<u64>)> {
        let mut words = Vec::new();
        for _ in 0..10_000 {
            let Some(item) = reader.poll() else {
                if words.is_empty() && reader.current_index().is_none() {
                    return None;
                }
                continue;
            };
            words.push(item.payload);
            if item.last {
                return Some((reader.last_served_index()?, words));
            }
        }
        None
    }

    #[test]
    fn test_idle_before_first_completion() {
        let ring = PacketRing::new(&test_config()).unwrap();
        let _writer = ring.writer().unwrap();
        let mut reader = ring.latest_reader();
        assert!(reader.poll().is_none());
        assert!(reader.snapshot_latest().is_none());
    }

    #[test]
    fn test_serves_newest_completed_segment() {
        let ring = PacketRing::new(&test_config()).unwrap();
        let mut writer = ring.writer().unwrap();
        let mut reader = ring.latest_reader();

        write_packet(&mut writer, &[1, 2, 3]);
        write_packet(&mut writer, &[40, 50]);

        let (index, words) = read_segment(&mut reader).unwrap();
        // Packet two lives in segment 1, the newest completed.
        assert_eq!(index, 1);
        assert_eq!(words, vec![40, 50]);

        let (index, words) = read_segment(&mut reader).unwrap();
        // Nothing newer arrived: the same segment is served again.
        assert_eq!(index, 1);
        assert_eq!(words, vec![40, 50]);
    }

    #[test]
    fn test_boundary_markers_on_streamed_segment() {
        let ring = PacketRing::new(&test_config()).unwrap();
        let mut writer = ring.writer().unwrap();
        let mut reader = ring.latest_reader();
        write_packet(&mut writer, &[7, 8, 9]);

        let mut items = Vec::new();
        for _ in 0..10_000 {
            if let Some(item) = reader.poll() {
                items.push(item);
            }
            if items.len() == 3 {
                break;
            }
        }
        assert_eq!(items.len(), 3);
        assert!(items[0].first);
        assert!(!items[0].last);
        assert!(!items[1].first && !items[1].last);
        assert!(items[2].last);
    }

    #[test]
    fn test_skips_stale_segments_when_lapped() {
        let ring = PacketRing::new(&test_config()).unwrap();
        let mut writer = ring.writer().unwrap();
        let mut reader = ring.latest_reader();

        write_packet(&mut writer, &[1]);
        let (first_index, _) = read_segment(&mut reader).unwrap();
        assert_eq!(first_index, 0);

        // Writer races ahead by several packets between reads.
        for packet in 2..6u64 {
            write_packet(&mut writer, &[packet]);
        }
        let (index, words) = read_segment(&mut reader).unwrap();
        // write_index is back at 1 after five packets; newest completed is 0.
        assert_eq!(index, 0);
        assert_eq!(words, vec![5]);
    }

    #[test]
    fn test_snapshot_latest_matches_stream() {
        let ring = PacketRing::new(&test_config()).unwrap();
        let mut writer = ring.writer().unwrap();
        let reader = ring.latest_reader();
        write_packet(&mut writer, &[0xAB, 0xCD]);

        let (index, bytes) = reader.snapshot_latest().unwrap();
        assert_eq!(index, 0);
        assert_eq!(&bytes[..8], &0xABu64.to_le_bytes());
        assert_eq!(&bytes[8..], &0xCDu64.to_le_bytes());
    }

    #[test]
    fn test_abandon_reselects_fresh() {
        let ring = PacketRing::new(&test_config()).unwrap();
        let mut writer = ring.writer().unwrap();
        let mut reader = ring.latest_reader();

        write_packet(&mut writer, &[1, 2, 3]);
        // Start streaming segment 0, then abandon it mid-flight.
        let _ = reader.poll();
        assert_eq!(reader.current_index(), Some(0));
        reader.abandon();
        assert_eq!(reader.current_index(), None);

        write_packet(&mut writer, &[9]);
        let (index, words) = read_segment(&mut reader).unwrap();
        assert_eq!(index, 1);
        assert_eq!(words, vec![9]);
    }
}
