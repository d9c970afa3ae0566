//! The packet ring buffer: one writer rotating packets across N fixed
//! segments of a shared arena, drained by two independent reader
//! policies.
//!
//! [`PacketRing`] owns the arena and the writer-published state and hands
//! out the moving parts: exactly one [`RingWriter`], any number of
//! [`ArchivalReader`]s (each with its own private index) and
//! [`LatestReader`]s. Readers never mutate segment state; the only
//! cross-domain communication is the writer's Release-published counters.

pub mod archival;
pub mod latest;
pub mod state;
pub mod writer;

pub use archival::{ArchivalReader, SegmentHandle};
pub use latest::LatestReader;
pub use writer::RingWriter;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::bus::arena::{Arena, ArenaBus};
use crate::burst::reader::BurstReader;
use crate::burst::writer::BurstWriter;
use crate::config::EngineConfig;
use crate::error::{Result, StoreError};
use crate::ring::state::RingShared;
use crate::telemetry::{FaultCounters, FaultSnapshot};

/// A packet ring engine: arena, segment state, and fault counters.
///
/// # Example
///
/// ```
/// use framestore::{EngineConfig, Item, PacketRing, Sink};
///
/// # fn main() -> framestore::Result<()> {
/// let config = EngineConfig {
///     segment_capacity: 64,
///     segment_count: 4,
///     ..Default::default()
/// };
/// let ring = PacketRing::new(&config)?;
/// let mut writer = ring.writer()?;
///
/// // One two-word packet.
/// writer.accept(Item::first(0xAA)).ok();
/// writer.accept(Item::last(0xBB)).ok();
/// assert_eq!(ring.packets_committed(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PacketRing {
    config: EngineConfig,
    shared: Arc<RingShared>,
    arena: Arc<Arena>,
    faults: Arc<FaultCounters>,
    writer_taken: AtomicBool,
}

impl PacketRing {
    /// Build a ring over an anonymous (process-private) arena.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let arena = Arena::anon(config.arena_len() as usize)?;
        Ok(Self::assemble(config.clone(), arena))
    }

    /// Build a ring over a file-backed arena (e.g. in `/dev/shm`), so
    /// external capture tools can map the same segments.
    pub fn create(config: &EngineConfig, path: &Path) -> Result<Self> {
        config.validate()?;
        let arena = Arena::create(path, config.arena_len() as usize)?;
        Ok(Self::assemble(config.clone(), arena))
    }

    fn assemble(config: EngineConfig, arena: Arena) -> Self {
        info!(
            segment_capacity = config.segment_capacity,
            segment_count = config.segment_count,
            base_address = config.arena_base_address,
            file_backed = arena.path().is_some(),
            "packet ring created"
        );
        Self {
            shared: Arc::new(RingShared::new(&config)),
            arena: Arc::new(arena),
            faults: Arc::new(FaultCounters::new()),
            config,
            writer_taken: AtomicBool::new(false),
        }
    }

    fn bus(&self) -> ArenaBus {
        ArenaBus::new(
            Arc::clone(&self.arena),
            self.config.arena_base_address,
            self.config.bus_response_latency,
        )
    }

    /// Take the ring's single writer. The second call errors: the engine
    /// assumes exactly one producer per ring.
    pub fn writer(&self) -> Result<RingWriter> {
        if self.writer_taken.swap(true, Ordering::SeqCst) {
            return Err(StoreError::WriterTaken);
        }
        let engine = BurstWriter::new(self.bus(), &self.config, Arc::clone(&self.faults));
        Ok(RingWriter::new(
            Arc::clone(&self.shared),
            engine,
            Arc::clone(&self.faults),
        ))
    }

    /// Create an archival-policy reader with its own private index.
    pub fn archival_reader(&self) -> ArchivalReader {
        ArchivalReader::new(Arc::clone(&self.shared), Arc::clone(&self.arena))
    }

    /// Create a latest-policy (display) reader.
    pub fn latest_reader(&self) -> LatestReader {
        let engine = BurstReader::new(self.bus(), &self.config, Arc::clone(&self.faults));
        LatestReader::new(Arc::clone(&self.shared), Arc::clone(&self.arena), engine)
    }

    /// Point-in-time fault counter snapshot.
    pub fn faults(&self) -> FaultSnapshot {
        self.faults.snapshot()
    }

    /// The shared fault counters (e.g. to wire a [`crate::stream::Combiner`]
    /// into the same telemetry).
    pub fn fault_counters(&self) -> &Arc<FaultCounters> {
        &self.faults
    }

    /// The arena backing the segments.
    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    /// The configuration this ring was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Segment the writer currently owns.
    pub fn write_index(&self) -> usize {
        self.shared.write_index()
    }

    /// Monotonic count of completed packets.
    pub fn packets_committed(&self) -> u64 {
        self.shared.packets_committed()
    }

    /// Bytes committed into segment `index`.
    pub fn segment_level(&self, index: usize) -> Result<u64> {
        if index >= self.config.segment_count {
            return Err(StoreError::SegmentOutOfRange {
                index,
                count: self.config.segment_count,
            });
        }
        Ok(self.shared.level(index))
    }

    /// Whether segment `index` holds a truncated packet.
    pub fn segment_overflowed(&self, index: usize) -> Result<bool> {
        if index >= self.config.segment_count {
            return Err(StoreError::SegmentOutOfRange {
                index,
                count: self.config.segment_count,
            });
        }
        Ok(self.shared.overflowed(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_config() {
        let config = EngineConfig {
            segment_count: 1,
            ..Default::default()
        };
        assert!(PacketRing::new(&config).is_err());
    }

    #[test]
    fn test_segment_accessors_bounds_checked() {
        let config = EngineConfig {
            segment_capacity: 64,
            segment_count: 4,
            ..Default::default()
        };
        let ring = PacketRing::new(&config).unwrap();
        assert_eq!(ring.segment_level(3).unwrap(), 0);
        assert!(matches!(
            ring.segment_level(4),
            Err(StoreError::SegmentOutOfRange { index: 4, count: 4 })
        ));
        assert!(ring.segment_overflowed(5).is_err());
    }

    #[test]
    fn test_file_backed_ring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ring.raw");
        let config = EngineConfig {
            segment_capacity: 64,
            segment_count: 2,
            max_reader_lag_segments: 0,
            ..Default::default()
        };
        let ring = PacketRing::create(&config, &path).unwrap();
        assert_eq!(ring.arena().len(), 128);
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            config.arena_len()
        );
    }
}
