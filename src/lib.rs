//! `framestore`
//!
//! Burst-oriented storage engine for continuous high-rate packet streams
//! (camera frames and similar single-source data). One fast producer
//! writes variable-length packets into a fixed set of rotating memory
//! segments through a flow-controlled, burst-pipelined transfer path; two
//! independent consumer policies drain them:
//!
//! - **Archival**: every completed packet, exactly once, in order, with
//!   bounded waits ([`ArchivalReader`]).
//! - **Latest**: only the newest completed packet, never waiting, silently
//!   skipping stale data ([`LatestReader`]).
//!
//! ## Layers
//!
//! - [`stream`]: the one-item-per-step transfer handshake ([`Item`],
//!   [`Source`]/[`Sink`], [`transfer`]) and the stages built on it:
//!   elastic buffers (same-domain and cross-domain), width adapters, and
//!   fan-out/fan-in.
//! - [`bus`]: the two-phase burst protocol and the [`Arena`], a flat
//!   mapped byte region (anonymous or file-backed) holding the segments
//!   with no in-band metadata.
//! - [`burst`]: the write/read engines converting item streams into burst
//!   requests, with outstanding-request accounting and a run-length
//!   encoded side channel reattaching packet boundaries that burst
//!   pipelining strips.
//! - [`ring`]: the packet ring itself: writer, segment state publication,
//!   and the two reader policies.
//!
//! ## Scheduling model
//!
//! Components are explicit state machines advanced by `step()` calls; the
//! caller is the scheduler, and a component's outputs in one step depend
//! only on its pre-step state. Each component lives in one execution
//! domain. The only primitives that may cross domains are the
//! cross-domain elastic buffer ([`stream::cross_domain`]) and the ring's
//! writer-published counters, both of which publish with Release stores
//! and observe with Acquire loads.
//!
//! ## Faults vs errors
//!
//! The engine is built for continuous operation: packet overflow, bus
//! errors, flush timeouts and lane desynchronization are *counted* in
//! [`FaultCounters`] and the pipeline keeps moving. Hard [`StoreError`]s
//! are reserved for configuration rejection, expired bounded waits and
//! arena I/O.
//!
//! ## Example
//!
//! ```
//! use framestore::{EngineConfig, Item, PacketRing, Sink};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let config = EngineConfig {
//!     segment_capacity: 800,
//!     segment_count: 4,
//!     ..Default::default()
//! };
//! let ring = PacketRing::new(&config).unwrap();
//! let mut writer = ring.writer().unwrap();
//!
//! // Write one packet of 100 words.
//! for i in 0..100u64 {
//!     let mut item = Item::new(i);
//!     item.first = i == 0;
//!     item.last = i == 99;
//!     while let Err(back) = writer.accept(item) {
//!         item = back;
//!         writer.step();
//!     }
//! }
//!
//! // The archival reader sees it exactly once.
//! let mut reader = ring.archival_reader();
//! let segment = reader
//!     .wait_for_next_segment(Duration::from_millis(100))
//!     .await
//!     .unwrap();
//! assert_eq!(segment.len(), 800);
//! let bytes = segment.read_raw();
//! assert_eq!(&bytes[..8], &0u64.to_le_bytes());
//! # });
//! ```

pub mod bus;
pub mod burst;
pub mod config;
pub mod error;
pub mod ring;
pub mod stream;
pub mod telemetry;

pub use bus::{AddressRequest, Arena, ArenaBus, BurstType, BusResponse, ReadBeat, WriteBeat};
pub use burst::{BurstReader, BurstWriter, EngineState, LastMarkerQueue};
pub use config::EngineConfig;
pub use error::{Result, StoreError};
pub use ring::{ArchivalReader, LatestReader, PacketRing, RingWriter, SegmentHandle};
pub use stream::{
    cross_domain, transfer, Combiner, ElasticBuffer, FifoConsumer, FifoProducer, Gearbox, Item,
    SimpleGearbox, Sink, Source, Tee,
};
pub use telemetry::{FaultCounters, FaultSnapshot};
