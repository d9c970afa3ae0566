//! Read-side burst engine: address stream in, item stream out.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, warn};

use crate::bus::arena::ArenaBus;
use crate::bus::protocol::{AddressRequest, WORD_BYTES};
use crate::burst::last_marker::LastMarkerQueue;
use crate::burst::{EngineState, OutstandingLedger};
use crate::config::EngineConfig;
use crate::stream::fifo::ElasticBuffer;
use crate::stream::flow::Item;
use crate::telemetry::FaultCounters;

/// Issues read bursts for accepted addresses and pairs the returned beats
/// back into an item stream.
///
/// The bus only marks burst ends, not packet ends, and bursts pipeline
/// freely, so the packet boundary for each accepted address travels
/// through a [`LastMarkerQueue`] side channel and is reattached to the
/// beat that carries its data. Beats whose response is not OK are counted
/// as bus errors and forwarded anyway (their data is undefined); the
/// stream never stops.
#[derive(Debug)]
pub struct BurstReader {
    bus: ArenaBus,
    max_outstanding: u32,
    max_burst_length: u32,
    burst_idle_timeout: u32,
    flush_timeout: std::time::Duration,
    state: EngineState,
    ledger: OutstandingLedger,
    building: Option<AddressRequest>,
    ready_bursts: VecDeque<AddressRequest>,
    markers: LastMarkerQueue,
    output: ElasticBuffer<u64>,
    idle_steps: u32,
    input_seen: bool,
    faults: Arc<FaultCounters>,
}

impl BurstReader {
    /// Create a read engine over `bus`.
    pub fn new(bus: ArenaBus, config: &EngineConfig, faults: Arc<FaultCounters>) -> Self {
        Self {
            bus,
            max_outstanding: config.max_outstanding,
            max_burst_length: config.max_burst_length,
            burst_idle_timeout: config.burst_idle_timeout,
            flush_timeout: config.flush_timeout,
            state: EngineState::Normal,
            ledger: OutstandingLedger::new(config.max_outstanding),
            building: None,
            ready_bursts: VecDeque::new(),
            markers: LastMarkerQueue::new(),
            output: ElasticBuffer::new(2 * config.max_burst_length as usize),
            idle_steps: 0,
            input_seen: false,
            faults,
        }
    }

    /// Current state machine state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Requests with an accepted address phase but no completed data phase.
    pub fn outstanding(&self) -> u32 {
        self.ledger.count()
    }

    /// True when a [`BurstReader::try_accept_address`] call would succeed.
    pub fn can_accept(&self) -> bool {
        self.state == EngineState::Normal
            && self.ready_bursts.len() < self.max_outstanding as usize
            && self.markers.can_record()
    }

    /// Offer one word address to read, with its packet boundary marker.
    /// Returns `false` (consuming nothing) when the engine cannot take it.
    pub fn try_accept_address(&mut self, address: u64, last: bool) -> bool {
        if !self.can_accept() {
            return false;
        }
        let extends = self.building.as_ref().is_some_and(|b| {
            address == b.address + u64::from(b.beats) * WORD_BYTES && b.beats < self.max_burst_length
        });
        if extends {
            if let Some(building) = self.building.as_mut() {
                building.beats += 1;
            }
        } else {
            self.close_building();
            self.building = Some(AddressRequest::incr(address, 1));
        }
        let recorded = self.markers.record(last);
        debug_assert!(recorded, "marker store had room per can_accept");
        self.input_seen = true;
        true
    }

    fn close_building(&mut self) {
        if let Some(burst) = self.building.take() {
            self.ready_bursts.push_back(burst);
        }
    }

    fn issue(&mut self) {
        loop {
            if self.ledger.is_full() {
                break;
            }
            let Some(burst) = self.ready_bursts.pop_front() else {
                break;
            };
            let accepted = self.ledger.try_inc();
            debug_assert!(accepted);
            self.bus.submit_read(burst);
        }
    }

    fn collect(&mut self) {
        while !self.output.is_full() {
            let Some(beat) = self.bus.poll_read_beat() else {
                break;
            };
            if beat.last {
                self.ledger.dec();
            }
            if !beat.resp.is_ok() {
                self.faults.record_bus_error();
                warn!(resp = ?beat.resp, "read beat returned a bus error");
            }
            let item = Item {
                payload: beat.data,
                first: false,
                last: self.markers.next_is_last(),
            };
            // Room was checked above.
            let _ = self.output.push(item);
        }
    }

    /// Advance the engine one step: age the bus, issue what the ledger
    /// allows, pair returned beats with their markers, update state.
    pub fn step(&mut self) {
        self.bus.step();

        if self.input_seen {
            self.idle_steps = 0;
        } else {
            self.idle_steps = self.idle_steps.saturating_add(1);
        }
        self.input_seen = false;
        if self.building.is_some() && self.idle_steps >= self.burst_idle_timeout {
            self.close_building();
        }

        self.issue();
        self.collect();

        if self.state != EngineState::Flush {
            self.state = if self.ledger.is_full() {
                EngineState::Throttled
            } else {
                EngineState::Normal
            };
        }
    }

    /// Pop the next paired item off the engine's output.
    pub fn poll(&mut self) -> Option<Item<u64>> {
        self.output.pop()
    }

    /// Items currently waiting in the engine's output buffer.
    pub fn output_len(&self) -> usize {
        self.output.len()
    }

    /// Force-drain every outstanding request into the output buffer,
    /// bounded by the configured flush timeout.
    ///
    /// The caller must keep consuming [`BurstReader::poll`] output between
    /// flush attempts; a full output buffer that is never drained will run
    /// the flush into its timeout. On timeout the ledger is force-reset
    /// and the side channel cleared (declared-lossy, counted).
    pub fn flush(&mut self) -> bool {
        self.state = EngineState::Flush;
        self.close_building();
        let deadline = Instant::now() + self.flush_timeout;
        loop {
            if self.ledger.count() == 0 && self.ready_bursts.is_empty() && self.bus.idle() {
                break;
            }
            if self.output.is_full() {
                // Nothing more can drain until the caller consumes output.
                break;
            }
            if Instant::now() >= deadline {
                self.faults.record_flush_timeout();
                error!(
                    outstanding = self.ledger.count(),
                    "read flush failed to drain within budget; force-resetting"
                );
                self.ledger.force_reset();
                self.ready_bursts.clear();
                self.markers.reset();
                self.state = EngineState::Normal;
                return false;
            }
            self.step();
            std::hint::spin_loop();
        }
        let drained = self.ledger.count() == 0 && self.ready_bursts.is_empty();
        self.state = EngineState::Normal;
        drained
    }

    /// Reset transient engine state (ledger, side channel, output). The
    /// owning reader calls this when it abandons a segment mid-stream.
    ///
    /// Beats still in flight on the bus belong to the abandoned stream,
    /// so they are drained and discarded here (bounded by the flush
    /// timeout) rather than left to desynchronize the next stream.
    pub fn reset(&mut self) {
        self.building = None;
        self.ready_bursts.clear();
        let deadline = Instant::now() + self.flush_timeout;
        while !self.bus.idle() && Instant::now() < deadline {
            self.bus.step();
            while self.bus.poll_read_beat().is_some() {}
        }
        self.ledger.force_reset();
        self.markers.reset();
        while self.output.pop().is_some() {}
        self.idle_steps = 0;
        self.input_seen = false;
        self.state = EngineState::Normal;
    }

    /// The bus this engine issues into.
    pub fn bus(&self) -> &ArenaBus {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::arena::Arena;
    use std::time::Duration;

    fn config() -> EngineConfig {
        EngineConfig {
            segment_capacity: 1024,
            segment_count: 4,
            arena_base_address: 0,
            max_outstanding: 2,
            flush_timeout: Duration::from_millis(100),
            max_burst_length: 4,
            burst_idle_timeout: 2,
            bus_response_latency: 1,
            max_reader_lag_segments: 1,
        }
    }

    fn seeded_reader(latency: u32) -> (BurstReader, Arc<FaultCounters>) {
        let arena = Arc::new(Arena::anon(4096).unwrap());
        for i in 0..512u64 {
            arena.write_word_masked(i * 8, 0x1000 + i, 0xFF);
        }
        let bus = ArenaBus::new(arena, 0, latency);
        let faults = Arc::new(FaultCounters::new());
        (
            BurstReader::new(bus, &config(), Arc::clone(&faults)),
            faults,
        )
    }

    fn drain(reader: &mut BurstReader, expected: usize) -> Vec<Item<u64>> {
        let mut out = Vec::new();
        for _ in 0..1000 {
            reader.step();
            while let Some(item) = reader.poll() {
                out.push(item);
            }
            if out.len() >= expected {
                break;
            }
        }
        out
    }

    #[test]
    fn test_reads_back_words_in_order() {
        let (mut reader, faults) = seeded_reader(1);
        for i in 0..8u64 {
            assert!(reader.try_accept_address(i * 8, i == 7));
        }
        let out = drain(&mut reader, 8);
        assert_eq!(out.len(), 8);
        for (i, item) in out.iter().enumerate() {
            assert_eq!(item.payload, 0x1000 + i as u64);
            assert_eq!(item.last, i == 7);
        }
        assert!(faults.snapshot().is_clean());
        assert_eq!(reader.outstanding(), 0);
    }

    #[test]
    fn test_last_marker_survives_burst_pipelining() {
        let (mut reader, _) = seeded_reader(2);
        // Two packets of three words each: the boundary sits mid-burst
        // relative to the 4-beat maximum burst length.
        for i in 0..6u64 {
            assert!(reader.try_accept_address(i * 8, i == 2 || i == 5));
        }
        let out = drain(&mut reader, 6);
        let boundaries: Vec<usize> = out
            .iter()
            .enumerate()
            .filter_map(|(i, item)| item.last.then_some(i))
            .collect();
        assert_eq!(boundaries, vec![2, 5]);
    }

    #[test]
    fn test_backpressure_bounds_output() {
        let (mut reader, _) = seeded_reader(0);
        let mut accepted = 0u64;
        // Never poll: the engine must stop accepting once its output and
        // issue queues are full, rather than buffering without bound.
        for i in 0..10_000u64 {
            if reader.try_accept_address((i % 512) * 8, false) {
                accepted += 1;
            }
            reader.step();
            if accepted >= 64 {
                break;
            }
        }
        assert!(reader.output_len() <= 8);
        assert!(accepted < 64);
    }

    #[test]
    fn test_decode_error_counted_but_forwarded() {
        let (mut reader, faults) = seeded_reader(0);
        // Past the end of the 4096-byte arena.
        assert!(reader.try_accept_address(8192, true));
        let out = drain(&mut reader, 1);
        assert_eq!(out.len(), 1);
        assert!(out[0].last);
        assert_eq!(faults.bus_errors(), 1);
    }

    #[test]
    fn test_flush_drains_outstanding() {
        let (mut reader, _) = seeded_reader(3);
        for i in 0..4u64 {
            reader.try_accept_address(i * 8, i == 3);
        }
        assert!(reader.flush());
        assert_eq!(reader.outstanding(), 0);
        let mut got = 0;
        while reader.poll().is_some() {
            got += 1;
        }
        assert_eq!(got, 4);
    }

    #[test]
    fn test_reset_clears_side_channel() {
        let (mut reader, _) = seeded_reader(1);
        reader.try_accept_address(0, false);
        reader.try_accept_address(8, true);
        reader.reset();
        assert_eq!(reader.outstanding(), 0);
        assert!(reader.poll().is_none());
        // A fresh packet decodes cleanly after the reset.
        reader.try_accept_address(16, true);
        let out = drain(&mut reader, 1);
        assert!(out[0].last);
    }
}
