//! Write-side burst engine: item stream in, write bursts out.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, warn};

use crate::bus::arena::ArenaBus;
use crate::bus::protocol::{AddressRequest, WriteBeat, WORD_BYTES};
use crate::burst::{EngineState, OutstandingLedger};
use crate::config::EngineConfig;
use crate::telemetry::FaultCounters;

/// A burst being assembled from contiguous accepted items.
#[derive(Debug)]
struct Building {
    start: u64,
    words: Vec<u64>,
}

/// Converts accepted `(address, word)` pairs into write bursts against the
/// arena, tracking outstanding requests.
///
/// Contiguous addresses coalesce into a single burst up to the configured
/// maximum length; a discontinuity closes the current burst and opens a
/// new one. A partially built burst that sits idle for
/// `burst_idle_timeout` steps is closed and issued anyway, so a paused
/// source cannot strand data in the engine indefinitely.
#[derive(Debug)]
pub struct BurstWriter {
    bus: ArenaBus,
    max_outstanding: u32,
    max_burst_length: u32,
    burst_idle_timeout: u32,
    flush_timeout: std::time::Duration,
    state: EngineState,
    ledger: OutstandingLedger,
    building: Option<Building>,
    ready_bursts: VecDeque<Building>,
    idle_steps: u32,
    input_seen: bool,
    faults: Arc<FaultCounters>,
}

impl BurstWriter {
    /// Create a write engine over `bus`.
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

    /// True when a [`BurstWriter::try_accept`] call would succeed.
    pub fn can_accept(&self) -> bool {
        self.state == EngineState::Normal
            && self.ready_bursts.len() < self.max_outstanding as usize
    }

    /// Offer one word destined for `address`. Returns `false` (consuming
    /// nothing) when the engine is throttled, flushing, or its issue queue
    /// is full; the caller keeps the item and retries after stepping.
    pub fn try_accept(&mut self, address: u64, data: u64) -> bool {
        if !self.can_accept() {
            return false;
        }
        let extends = self.building.as_ref().is_some_and(|b| {
            address == b.start + b.words.len() as u64 * WORD_BYTES
                && (b.words.len() as u32) < self.max_burst_length
        });
        if extends {
            if let Some(building) = self.building.as_mut() {
                building.words.push(data);
            }
        } else {
            self.close_building();
            self.building = Some(Building {
                start: address,
                words: vec![data],
            });
        }
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
            let beats = burst.words.len() as u32;
            self.bus.submit_write(AddressRequest::incr(burst.start, beats));
            for (i, word) in burst.words.iter().enumerate() {
                self.bus
                    .push_write_beat(WriteBeat::full(*word, i as u32 + 1 == beats));
            }
        }
    }

    /// Advance the engine one step: age the bus, collect completions,
    /// close idle bursts, issue what the ledger allows, update state.
    pub fn step(&mut self) {
        self.bus.step();
        while let Some(resp) = self.bus.poll_write_response() {
            self.ledger.dec();
            if !resp.is_ok() {
                self.faults.record_bus_error();
                warn!(?resp, "write burst completed with a bus error");
            }
        }

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

        if self.state != EngineState::Flush {
            self.state = if self.ledger.is_full() {
                EngineState::Throttled
            } else {
                EngineState::Normal
            };
        }
    }

    /// Force-drain every outstanding request, bounded by the configured
    /// flush timeout.
    ///
    /// Returns `true` when everything drained. On timeout the ledger is
    /// force-reset to zero and queued work is discarded (declared-lossy
    /// recovery, counted as a fault), and the engine returns to `Normal`
    /// so the pipeline keeps moving.
    pub fn flush(&mut self) -> bool {
        self.state = EngineState::Flush;
        self.close_building();
        let deadline = Instant::now() + self.flush_timeout;
        loop {
            if self.ledger.count() == 0 && self.ready_bursts.is_empty() && self.bus.idle() {
                break;
            }
            if Instant::now() >= deadline {
                self.faults.record_flush_timeout();
                error!(
                    outstanding = self.ledger.count(),
                    queued = self.ready_bursts.len(),
                    "flush failed to drain within budget; force-resetting ledger"
                );
                self.ledger.force_reset();
                self.ready_bursts.clear();
                self.state = EngineState::Normal;
                return false;
            }
            self.step();
            std::hint::spin_loop();
        }
        self.state = EngineState::Normal;
        true
    }

    /// The bus this engine issues into.
    pub fn bus(&self) -> &ArenaBus {
        &self.bus
    }
}
