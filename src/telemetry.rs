//! Fault accounting for continuous operation.
//!
//! The engine is designed to keep moving under adverse conditions (the
//! camera never stops), so recoverable faults are recorded in shared
//! counters instead of being raised as errors. Counters are plain atomics:
//! cheap to bump from the hot path, queryable from any thread at any time.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared fault counters, queryable at any time.
///
/// One instance is shared (via `Arc`) between all components of an engine;
/// each component bumps the counters it owns. Increments use `Relaxed`
/// ordering: counters are observability, not synchronization.
#[derive(Debug, Default)]
pub struct FaultCounters {
    /// Packets that exceeded their segment's capacity and were truncated.
    overflowed_packets: AtomicU64,
    /// Memory bus requests that completed with a non-OK response.
    bus_errors: AtomicU64,
    /// Flushes that failed to drain within budget and force-reset the ledger.
    flush_timeouts: AtomicU64,
    /// Combiner steps where lanes disagreed on `valid` or `last`.
    desync_faults: AtomicU64,
}

impl FaultCounters {
    /// Create a fresh counter block with all counts at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_overflow(&self) {
        self.overflowed_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bus_error(&self) {
        self.bus_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush_timeout(&self) {
        self.flush_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_desync(&self) {
        self.desync_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of packets truncated by segment overflow.
    pub fn overflowed_packets(&self) -> u64 {
        self.overflowed_packets.load(Ordering::Relaxed)
    }

    /// Number of non-OK memory bus responses observed.
    pub fn bus_errors(&self) -> u64 {
        self.bus_errors.load(Ordering::Relaxed)
    }

    /// Number of flushes that expired and force-reset the ledger.
    pub fn flush_timeouts(&self) -> u64 {
        self.flush_timeouts.load(Ordering::Relaxed)
    }

    /// Number of combiner steps with disagreeing lanes.
    pub fn desync_faults(&self) -> u64 {
        self.desync_faults.load(Ordering::Relaxed)
    }

    /// Take a point-in-time copy of all counters.
    pub fn snapshot(&self) -> FaultSnapshot {
        FaultSnapshot {
            overflowed_packets: self.overflowed_packets(),
            bus_errors: self.bus_errors(),
            flush_timeouts: self.flush_timeouts(),
            desync_faults: self.desync_faults(),
        }
    }
}

/// Point-in-time copy of [`FaultCounters`], suitable for logging or export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaultSnapshot {
    /// Packets truncated by segment overflow.
    pub overflowed_packets: u64,
    /// Non-OK memory bus responses.
    pub bus_errors: u64,
    /// Flushes that expired and force-reset the ledger.
    pub flush_timeouts: u64,
    /// Combiner steps with disagreeing lanes.
    pub desync_faults: u64,
}

impl FaultSnapshot {
    /// True when no fault of any kind has been recorded.
    pub fn is_clean(&self) -> bool {
        self.overflowed_packets == 0
            && self.bus_errors == 0
            && self.flush_timeouts == 0
            && self.desync_faults == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_increments() {
        let faults = FaultCounters::new();
        assert!(faults.snapshot().is_clean());

        faults.record_overflow();
        faults.record_bus_error();
        faults.record_bus_error();

        let snap = faults.snapshot();
        assert_eq!(snap.overflowed_packets, 1);
        assert_eq!(snap.bus_errors, 2);
        assert_eq!(snap.flush_timeouts, 0);
        assert!(!snap.is_clean());
    }

    #[test]
    fn test_counters_shared_across_threads() {
        use std::sync::Arc;

        let faults = Arc::new(FaultCounters::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let faults = Arc::clone(&faults);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        faults.record_desync();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(faults.desync_faults(), 400);
    }
}
