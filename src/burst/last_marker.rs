//! Run-length-encoded side channel for packet boundary markers.
//!
//! The bus does not carry a per-item `last` bit through a pipelined read:
//! beats come back grouped into bursts whose own `last` marks burst ends,
//! not packet ends. This queue carries, for each accepted item, the
//! distance to the next packet boundary so the reader can reattach the
//! marker to the item that originally held it.
//!
//! Encoding: a run value `v < OVERFLOW` means "`v` unmarked items followed
//! by one marked item"; the reserved escape value means "a full run of
//! unmarked items with no boundary", used when a run outgrows the counter.

use std::collections::VecDeque;

/// Default bound on buffered runs. One run covers an entire packet in the
/// common case, so this is generous.
const DEFAULT_RUN_CAPACITY: usize = 1024;

/// RLE queue of distances to the next `last` marker.
#[derive(Debug)]
pub struct LastMarkerQueue {
    runs: VecDeque<u32>,
    run_capacity: usize,
    /// Escape value: a run of `overflow_word` unmarked items, no boundary.
    overflow_word: u32,
    encode_run: u32,
    decode_run: u32,
    decode_errors: u64,
}

impl Default for LastMarkerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl LastMarkerQueue {
    /// Queue with the default run bound and counter width.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_RUN_CAPACITY, u32::MAX)
    }

    /// Queue with explicit bounds; `overflow_word` is the reserved escape
    /// value (runs count up to `overflow_word - 1` before escaping).
    pub fn with_limits(run_capacity: usize, overflow_word: u32) -> Self {
        Self {
            runs: VecDeque::new(),
            run_capacity,
            overflow_word,
            encode_run: 0,
            decode_run: 0,
            decode_errors: 0,
        }
    }

    /// True when another [`LastMarkerQueue::record`] call is guaranteed to
    /// succeed.
    pub fn can_record(&self) -> bool {
        self.runs.len() < self.run_capacity
    }

    /// Record one accepted item on the encode side.
    ///
    /// Returns `false` (recording nothing) when the run store is full; the
    /// caller must stall the item until space frees up.
    pub fn record(&mut self, last: bool) -> bool {
        if last || self.encode_run == self.overflow_word - 1 {
            if !self.can_record() {
                return false;
            }
            let run = if last {
                self.encode_run
            } else {
                self.overflow_word
            };
            self.runs.push_back(run);
            self.encode_run = 0;
        } else {
            self.encode_run += 1;
        }
        true
    }

    /// Decode one delivered item: does it carry the boundary marker?
    pub fn next_is_last(&mut self) -> bool {
        let Some(&front) = self.runs.front() else {
            // More items delivered than recorded. Count and carry on
            // without a marker.
            self.decode_errors += 1;
            return false;
        };
        let escape = front == self.overflow_word && self.decode_run == self.overflow_word - 1;
        if self.decode_run == front || escape {
            self.runs.pop_front();
            self.decode_run = 0;
            !escape
        } else if self.decode_run > front {
            self.decode_errors += 1;
            false
        } else {
            self.decode_run += 1;
            false
        }
    }

    /// Items recorded but not yet decoded would desynchronize a restarted
    /// engine; reset drops all of it.
    pub fn reset(&mut self) {
        self.runs.clear();
        self.encode_run = 0;
        self.decode_run = 0;
    }

    /// Encode/decode mismatches observed (should stay zero).
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }
}
