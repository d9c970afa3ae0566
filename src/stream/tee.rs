//! Fan-out and fan-in: replicate one stream to many consumers, or merge
//! synchronized lanes back into one.
//!
//! The tee gives every output its own one-slot elastic buffer so that a
//! slow consumer only ever stalls the shared input; sibling outputs never
//! diverge by more than one item of skew. The combiner is the inverse and
//! doubles as a consistency check: lanes that are supposed to advance in
//! lockstep but disagree on `valid` or `last` within one step raise a
//! counted desynchronization fault, and the merge proceeds best-effort
//! using the first lane's framing.

use std::sync::Arc;
use tracing::warn;

use crate::stream::fifo::ElasticBuffer;
use crate::stream::flow::{Item, Sink, Source};
use crate::telemetry::FaultCounters;

/// Replicates one input stream to `M` independently buffered outputs.
#[derive(Debug)]
pub struct Tee<P: Clone> {
    branches: Vec<ElasticBuffer<P>>,
}

impl<P: Clone> Tee<P> {
    /// Create a tee with `branches` outputs, each guarded by a one-slot
    /// buffer.
    pub fn new(branches: usize) -> Self {
        Self {
            branches: (0..branches).map(|_| ElasticBuffer::new(1)).collect(),
        }
    }

    /// Number of outputs.
    pub fn branches(&self) -> usize {
        self.branches.len()
    }

    /// Pop the oldest item buffered on branch `index`.
    pub fn branch_pop(&mut self, index: usize) -> Option<Item<P>> {
        self.branches.get_mut(index)?.pop()
    }

    /// Borrow a branch buffer as a [`Source`] (e.g. to wire it into a
    /// downstream stage with [`crate::stream::transfer`]).
    pub fn branch_mut(&mut self, index: usize) -> Option<&mut ElasticBuffer<P>> {
        self.branches.get_mut(index)
    }
}

impl<P: Clone> Sink<P> for Tee<P> {
    /// The shared input is ready only when every branch can accept: the
    /// logical AND of all branch readiness.
    fn ready(&self) -> bool {
        self.branches.iter().all(|b| !b.is_full())
    }

    fn accept(&mut self, item: Item<P>) -> Result<(), Item<P>> {
        if !self.ready() {
            return Err(item);
        }
        // Clone into all branches but the last, which takes the original.
        let n = self.branches.len();
        for branch in self.branches.iter_mut().take(n.saturating_sub(1)) {
            // A ready tee has a free slot on every branch.
            let _ = branch.push(item.clone());
        }
        if let Some(last_branch) = self.branches.last_mut() {
            let _ = last_branch.push(item);
        }
        Ok(())
    }
}

/// Merges `N` synchronized input lanes into one stream of lane bundles.
///
/// A step produces output only when every lane offers an item. Lanes that
/// disagree on `valid` or on boundary markers within one step raise a
/// desync fault in the shared [`FaultCounters`]; the fault is counted, the
/// merge continues.
#[derive(Debug)]
pub struct Combiner {
    lanes: usize,
    faults: Arc<FaultCounters>,
}

impl Combiner {
    /// Create a combiner for `lanes` input lanes.
    pub fn new(lanes: usize, faults: Arc<FaultCounters>) -> Self {
        Self { lanes, faults }
    }

    /// Number of input lanes this combiner merges.
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Attempt one merge step over `lanes`.
    ///
    /// Returns the merged item (payloads in lane order, framing from the
    /// first lane) when all lanes offered one. When only some lanes offer
    /// an item, nothing is consumed, `None` is returned and a desync fault
    /// is counted: synchronized lanes must assert `valid` together.
    pub fn combine<P, S: Source<P>>(&mut self, lanes: &mut [S]) -> Option<Item<Vec<P>>> {
        debug_assert_eq!(lanes.len(), self.lanes, "combiner wired to wrong arity");
        let valid = lanes.iter().filter(|lane| lane.valid()).count();
        if valid == 0 {
            return None;
        }
        if valid < lanes.len() {
            self.faults.record_desync();
            warn!(
                valid,
                lanes = lanes.len(),
                "combiner lanes disagree on valid"
            );
            return None;
        }

        let items: Vec<Item<P>> = lanes.iter_mut().filter_map(|lane| lane.take()).collect();
        let head = items.first()?;
        let (first, last) = (head.first, head.last);
        if items.iter().any(|i| i.last != last || i.first != first) {
            self.faults.record_desync();
            warn!("combiner lanes disagree on packet boundary");
        }
        Some(Item {
            payload: items.into_iter().map(|i| i.payload).collect(),
            first,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tee_replicates_to_all_branches() {
        let mut tee = Tee::new(3);
        tee.accept(Item::last(42u64)).unwrap();
        for branch in 0..3 {
            let item = tee.branch_pop(branch).unwrap();
            assert_eq!(item.payload, 42);
            assert!(item.last);
        }
    }

    #[test]
    fn test_slow_branch_stalls_input_but_not_siblings() {
        let mut tee = Tee::new(2);
        tee.accept(Item::new(1u64)).unwrap();

        // Branch 0 consumes, branch 1 does not: input stalls after one
        // item of skew.
        assert_eq!(tee.branch_pop(0).unwrap().payload, 1);
        assert!(!tee.ready());
        assert!(tee.accept(Item::new(2)).is_err());

        // Slow branch catches up; the input opens again.
        assert_eq!(tee.branch_pop(1).unwrap().payload, 1);
        assert!(tee.ready());
        tee.accept(Item::new(2)).unwrap();
        assert_eq!(tee.branch_pop(0).unwrap().payload, 2);
        assert_eq!(tee.branch_pop(1).unwrap().payload, 2);
    }

    #[test]
    fn test_combiner_merges_lane_payloads_in_order() {
        let faults = Arc::new(FaultCounters::new());
        let mut combiner = Combiner::new(2, Arc::clone(&faults));
        let mut lanes = vec![ElasticBuffer::new(1), ElasticBuffer::new(1)];
        lanes[0].push(Item::last(0xAAu64)).unwrap();
        lanes[1].push(Item::last(0xBBu64)).unwrap();

        let merged = combiner.combine(&mut lanes).unwrap();
        assert_eq!(merged.payload, vec![0xAA, 0xBB]);
        assert!(merged.last);
        assert_eq!(faults.desync_faults(), 0);
    }

    #[test]
    fn test_combiner_counts_valid_desync_without_consuming() {
        let faults = Arc::new(FaultCounters::new());
        let mut combiner = Combiner::new(2, Arc::clone(&faults));
        let mut lanes = vec![ElasticBuffer::new(1), ElasticBuffer::new(1)];
        lanes[0].push(Item::new(1u64)).unwrap();

        assert!(combiner.combine(&mut lanes).is_none());
        assert_eq!(faults.desync_faults(), 1);
        // The offered item was not consumed; once the late lane shows up
        // the merge recovers.
        lanes[1].push(Item::new(2u64)).unwrap();
        let merged = combiner.combine(&mut lanes).unwrap();
        assert_eq!(merged.payload, vec![1, 2]);
        assert_eq!(faults.desync_faults(), 1);
    }

    #[test]
    fn test_combiner_counts_last_mismatch_and_merges_anyway() {
        let faults = Arc::new(FaultCounters::new());
        let mut combiner = Combiner::new(2, Arc::clone(&faults));
        let mut lanes = vec![ElasticBuffer::new(1), ElasticBuffer::new(1)];
        lanes[0].push(Item::last(1u64)).unwrap();
        lanes[1].push(Item::new(2u64)).unwrap();

        let merged = combiner.combine(&mut lanes).unwrap();
        // First lane's framing wins.
        assert!(merged.last);
        assert_eq!(faults.desync_faults(), 1);
    }

    #[test]
    fn test_combiner_idle_step_is_not_a_fault() {
        let faults = Arc::new(FaultCounters::new());
        let mut combiner = Combiner::new(2, Arc::clone(&faults));
        let mut lanes: Vec<ElasticBuffer<u64>> = vec![ElasticBuffer::new(1), ElasticBuffer::new(1)];
        assert!(combiner.combine(&mut lanes).is_none());
        assert_eq!(faults.desync_faults(), 0);
    }
}
