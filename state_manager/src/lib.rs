//! Consumer-side state manager: tracks which ranges of a
//! dataset are locally materialized, locks a range for as long as a query is
//! reading it, and turns a control-plane desired-state update into
//! download/delete work for a sync loop to act on.
//!
//! A consumer's local copy is described as `available ∪ downloading`
//! ranges, and `ping` is the only way the control plane tells it what
//! should change.

#![warn(missing_debug_implementations, missing_docs)]

use chain_types::range::{Range, RangeSet};
use observability_deps::tracing::debug;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
struct DatasetState {
    available: RangeSet,
    downloading: RangeSet,
    locks: BTreeMap<Range, u64>,
}

/// Per-dataset materialized/downloading range bookkeeping plus
/// reference-counted range locks. Cheap to clone (wraps an `Arc`); share one
/// instance between the sync loop and the query-serving handlers.
#[derive(Debug, Clone, Default)]
pub struct StateManager {
    inner: Arc<Mutex<HashMap<String, DatasetState>>>,
}

/// The result of reconciling a desired state against what a dataset
/// currently has materialized or in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDiff {
    /// Ranges to start downloading: in `desired` but not yet available or
    /// already downloading.
    pub to_download: RangeSet,
    /// Ranges to delete now: no longer desired and not locked.
    pub to_delete: RangeSet,
    /// Ranges that would otherwise be deleted but are held by at least one
    /// active [`RangeLock`]; re-check on a later `ping`.
    pub deferred: RangeSet,
}

impl StateManager {
    /// An empty state manager with no datasets tracked yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the range-set a sync loop has discovered is locally
    /// materialized for `dataset` (e.g. folded from `layout::Layout`'s
    /// listing via `RangeSet::from_ranges`).
    pub fn set_available(&self, dataset: &str, ranges: RangeSet) {
        let mut inner = self.inner.lock();
        inner.entry(dataset.to_string()).or_default().available = ranges;
    }

    /// Record the range-set currently being fetched for `dataset`.
    pub fn set_downloading(&self, dataset: &str, ranges: RangeSet) {
        let mut inner = self.inner.lock();
        inner.entry(dataset.to_string()).or_default().downloading = ranges;
    }

    /// The currently materialized range-set for `dataset` (empty if the
    /// dataset has never been reported via [`StateManager::set_available`]).
    pub fn available(&self, dataset: &str) -> RangeSet {
        self.inner.lock().get(dataset).map(|s| s.available.clone()).unwrap_or_default()
    }

    /// Find the materialized range containing `first_block` and acquire a
    /// scoped lock on it, forbidding its deletion for as long as the guard
    /// lives. Returns `None` if no materialized range contains the block.
    pub fn use_range(&self, dataset: &str, first_block: u64) -> Option<RangeLock> {
        let mut inner = self.inner.lock();
        let state = inner.entry(dataset.to_string()).or_default();
        let range = state.available.find(first_block)?;
        *state.locks.entry(range).or_insert(0) += 1;
        Some(RangeLock {
            manager: self.clone(),
            dataset: dataset.to_string(),
            range,
        })
    }

    /// Diff `desired` against the tracked available/downloading state for
    /// `dataset`. Any range that would be deleted but overlaps a currently
    /// locked range is reported as `deferred` instead of `to_delete`.
    pub fn ping(&self, dataset: &str, desired: RangeSet) -> StateDiff {
        let state = {
            let mut inner = self.inner.lock();
            inner.entry(dataset.to_string()).or_default().clone()
        };

        let materialized = state.available.union(&state.downloading);
        let to_download = desired.difference(&materialized);
        let wants_gone = materialized.difference(&desired);

        let mut deletable = Vec::new();
        let mut deferred = Vec::new();
        for range in wants_gone.ranges() {
            let locked = state
                .locks
                .iter()
                .any(|(locked_range, count)| *count > 0 && ranges_overlap(locked_range, range));
            if locked {
                deferred.push(*range);
            } else {
                deletable.push(*range);
            }
        }

        if !deferred.is_empty() {
            debug!(dataset, ranges = ?deferred, "deferring deletion of locked ranges");
        }

        StateDiff {
            to_download,
            to_delete: RangeSet::from_ranges(deletable),
            deferred: RangeSet::from_ranges(deferred),
        }
    }

    fn release(&self, dataset: &str, range: Range) {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.get_mut(dataset) {
            if let Some(count) = state.locks.get_mut(&range) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.locks.remove(&range);
                }
            }
        }
    }
}

fn ranges_overlap(a: &Range, b: &Range) -> bool {
    a.lo <= b.hi && b.lo <= a.hi
}

/// A scoped lock on one materialized range, forbidding its deletion while
/// held. Decrements the range's reference count on drop.
#[derive(Debug)]
pub struct RangeLock {
    manager: StateManager,
    dataset: String,
    range: Range,
}

impl RangeLock {
    /// The locked range.
    pub fn range(&self) -> Range {
        self.range
    }
}

impl Drop for RangeLock {
    fn drop(&mut self) {
        self.manager.release(&self.dataset, self.range);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(lo: u64, hi: u64) -> Range {
        Range::new(lo, hi)
    }

    #[test]
    fn use_range_finds_containing_range() {
        let mgr = StateManager::new();
        mgr.set_available("eth", RangeSet::from_ranges(vec![r(0, 99), r(200, 299)]));

        let lock = mgr.use_range("eth", 50).unwrap();
        assert_eq!(lock.range(), r(0, 99));
        assert!(mgr.use_range("eth", 150).is_none());
    }

    #[test]
    fn ping_computes_download_and_delete() {
        let mgr = StateManager::new();
        mgr.set_available("eth", RangeSet::from_ranges(vec![r(0, 99)]));

        let diff = mgr.ping("eth", RangeSet::from_ranges(vec![r(50, 199)]));
        assert_eq!(diff.to_download, RangeSet::from_ranges(vec![r(100, 199)]));
        assert_eq!(diff.to_delete, RangeSet::from_ranges(vec![r(0, 49)]));
        assert!(diff.deferred.is_empty());
    }

    #[test]
    fn ping_defers_deletion_of_locked_ranges() {
        let mgr = StateManager::new();
        mgr.set_available("eth", RangeSet::from_ranges(vec![r(0, 99)]));
        let _lock = mgr.use_range("eth", 10).unwrap();

        let diff = mgr.ping("eth", RangeSet::empty());
        assert!(diff.to_delete.is_empty());
        assert_eq!(diff.deferred, RangeSet::from_ranges(vec![r(0, 99)]));
    }

    #[test]
    fn dropping_the_lock_allows_deletion_on_next_ping() {
        let mgr = StateManager::new();
        mgr.set_available("eth", RangeSet::from_ranges(vec![r(0, 99)]));
        {
            let _lock = mgr.use_range("eth", 10).unwrap();
        }

        let diff = mgr.ping("eth", RangeSet::empty());
        assert_eq!(diff.to_delete, RangeSet::from_ranges(vec![r(0, 99)]));
        assert!(diff.deferred.is_empty());
    }
}
