//! Per-thread coverage collector.
//!
//! Instrumented targets report features (edges, comparison outcomes, state
//! markers) into this module while the fuzzer runs them. The fuzzer resets
//! the collector before each execution and snapshots it afterwards; novelty
//! of a snapshot against the corpus ledger decides whether an input is
//! interesting. Execution happens on the driving thread, so the accumulator
//! is thread-local.

use std::cell::RefCell;
use std::collections::BTreeSet;

#[derive(Default)]
struct CoverageState {
    current: BTreeSet<u64>,
    observed: BTreeSet<u64>,
}

thread_local! {
    static STATE: RefCell<CoverageState> = RefCell::new(CoverageState::default());
}

/// Report a raw feature id for the current execution.
pub fn hit(feature: u64) {
    STATE.with(|s| {
        s.borrow_mut().current.insert(feature);
    });
}

/// Report a named edge. The id is stable across processes, so feature sets
/// from different runs of the same target are comparable.
pub fn edge(label: &str) {
    hit(edge_id(label));
}

pub fn edge_id(label: &str) -> u64 {
    let digest = blake3::hash(label.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Clear the per-execution feature set.
pub fn reset() {
    STATE.with(|s| s.borrow_mut().current.clear());
}

/// The features reported since the last reset.
pub fn snapshot() -> BTreeSet<u64> {
    STATE.with(|s| s.borrow().current.clone())
}

/// Fold the current execution's features into the all-time observed set.
/// Returns how many of them were new.
pub fn merge_observed() -> usize {
    STATE.with(|s| {
        let mut state = s.borrow_mut();
        let CoverageState { current, observed } = &mut *state;
        let before = observed.len();
        observed.extend(current.iter().copied());
        observed.len() - before
    })
}

pub fn observed_len() -> usize {
    STATE.with(|s| s.borrow().observed.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_hits_since_reset() {
        reset();
        edge("cov-test-a");
        edge("cov-test-b");
        let snap = snapshot();
        assert!(snap.contains(&edge_id("cov-test-a")));
        assert!(snap.contains(&edge_id("cov-test-b")));
        reset();
        assert!(!snapshot().contains(&edge_id("cov-test-a")));
    }

    #[test]
    fn edge_ids_are_stable_and_distinct() {
        assert_eq!(edge_id("x"), edge_id("x"));
        assert_ne!(edge_id("x"), edge_id("y"));
    }

    #[test]
    fn merge_observed_counts_only_new_features() {
        reset();
        edge("cov-merge-a");
        let first = merge_observed();
        assert!(first >= 1);
        reset();
        edge("cov-merge-a");
        assert_eq!(merge_observed(), 0);
    }
}
