//! Observed-state reconciliation primitives.
//!
//! Agents periodically report the full set of instances they observe for a
//! scope (a deployment in a region, optionally narrowed to one cluster). The
//! latest report owns the scope: anything stored but not reported is stale and
//! must be removed, everything reported is upserted.
//!
//! # Invariants
//!
//! - The diff is a pure function of the two key sets
//! - Applying the same report twice yields an empty `stale` set the second time
//! - Output order is deterministic (sorted by key)

use std::collections::BTreeSet;

/// Classification of keys after comparing stored rows with a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDiff<K> {
    /// Stored but absent from the report. These are deleted.
    pub stale: Vec<K>,

    /// Reported and already stored. These are updated in place.
    pub refreshed: Vec<K>,

    /// Reported but not yet stored. These are inserted.
    pub added: Vec<K>,
}

impl<K> ReportDiff<K> {
    /// Number of rows the report will upsert.
    pub fn upserts(&self) -> usize {
        self.refreshed.len() + self.added.len()
    }
}

impl<K> Default for ReportDiff<K> {
    fn default() -> Self {
        Self {
            stale: Vec::new(),
            refreshed: Vec::new(),
            added: Vec::new(),
        }
    }
}

/// Compares the stored keys of a scope with the keys in the latest report.
///
/// Duplicate keys on either side collapse to one entry.
pub fn diff_report<K, S, R>(stored: S, reported: R) -> ReportDiff<K>
where
    K: Ord + Clone,
    S: IntoIterator<Item = K>,
    R: IntoIterator<Item = K>,
{
    let stored: BTreeSet<K> = stored.into_iter().collect();
    let reported: BTreeSet<K> = reported.into_iter().collect();

    ReportDiff {
        stale: stored.difference(&reported).cloned().collect(),
        refreshed: stored.intersection(&reported).cloned().collect(),
        added: reported.difference(&stored).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_report_drops_missing_instance() {
        let diff = diff_report(["a", "b", "c"], ["a", "c"]);
        assert_eq!(diff.stale, vec!["b"]);
        assert_eq!(diff.refreshed, vec!["a", "c"]);
        assert!(diff.added.is_empty());
        assert_eq!(diff.upserts(), 2);
    }

    #[test]
    fn test_report_adds_new_instance() {
        let diff = diff_report(["a"], ["a", "d"]);
        assert!(diff.stale.is_empty());
        assert_eq!(diff.added, vec!["d"]);
    }

    #[test]
    fn test_empty_report_clears_scope() {
        let diff = diff_report(["a", "b"], Vec::<&str>::new());
        assert_eq!(diff.stale, vec!["a", "b"]);
        assert_eq!(diff.upserts(), 0);
    }

    #[test]
    fn test_duplicate_reported_keys_collapse() {
        let diff = diff_report(Vec::<&str>::new(), ["x", "x", "y"]);
        assert_eq!(diff.added, vec!["x", "y"]);
    }

    proptest! {
        #[test]
        fn diff_partitions_both_sides(
            stored in proptest::collection::btree_set(0u8..32, 0..16),
            reported in proptest::collection::btree_set(0u8..32, 0..16),
        ) {
            let diff = diff_report(stored.iter().copied(), reported.iter().copied());

            for key in &diff.stale {
                prop_assert!(stored.contains(key));
                prop_assert!(!reported.contains(key));
            }
            for key in &diff.added {
                prop_assert!(!stored.contains(key));
            }
            prop_assert_eq!(diff.refreshed.len() + diff.added.len(), reported.len());
            prop_assert_eq!(diff.refreshed.len() + diff.stale.len(), stored.len());
        }

        #[test]
        fn reapplying_report_is_idempotent(
            stored in proptest::collection::btree_set(0u8..32, 0..16),
            reported in proptest::collection::btree_set(0u8..32, 0..16),
        ) {
            let first = diff_report(stored.iter().copied(), reported.iter().copied());
            let mut applied = stored.clone();
            for key in &first.stale {
                applied.remove(key);
            }
            applied.extend(first.added.iter().copied());
            prop_assert_eq!(&applied, &reported);

            let second = diff_report(applied.iter().copied(), reported.iter().copied());
            prop_assert!(second.stale.is_empty());
            prop_assert!(second.added.is_empty());
            prop_assert_eq!(second.refreshed.len(), reported.len());
        }
    }
}
