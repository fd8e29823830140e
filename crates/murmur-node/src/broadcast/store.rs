//! Deduplicating value store.

use std::collections::HashSet;

use parking_lot::RwLock;

/// Index and arrival order, always updated together under one lock.
#[derive(Debug, Default)]
struct SeenState {
    index: HashSet<i64>,
    order: Vec<i64>,
}

impl SeenState {
    fn insert(&mut self, value: i64) -> bool {
        if self.index.insert(value) {
            self.order.push(value);
            true
        } else {
            false
        }
    }
}

/// Set of every value this node has seen, in arrival order.
#[derive(Debug, Default)]
pub struct SeenSet {
    state: RwLock<SeenState>,
}

impl SeenSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` if absent.
    ///
    /// Returns true if the value was newly inserted. Among concurrent calls
    /// with the same value exactly one observes `true`.
    pub fn append(&self, value: i64) -> bool {
        if self.state.read().index.contains(&value) {
            return false;
        }
        self.state.write().insert(value)
    }

    /// Inserts every absent value, keeping arrival order.
    ///
    /// Returns the values that were newly inserted.
    pub fn append_batch(&self, values: &[i64]) -> Vec<i64> {
        let mut state = self.state.write();
        values
            .iter()
            .copied()
            .filter(|value| state.insert(*value))
            .collect()
    }

    /// All values in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<i64> {
        self.state.read().order.clone()
    }

    /// Local values absent from `theirs`, in insertion order.
    #[must_use]
    pub fn missing_from(&self, theirs: &[i64]) -> Vec<i64> {
        let theirs: HashSet<i64> = theirs.iter().copied().collect();
        self.state
            .read()
            .order
            .iter()
            .copied()
            .filter(|value| !theirs.contains(value))
            .collect()
    }

    /// Returns true if `value` has been seen.
    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        self.state.read().index.contains(&value)
    }

    /// Number of values seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().order.len()
    }

    /// Returns true if nothing has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_starts_empty() {
        let set = SeenSet::new();
        assert!(set.is_empty());
        assert!(set.snapshot().is_empty());
    }

    #[test]
    fn test_append_reports_novelty() {
        let set = SeenSet::new();
        assert!(set.append(5));
        assert!(!set.append(5));
        assert_eq!(set.snapshot(), vec![5]);
        assert!(set.contains(5));
        assert!(!set.contains(6));
    }

    #[test]
    fn test_snapshot_preserves_arrival_order() {
        let set = SeenSet::new();
        for value in [3, 1, 2, 1, 3] {
            set.append(value);
        }
        assert_eq!(set.snapshot(), vec![3, 1, 2]);
    }

    #[test]
    fn test_append_batch_returns_new_values_in_order() {
        let set = SeenSet::new();
        set.append(2);
        let added = set.append_batch(&[4, 2, 9, 4]);
        assert_eq!(added, vec![4, 9]);
        assert_eq!(set.snapshot(), vec![2, 4, 9]);
    }

    #[test]
    fn test_append_batch_empty_is_noop() {
        let set = SeenSet::new();
        assert!(set.append_batch(&[]).is_empty());
        assert!(set.is_empty());
    }

    #[test]
    fn test_missing_from() {
        let set = SeenSet::new();
        set.append_batch(&[1, 2, 3, 4]);
        assert_eq!(set.missing_from(&[2, 4, 8]), vec![1, 3]);
        assert!(set.missing_from(&[4, 3, 2, 1]).is_empty());
        assert_eq!(set.missing_from(&[]), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_concurrent_duplicates_have_one_winner() {
        let set = Arc::new(SeenSet::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let set = Arc::clone(&set);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    for value in 0..200 {
                        if set.append(value) {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 200);
        assert_eq!(set.len(), 200);
    }

    #[test]
    fn test_concurrent_batches_and_reads_stay_consistent() {
        let set = Arc::new(SeenSet::new());

        let writer = {
            let set = Arc::clone(&set);
            std::thread::spawn(move || {
                for chunk in (0..1000).collect::<Vec<i64>>().chunks(10) {
                    set.append_batch(chunk);
                }
            })
        };
        let reader = {
            let set = Arc::clone(&set);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    let snapshot = set.snapshot();
                    let unique: HashSet<_> = snapshot.iter().collect();
                    assert_eq!(unique.len(), snapshot.len());
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();

        assert_eq!(set.len(), 1000);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn snapshot_is_first_occurrence_order(values in proptest::collection::vec(-50i64..50, 0..200)) {
                let set = SeenSet::new();
                for value in &values {
                    set.append(*value);
                }

                let mut expected = Vec::new();
                for value in &values {
                    if !expected.contains(value) {
                        expected.push(*value);
                    }
                }
                prop_assert_eq!(set.snapshot(), expected);
            }

            #[test]
            fn appending_twice_changes_nothing(values in proptest::collection::vec(any::<i64>(), 0..100)) {
                let set = SeenSet::new();
                set.append_batch(&values);
                let before = set.snapshot();
                for value in &values {
                    prop_assert!(!set.append(*value));
                }
                prop_assert!(set.append_batch(&values).is_empty());
                prop_assert_eq!(set.snapshot(), before);
            }
        }
    }
}
