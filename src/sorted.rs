//! Sorted-vector insertion split into a probe/commit pair so the position
//! found by one binary search can be reused by the insert.

use std::cmp::Ordering;

/// Outcome of probing a sorted slice.
///
/// `Found` carries the index of a matching element; `Vacant` carries the index
/// at which a new element keeps the slice sorted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probe {
    Found(usize),
    Vacant(usize),
}

/// One binary search over `items`. The comparator receives an element and
/// orders it against the probed value.
pub fn probe_by<T, F>(items: &[T], cmp: F) -> Probe
where
    F: FnMut(&T) -> Ordering,
{
    match items.binary_search_by(cmp) {
        Ok(index) => Probe::Found(index),
        Err(index) => Probe::Vacant(index),
    }
}

/// Inserts at a slot previously returned as `Probe::Vacant`. The slot is only
/// valid while the vector is unchanged between the probe and the commit.
pub fn commit<T>(items: &mut Vec<T>, slot: usize, item: T) {
    items.insert(slot, item);
}

#[test]
fn probe_finds_existing() {
    let items = [1u32, 3, 5, 7];
    assert_eq!(probe_by(&items, |it| it.cmp(&5)), Probe::Found(2));
    assert_eq!(probe_by(&items, |it| it.cmp(&1)), Probe::Found(0));
}

#[test]
fn probe_reports_insertion_slot() {
    let items = [1u32, 3, 5, 7];
    assert_eq!(probe_by(&items, |it| it.cmp(&0)), Probe::Vacant(0));
    assert_eq!(probe_by(&items, |it| it.cmp(&4)), Probe::Vacant(2));
    assert_eq!(probe_by(&items, |it| it.cmp(&9)), Probe::Vacant(4));
}

#[test]
fn probe_on_empty() {
    let items: [u32; 0] = [];
    assert_eq!(probe_by(&items, |it| it.cmp(&4)), Probe::Vacant(0));
}

#[cfg(test)]
mod properties {
    use super::{commit, probe_by, Probe};
    use proptest::prelude::*;

    proptest! {
        /// Inserting through probe/commit matches sorting the inputs.
        #[test]
        fn insertion_equals_sort(values in proptest::collection::vec(0u32..64, 0..48)) {
            let mut built = Vec::new();
            for &value in &values {
                match probe_by(&built, |it: &u32| it.cmp(&value)) {
                    Probe::Found(index) => prop_assert_eq!(built[index], value),
                    Probe::Vacant(slot) => commit(&mut built, slot, value),
                }
            }

            let mut expected = values.clone();
            expected.sort_unstable();
            expected.dedup();
            prop_assert_eq!(built, expected);
        }
    }
}
