//! Unkeyed synchronization.
//!
//! Items are matched by value. Every distinct value keeps a queue of its
//! positions in the target; current items claim those positions in order of
//! appearance, so the n-th occurrence of a value in the current list is
//! matched with its n-th occurrence in the target. Unclaimed current items
//! are removed and unclaimed target positions are inserted.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use super::keyed::plan_assigned;
use super::{apply, items_of, Edit, ListEditor, SyncReport};

/// Plan the edits that turn `current` into `target`, matching items by value.
pub fn plan_unkeyed<T>(current: &[T], target: &[T]) -> Vec<Edit<T>>
where
    T: Clone + Eq + Hash,
{
    plan_unkeyed_by(current, target, T::clone)
}

/// Plan the edits that turn `current` into `target`, treating two items as
/// equal when `matching` projects them to the same value.
///
/// Unlike [`plan_keyed`](super::plan_keyed), projections may repeat; repeated
/// ones are matched in order of appearance.
pub fn plan_unkeyed_by<T, K, F>(current: &[T], target: &[T], matching: F) -> Vec<Edit<T>>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut positions: HashMap<K, VecDeque<usize>> = HashMap::with_capacity(target.len());
    for (index, item) in target.iter().enumerate() {
        positions.entry(matching(item)).or_default().push_back(index);
    }

    let assigned: Vec<Option<usize>> = current
        .iter()
        .map(|item| positions.get_mut(&matching(item)).and_then(VecDeque::pop_front))
        .collect();

    plan_assigned(&assigned, target)
}

/// Synchronize `list` with `target`, matching items by value.
pub fn sync_unkeyed<T, L>(list: &mut L, target: &[T]) -> SyncReport
where
    T: Clone + Eq + Hash,
    L: ListEditor<T> + ?Sized,
{
    sync_unkeyed_by(list, target, T::clone)
}

/// Synchronize `list` with `target`, matching items through `matching`.
///
/// Matched items keep their current value; only unmatched target items are
/// inserted.
pub fn sync_unkeyed_by<T, K, F, L>(list: &mut L, target: &[T], matching: F) -> SyncReport
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
    L: ListEditor<T> + ?Sized,
{
    let current = items_of(list);
    let edits = plan_unkeyed_by(&current, target, matching);
    apply(list, edits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synced(current: &[i32], target: &[i32]) -> (Vec<i32>, SyncReport) {
        let mut list = current.to_vec();
        let report = sync_unkeyed(&mut list, target);
        (list, report)
    }

    #[test]
    fn empty_to_full_and_back() {
        let (list, report) = synced(&[], &[1, 2, 3]);
        assert_eq!(list, vec![1, 2, 3]);
        assert_eq!(report.inserts, 3);

        let (list, report) = synced(&[1, 2, 3], &[]);
        assert!(list.is_empty());
        assert_eq!(report.removes, 3);
    }

    #[test]
    fn duplicates_match_in_order() {
        let edits = plan_unkeyed(&[1, 1, 2], &[1, 2, 1]);
        assert_eq!(edits, vec![Edit::Move { from: 1, to: 2 }]);

        let (list, _) = synced(&[1, 1, 2], &[1, 2, 1]);
        assert_eq!(list, vec![1, 2, 1]);
    }

    #[test]
    fn surplus_duplicates_are_removed() {
        let (list, report) = synced(&[7, 7, 7, 8], &[8, 7]);
        assert_eq!(list, vec![8, 7]);
        assert_eq!(report.removes, 2);
        assert_eq!(report.moves, 1);
    }

    #[test]
    fn unchanged_list_has_no_edits() {
        assert!(plan_unkeyed(&[3, 1, 2], &[3, 1, 2]).is_empty());
    }

    #[test]
    fn custom_matching_keeps_equivalent_items() {
        let mut list = vec!["Apple", "pear", "PLUM"];
        let report = sync_unkeyed_by(&mut list, &["plum", "apple", "apple"], |item| item.to_lowercase());

        // Matched items are kept as they were; the second apple is new.
        assert_eq!(list, vec!["PLUM", "Apple", "apple"]);
        assert_eq!(
            report,
            SyncReport {
                removes: 1,
                moves: 1,
                inserts: 1
            }
        );
    }
}
