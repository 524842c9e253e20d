//! Keyed synchronization.
//!
//! Items are matched across the two sequences by key. Matched items that
//! already appear in target order, as found by the longest increasing
//! subsequence, stay put; every other matched item is moved directly behind
//! its predecessor in the target.

use std::collections::HashMap;
use std::hash::Hash;

use super::lis::longest_increasing_subsequence;
use super::{apply, items_of, Edit, ListEditor, SyncReport};
use crate::error::{SyncError, SyncSide};

/// Plan the edits that turn `current` into `target`, matching items by `key`.
pub fn plan_keyed<T, K, F>(current: &[T], target: &[T], key: F) -> Result<Vec<Edit<T>>, SyncError>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let target_index = index_by_key(target, &key, SyncSide::Target)?;
    // Only checked for duplicates.
    index_by_key(current, &key, SyncSide::Current)?;

    let assigned: Vec<Option<usize>> = current
        .iter()
        .map(|item| target_index.get(&key(item)).copied())
        .collect();

    Ok(plan_assigned(&assigned, target))
}

/// Synchronize `list` with `target`, matching items by `key`.
pub fn sync_keyed<T, K, F, L>(list: &mut L, target: &[T], key: F) -> Result<SyncReport, SyncError>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
    L: ListEditor<T> + ?Sized,
{
    let current = items_of(list);
    let edits = plan_keyed(&current, target, key)?;
    Ok(apply(list, edits))
}

fn index_by_key<T, K, F>(items: &[T], key: &F, side: SyncSide) -> Result<HashMap<K, usize>, SyncError>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut index = HashMap::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        if index.insert(key(item), position).is_some() {
            return Err(SyncError::DuplicateKey {
                index: position,
                side,
            });
        }
    }
    Ok(index)
}

/// Plan edits given the target index of every current item (`None` when
/// the item is not in the target). Assigned target indices must be unique.
pub(super) fn plan_assigned<T: Clone>(assigned: &[Option<usize>], target: &[T]) -> Vec<Edit<T>> {
    let mut edits = Vec::new();

    for (index, slot) in assigned.iter().enumerate().rev() {
        if slot.is_none() {
            edits.push(Edit::Remove { index });
        }
    }

    // Target indices of the surviving items, in current order.
    let mut working: Vec<usize> = assigned.iter().flatten().copied().collect();

    let mut present = vec![false; target.len()];
    for &target_index in &working {
        present[target_index] = true;
    }
    let mut stable = vec![false; target.len()];
    for position in longest_increasing_subsequence(&working) {
        stable[working[position]] = true;
    }

    let mut previous: Option<usize> = None;
    for target_index in 0..target.len() {
        if !present[target_index] {
            continue;
        }
        if !stable[target_index] {
            if let Some(from) = working.iter().position(|&t| t == target_index) {
                working.remove(from);
                let to = previous
                    .and_then(|p| working.iter().position(|&t| t == p))
                    .map_or(0, |position| position + 1);
                working.insert(to, target_index);
                if from != to {
                    edits.push(Edit::Move { from, to });
                }
            }
        }
        previous = Some(target_index);
    }

    for (index, item) in target.iter().enumerate() {
        if !present[index] {
            edits.push(Edit::Insert {
                index,
                item: item.clone(),
            });
        }
    }

    edits
}
