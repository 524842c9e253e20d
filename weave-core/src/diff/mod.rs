//! Collection Synchronization
//!
//! Brings a list in line with a target sequence using a small number of
//! primitive edits, so that observers of the list (bound UI views, reactive
//! computations) see a minimal stream of changes instead of a full reset.
//!
//! # Overview
//!
//! - [`plan_keyed`] matches items by a key function. Duplicate keys are an
//!   error.
//! - [`plan_unkeyed`] matches items by value, and [`plan_unkeyed_by`] by a
//!   caller-supplied projection. Equal values are matched in order of
//!   appearance.
//!
//! Both plans run in three phases: removals (highest index first), moves of
//! the items outside the longest increasing subsequence of matched items,
//! then insertions (lowest target index first). Applying a plan with
//! [`apply`] turns the current list into the target.
//!
//! Anything that implements [`ListEditor`] can be synchronized: `Vec`,
//! [`ObservableVec`], and [`ReactiveVec`](crate::reactive::ReactiveVec).

mod keyed;
mod lis;
mod unkeyed;

pub use keyed::{plan_keyed, sync_keyed};
pub use lis::longest_increasing_subsequence;
pub use unkeyed::{plan_unkeyed, plan_unkeyed_by, sync_unkeyed, sync_unkeyed_by};

/// Primitive operations of a list that can be synchronized.
pub trait ListEditor<T> {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the item at `index`.
    fn item(&self, index: usize) -> T;

    fn insert(&mut self, index: usize, item: T);

    fn remove(&mut self, index: usize) -> T;

    /// Move the item at `from` so that it ends up at `to`.
    fn move_item(&mut self, from: usize, to: usize) {
        if from != to {
            let item = self.remove(from);
            self.insert(to, item);
        }
    }
}

impl<T: Clone> ListEditor<T> for Vec<T> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn item(&self, index: usize) -> T {
        self[index].clone()
    }

    fn insert(&mut self, index: usize, item: T) {
        Vec::insert(self, index, item);
    }

    fn remove(&mut self, index: usize) -> T {
        Vec::remove(self, index)
    }
}

/// One step of a synchronization plan.
///
/// Indices refer to the list as it is when the edit is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit<T> {
    Remove { index: usize },
    Move { from: usize, to: usize },
    Insert { index: usize, item: T },
}

/// How many edits of each kind a synchronization applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub removes: usize,
    pub moves: usize,
    pub inserts: usize,
}

impl SyncReport {
    pub fn total(&self) -> usize {
        self.removes + self.moves + self.inserts
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    fn record<T>(&mut self, edit: &Edit<T>) {
        match edit {
            Edit::Remove { .. } => self.removes += 1,
            Edit::Move { .. } => self.moves += 1,
            Edit::Insert { .. } => self.inserts += 1,
        }
    }
}

impl<T> FromIterator<Edit<T>> for SyncReport {
    fn from_iter<I: IntoIterator<Item = Edit<T>>>(edits: I) -> Self {
        let mut report = SyncReport::default();
        for edit in edits {
            report.record(&edit);
        }
        report
    }
}

/// Apply `edits` to `list` in order.
pub fn apply<T, L>(list: &mut L, edits: Vec<Edit<T>>) -> SyncReport
where
    L: ListEditor<T> + ?Sized,
{
    let mut report = SyncReport::default();
    for edit in edits {
        report.record(&edit);
        match edit {
            Edit::Remove { index } => {
                list.remove(index);
            }
            Edit::Move { from, to } => list.move_item(from, to),
            Edit::Insert { index, item } => list.insert(index, item),
        }
    }
    tracing::debug!(
        removes = report.removes,
        moves = report.moves,
        inserts = report.inserts,
        "list synchronized"
    );
    report
}

/// Read every item of `list`.
pub(crate) fn items_of<T, L>(list: &L) -> Vec<T>
where
    L: ListEditor<T> + ?Sized,
{
    (0..list.len()).map(|index| list.item(index)).collect()
}

/// A primitive change to an [`ObservableVec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListChange<T> {
    Inserted { index: usize, item: T },
    Removed { index: usize, item: T },
    Moved { from: usize, to: usize },
}

type ChangeListener<T> = Box<dyn FnMut(&ListChange<T>) + Send>;

/// A `Vec` that reports every primitive change to its listeners.
pub struct ObservableVec<T> {
    items: Vec<T>,
    listeners: Vec<ChangeListener<T>>,
}

impl<T: Clone> ObservableVec<T> {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            items,
            listeners: Vec::new(),
        }
    }

    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&ListChange<T>) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }

    fn emit(&mut self, change: ListChange<T>) {
        for listener in &mut self.listeners {
            listener(&change);
        }
    }
}

impl<T: Clone> Default for ObservableVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> ListEditor<T> for ObservableVec<T> {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn item(&self, index: usize) -> T {
        self.items[index].clone()
    }

    fn insert(&mut self, index: usize, item: T) {
        self.items.insert(index, item.clone());
        self.emit(ListChange::Inserted { index, item });
    }

    fn remove(&mut self, index: usize) -> T {
        let item = self.items.remove(index);
        self.emit(ListChange::Removed {
            index,
            item: item.clone(),
        });
        item
    }

    fn move_item(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        let item = self.items.remove(from);
        self.items.insert(to, item);
        self.emit(ListChange::Moved { from, to });
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ObservableVec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableVec")
            .field("items", &self.items)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn apply_runs_edits_in_order() {
        let mut list = vec!['a', 'b', 'c'];
        let report = apply(
            &mut list,
            vec![
                Edit::Remove { index: 0 },
                Edit::Move { from: 1, to: 0 },
                Edit::Insert { index: 2, item: 'd' },
            ],
        );
        assert_eq!(list, vec!['c', 'b', 'd']);
        assert_eq!(
            report,
            SyncReport {
                removes: 1,
                moves: 1,
                inserts: 1
            }
        );
        assert_eq!(report.total(), 3);
    }

    #[test]
    fn observable_vec_reports_primitive_changes() {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let changes_clone = changes.clone();

        let mut list = ObservableVec::from_vec(vec![1, 2, 3]);
        list.subscribe(move |change| changes_clone.lock().unwrap().push(change.clone()));

        ListEditor::move_item(&mut list, 0, 2);
        ListEditor::remove(&mut list, 0);
        ListEditor::insert(&mut list, 0, 9);

        assert_eq!(list.as_slice(), &[9, 3, 1]);
        assert_eq!(
            *changes.lock().unwrap(),
            vec![
                ListChange::Moved { from: 0, to: 2 },
                ListChange::Removed { index: 0, item: 2 },
                ListChange::Inserted { index: 0, item: 9 },
            ]
        );
    }

    #[test]
    fn report_from_edits() {
        let edits: Vec<Edit<u8>> = vec![Edit::Remove { index: 3 }, Edit::Remove { index: 1 }];
        let report: SyncReport = edits.into_iter().collect();
        assert_eq!(report.removes, 2);
        assert!(!report.is_empty());
    }
}
