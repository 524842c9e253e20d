//! Reactive list with per-index dependencies.
//!
//! Two levels of reactivity:
//!
//! 1. Per-index dependencies: `get(i)` only tracks index `i`. They are
//!    created on first read, so an untouched index costs nothing.
//! 2. Shape dependency: `len`, `snapshot` and iteration track the length and
//!    order of the list.
//!
//! Structural changes trigger the shape plus every tracked index whose
//! content shifted. Triggers fire after the write lock is released. Index
//! dependencies past the end with no subscribers left are dropped when the
//! list shrinks.
//!
//! Writers are serialized by a reentrant gate. A write that turns out to be
//! a no-op (out of range, equal value, nothing to remove) announces nothing.

use std::ops::Range;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{ReentrantMutex, RwLock};

use super::dependency::Dependency;
use super::notify::ChangeNotifier;
use crate::diff::ListEditor;

/// Notification key used by reactive lists.
pub const ITEMS_KEY: &str = "items";

struct VecInner<T> {
    items: RwLock<Vec<T>>,
    writer: ReentrantMutex<()>,
    indices: DashMap<usize, Dependency>,
    shape: Dependency,
    notifier: ChangeNotifier,
}

/// A thread-safe reactive `Vec`.
///
/// # Example
///
/// ```rust,ignore
/// let items = ReactiveVec::from_vec(vec!["a", "b"]);
///
/// let first = items.clone();
/// let effect = Effect::new(move || println!("first: {:?}", first.get(0)));
///
/// items.push("c");      // does not affect index 0
/// items.insert(0, "z"); // re-runs the effect
/// ```
pub struct ReactiveVec<T>
where
    T: Send + Sync + 'static,
{
    inner: Arc<VecInner<T>>,
}

impl<T> ReactiveVec<T>
where
    T: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            inner: Arc::new(VecInner {
                items: RwLock::new(items),
                writer: ReentrantMutex::new(()),
                indices: DashMap::new(),
                shape: Dependency::new(),
                notifier: ChangeNotifier::new(),
            }),
        }
    }

    /// Returns the number of elements, tracking the shape.
    pub fn len(&self) -> usize {
        self.inner.shape.track();
        self.inner.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len_untracked(&self) -> usize {
        self.inner.items.read().len()
    }

    /// Read the element at `index` through a borrow, tracking that index.
    pub fn with<R>(&self, index: usize, f: impl FnOnce(Option<&T>) -> R) -> R {
        self.index_dependency(index).track();
        f(self.inner.items.read().get(index))
    }

    /// Appends an element.
    pub fn push(&self, value: T) {
        let _writing = self.inner.writer.lock();
        self.inner.notifier.changing(ITEMS_KEY);
        let index = {
            let mut items = self.inner.items.write();
            items.push(value);
            items.len() - 1
        };
        self.changed(index..index + 1);
    }

    /// Removes the last element.
    pub fn pop(&self) -> Option<T> {
        let _writing = self.inner.writer.lock();
        if self.len_untracked() == 0 {
            return None;
        }

        self.inner.notifier.changing(ITEMS_KEY);
        let (value, len) = {
            let mut items = self.inner.items.write();
            let value = items.pop();
            (value, items.len())
        };
        self.changed(len..len + 1);
        self.prune_indices(len);
        value
    }

    /// Inserts an element at `index`, shifting everything after it.
    ///
    /// # Panics
    ///
    /// Panics if `index > len`.
    pub fn insert(&self, index: usize, value: T) {
        let _writing = self.inner.writer.lock();
        self.inner.notifier.changing(ITEMS_KEY);
        let len = {
            let mut items = self.inner.items.write();
            items.insert(index, value);
            items.len()
        };
        self.changed(index..len);
    }

    /// Removes and returns the element at `index`, shifting everything after it.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    pub fn remove(&self, index: usize) -> T {
        let _writing = self.inner.writer.lock();
        let len = self.len_untracked();
        assert!(index < len, "removal index (is {index}) should be < len (is {len})");
        self.remove_checked(index)
    }

    /// Removes the element at `index` if it exists.
    pub fn try_remove(&self, index: usize) -> Option<T> {
        let _writing = self.inner.writer.lock();
        if index >= self.len_untracked() {
            return None;
        }
        Some(self.remove_checked(index))
    }

    /// Caller holds the writer gate and has checked `index`.
    fn remove_checked(&self, index: usize) -> T {
        self.inner.notifier.changing(ITEMS_KEY);
        let (value, old_len) = {
            let mut items = self.inner.items.write();
            let old_len = items.len();
            (items.remove(index), old_len)
        };
        self.changed(index..old_len);
        self.prune_indices(old_len - 1);
        value
    }

    /// Moves the element at `from` so that it ends up at `to`.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of bounds.
    pub fn move_item(&self, from: usize, to: usize) {
        if from == to {
            return;
        }
        let _writing = self.inner.writer.lock();
        self.inner.notifier.changing(ITEMS_KEY);
        {
            let mut items = self.inner.items.write();
            let value = items.remove(from);
            items.insert(to, value);
        }
        self.changed(from.min(to)..from.max(to) + 1);
    }

    /// Removes all elements.
    pub fn clear(&self) {
        let _writing = self.inner.writer.lock();
        if self.len_untracked() == 0 {
            return;
        }

        self.inner.notifier.changing(ITEMS_KEY);
        let old_len = std::mem::take(&mut *self.inner.items.write()).len();
        self.changed(0..old_len);
        self.prune_indices(0);
    }

    /// Replaces the whole content.
    pub fn replace_all(&self, values: Vec<T>) {
        let _writing = self.inner.writer.lock();
        self.inner.notifier.changing(ITEMS_KEY);
        let (touched, len) = {
            let mut items = self.inner.items.write();
            let touched = items.len().max(values.len());
            let len = values.len();
            *items = values;
            (touched, len)
        };
        self.changed(0..touched);
        self.prune_indices(len);
    }

    /// Mutate the element at `index` in place. Returns false if it does not exist.
    pub fn update(&self, index: usize, f: impl FnOnce(&mut T)) -> bool {
        let _writing = self.inner.writer.lock();
        if index >= self.len_untracked() {
            return false;
        }

        self.inner.notifier.changing(ITEMS_KEY);
        if let Some(item) = self.inner.items.write().get_mut(index) {
            f(item);
        }
        self.trigger_index(index);
        true
    }

    /// The shape dependency.
    pub fn shape(&self) -> &Dependency {
        &self.inner.shape
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.inner.notifier
    }

    /// The dependency of `index`, created if needed.
    pub fn index_dependency(&self, index: usize) -> Dependency {
        if let Some(dependency) = self.inner.indices.get(&index) {
            return dependency.clone();
        }
        self.inner.indices.entry(index).or_default().clone()
    }

    fn trigger_index(&self, index: usize) {
        let dependency = self.inner.indices.get(&index).map(|dependency| dependency.clone());
        if let Some(dependency) = dependency {
            dependency.trigger();
        }
        self.inner.notifier.changed(ITEMS_KEY);
    }

    /// Drop index dependencies at or past `len` that nobody subscribes to.
    fn prune_indices(&self, len: usize) {
        self.inner
            .indices
            .retain(|index, dependency| *index < len || dependency.subscriber_count() > 0);
    }

    /// Trigger the shape and every tracked index in `range`.
    fn changed(&self, range: Range<usize>) {
        let touched: Vec<Dependency> = self
            .inner
            .indices
            .iter()
            .filter(|entry| range.contains(entry.key()))
            .map(|entry| entry.value().clone())
            .collect();

        tracing::trace!(start = range.start, end = range.end, tracked = touched.len(), "list changed");

        for dependency in touched {
            dependency.trigger();
        }
        self.inner.shape.trigger();
        self.inner.notifier.changed(ITEMS_KEY);
    }
}

impl<T> ReactiveVec<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Get a clone of the element at `index`, tracking that index.
    pub fn get(&self, index: usize) -> Option<T> {
        self.index_dependency(index).track();
        self.inner.items.read().get(index).cloned()
    }

    pub fn get_untracked(&self, index: usize) -> Option<T> {
        self.inner.items.read().get(index).cloned()
    }

    /// Clone the whole list, tracking the shape and every index.
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.shape.track();
        let items = self.inner.items.read().clone();
        for index in 0..items.len() {
            self.index_dependency(index).track();
        }
        items
    }

    pub fn snapshot_untracked(&self) -> Vec<T> {
        self.inner.items.read().clone()
    }

    /// Iterate over a snapshot of the list.
    pub fn iter(&self) -> std::vec::IntoIter<T> {
        self.snapshot().into_iter()
    }
}

impl<T> ReactiveVec<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    /// Replace the element at `index`. Returns false if it does not exist or
    /// is equal to `value`.
    pub fn set(&self, index: usize, value: T) -> bool {
        let _writing = self.inner.writer.lock();
        match self.inner.items.read().get(index) {
            Some(item) if *item != value => {}
            _ => return false,
        }

        self.inner.notifier.changing(ITEMS_KEY);
        if let Some(item) = self.inner.items.write().get_mut(index) {
            *item = value;
        }
        self.trigger_index(index);
        true
    }
}

impl<T> ListEditor<T> for ReactiveVec<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn len(&self) -> usize {
        self.len_untracked()
    }

    fn item(&self, index: usize) -> T {
        self.inner.items.read()[index].clone()
    }

    fn insert(&mut self, index: usize, item: T) {
        ReactiveVec::insert(self, index, item);
    }

    fn remove(&mut self, index: usize) -> T {
        ReactiveVec::remove(self, index)
    }

    fn move_item(&mut self, from: usize, to: usize) {
        ReactiveVec::move_item(self, from, to);
    }
}

impl<T> Default for ReactiveVec<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ReactiveVec<T>
where
    T: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> FromIterator<T> for ReactiveVec<T>
where
    T: Send + Sync + 'static,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl<T> std::fmt::Debug for ReactiveVec<T>
where
    T: Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveVec")
            .field("items", &*self.inner.items.read())
            .field("tracked_indices", &self.inner.indices.len())
            .finish()
    }
}
