//! Reactive map with per-key dependencies.
//!
//! `get` and `contains_key` track one key; `len`, `keys` and `snapshot`
//! track the keyset. A key's dependency outlives the entry, so a computation
//! waiting for a missing key is triggered when the key is inserted.
//!
//! Iteration order is insertion order. Writers are serialized, and a write
//! that changes nothing announces nothing.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::{ReentrantMutex, RwLock};

use super::dependency::Dependency;
use super::notify::ChangeNotifier;

/// Notification key used when the keyset changes.
pub const KEYS_KEY: &str = "keys";

struct MapInner<K, V> {
    entries: RwLock<IndexMap<K, V>>,
    writer: ReentrantMutex<()>,
    keys: DashMap<K, Dependency>,
    keyset: Dependency,
    notifier: ChangeNotifier,
}

/// A thread-safe reactive map.
///
/// # Example
///
/// ```rust,ignore
/// let users: ReactiveMap<String, u32> = ReactiveMap::new();
///
/// let reader = users.clone();
/// let alice = Computed::new(move || reader.get("alice"));
///
/// users.insert("bob".to_string(), 30);   // alice stays clean
/// users.insert("alice".to_string(), 25); // alice is dirty
/// ```
pub struct ReactiveMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    inner: Arc<MapInner<K, V>>,
}

impl<K, V> ReactiveMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MapInner {
                entries: RwLock::new(IndexMap::new()),
                writer: ReentrantMutex::new(()),
                keys: DashMap::new(),
                keyset: Dependency::new(),
                notifier: ChangeNotifier::new(),
            }),
        }
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        self.key_dependency(key).track();
        self.inner.entries.read().contains_key(key)
    }

    /// Number of entries, tracking the keyset.
    pub fn len(&self) -> usize {
        self.inner.keyset.track();
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the value for `key` through a borrow, tracking the key.
    pub fn with<Q, R>(&self, key: &Q, f: impl FnOnce(Option<&V>) -> R) -> R
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        self.key_dependency(key).track();
        f(self.inner.entries.read().get(key))
    }

    /// Insert without comparing against the current value.
    pub fn insert_forced(&self, key: K, value: V) -> Option<V> {
        let _writing = self.inner.writer.lock();
        self.inner.notifier.changing(KEYS_KEY);
        let previous = self.inner.entries.write().insert(key.clone(), value);
        self.changed(&key, previous.is_none());
        previous
    }

    /// Remove `key`, returning its value.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        let _writing = self.inner.writer.lock();
        if !self.inner.entries.read().contains_key(key) {
            return None;
        }

        self.inner.notifier.changing(KEYS_KEY);
        let removed = self.inner.entries.write().shift_remove_entry(key);
        let (key, value) = removed?;
        self.changed(&key, true);
        Some(value)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let _writing = self.inner.writer.lock();
        if self.inner.entries.read().is_empty() {
            return;
        }

        self.inner.notifier.changing(KEYS_KEY);
        let removed: Vec<K> = {
            let mut entries = self.inner.entries.write();
            entries.drain(..).map(|(key, _)| key).collect()
        };

        let touched: Vec<Dependency> = removed
            .iter()
            .filter_map(|key| self.inner.keys.get(key).map(|dependency| dependency.clone()))
            .collect();
        for dependency in touched {
            dependency.trigger();
        }
        self.inner.keyset.trigger();
        self.inner.notifier.changed(KEYS_KEY);
    }

    /// The keyset dependency.
    pub fn keyset(&self) -> &Dependency {
        &self.inner.keyset
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.inner.notifier
    }

    /// The dependency of `key`, created if needed.
    pub fn key_dependency<Q>(&self, key: &Q) -> Dependency
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        if let Some(dependency) = self.inner.keys.get(key) {
            return dependency.clone();
        }
        self.inner.keys.entry(key.to_owned()).or_default().clone()
    }

    fn changed(&self, key: &K, keyset_changed: bool) {
        let dependency = self.inner.keys.get(key).map(|dependency| dependency.clone());
        if let Some(dependency) = dependency {
            dependency.trigger();
        }
        if keyset_changed {
            self.inner.keyset.trigger();
        }
        self.inner.notifier.changed(KEYS_KEY);
    }
}

impl<K, V> ReactiveMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Get a clone of the value for `key`, tracking the key.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        self.key_dependency(key).track();
        self.inner.entries.read().get(key).cloned()
    }

    pub fn get_untracked<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.entries.read().get(key).cloned()
    }

    /// All keys in insertion order, tracking the keyset.
    pub fn keys(&self) -> Vec<K> {
        self.inner.keyset.track();
        self.inner.entries.read().keys().cloned().collect()
    }

    /// Clone all entries, tracking the keyset and every key.
    pub fn snapshot(&self) -> Vec<(K, V)> {
        self.inner.keyset.track();
        let entries: Vec<(K, V)> = self
            .inner
            .entries
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        for (key, _) in &entries {
            self.key_dependency(key).track();
        }
        entries
    }
}

impl<K, V> ReactiveMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Send + Sync + 'static,
{
    /// Insert `value` under `key`. Returns false, and notifies nobody, if the
    /// key already maps to an equal value.
    pub fn insert(&self, key: K, value: V) -> bool {
        let _writing = self.inner.writer.lock();
        if self.inner.entries.read().get(&key) == Some(&value) {
            return false;
        }

        self.inner.notifier.changing(KEYS_KEY);
        let is_new = self.inner.entries.write().insert(key.clone(), value).is_none();
        self.changed(&key, is_new);
        true
    }
}

impl<K, V> Default for ReactiveMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for ReactiveMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> std::fmt::Debug for ReactiveMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveMap")
            .field("entries", &*self.inner.entries.read())
            .field("tracked_keys", &self.inner.keys.len())
            .finish()
    }
}
