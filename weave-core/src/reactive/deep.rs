//! Deep tracking.
//!
//! A deep watcher must react to changes anywhere inside the value it
//! watches, not just to the outer read. [`Trackable::track_deep`] walks a
//! value and tracks every reactive source reachable from it. Plain data has
//! nothing to track; containers recurse into their elements; reactive types
//! track themselves and then recurse into their contents.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::map::ReactiveMap;
use super::memo::Computed;
use super::signal::Ref;
use super::vec::ReactiveVec;

/// Values whose reactive sources can be tracked recursively.
pub trait Trackable {
    /// Track every reactive source reachable from `self`.
    fn track_deep(&self);
}

macro_rules! impl_plain_trackable {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Trackable for $ty {
                #[inline]
                fn track_deep(&self) {}
            }
        )*
    };
}

impl_plain_trackable!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
    str,
    &'static str,
);

impl<T: Trackable + ?Sized> Trackable for Box<T> {
    fn track_deep(&self) {
        (**self).track_deep();
    }
}

impl<T: Trackable + ?Sized> Trackable for Arc<T> {
    fn track_deep(&self) {
        (**self).track_deep();
    }
}

impl<T: Trackable> Trackable for Option<T> {
    fn track_deep(&self) {
        if let Some(value) = self {
            value.track_deep();
        }
    }
}

impl<T: Trackable> Trackable for [T] {
    fn track_deep(&self) {
        for item in self {
            item.track_deep();
        }
    }
}

impl<T: Trackable> Trackable for Vec<T> {
    fn track_deep(&self) {
        self.as_slice().track_deep();
    }
}

impl<K, V: Trackable, S> Trackable for HashMap<K, V, S> {
    fn track_deep(&self) {
        for value in self.values() {
            value.track_deep();
        }
    }
}

impl<K, V: Trackable> Trackable for BTreeMap<K, V> {
    fn track_deep(&self) {
        for value in self.values() {
            value.track_deep();
        }
    }
}

impl<T: Trackable, S> Trackable for HashSet<T, S> {
    fn track_deep(&self) {
        for value in self {
            value.track_deep();
        }
    }
}

impl<A: Trackable, B: Trackable> Trackable for (A, B) {
    fn track_deep(&self) {
        self.0.track_deep();
        self.1.track_deep();
    }
}

impl<A: Trackable, B: Trackable, C: Trackable> Trackable for (A, B, C) {
    fn track_deep(&self) {
        self.0.track_deep();
        self.1.track_deep();
        self.2.track_deep();
    }
}

impl<T> Trackable for Ref<T>
where
    T: Trackable + Send + Sync + 'static,
{
    fn track_deep(&self) {
        self.with(|value| value.track_deep());
    }
}

impl<T> Trackable for ReactiveVec<T>
where
    T: Trackable + Clone + Send + Sync + 'static,
{
    fn track_deep(&self) {
        for item in self.snapshot() {
            item.track_deep();
        }
    }
}

impl<K, V> Trackable for ReactiveMap<K, V>
where
    K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
    V: Trackable + Clone + Send + Sync + 'static,
{
    fn track_deep(&self) {
        for (_, value) in self.snapshot() {
            value.track_deep();
        }
    }
}

impl<T> Trackable for Computed<T>
where
    T: Trackable + Clone + Send + Sync + 'static,
{
    fn track_deep(&self) {
        self.get().track_deep();
    }
}
