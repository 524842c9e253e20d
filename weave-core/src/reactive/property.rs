//! Property tracking for adapter objects.
//!
//! Hand-written or generated wrappers around plain objects make their fields
//! reactive by owning a [`PropertyTracker`]: every getter calls `track_read`
//! with the property name, every setter calls `track_write` (or wraps the
//! mutation in `write`). Dependencies are created per key on first use.
//!
//! ```rust,ignore
//! struct Person {
//!     name: Mutex<String>,
//!     props: PropertyTracker,
//! }
//!
//! impl Person {
//!     fn name(&self) -> String {
//!         self.props.track_read("name");
//!         self.name.lock().clone()
//!     }
//!
//!     fn set_name(&self, name: String) {
//!         self.props.write("name", || *self.name.lock() = name);
//!     }
//! }
//! ```

use std::sync::Arc;

use dashmap::DashMap;

use super::dependency::Dependency;
use super::notify::ChangeNotifier;

/// Per-key dependencies and change notification for one object.
#[derive(Clone, Default)]
pub struct PropertyTracker {
    dependencies: Arc<DashMap<Arc<str>, Dependency>>,
    notifier: ChangeNotifier,
}

impl PropertyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The dependency of `key`, created if needed.
    pub fn dependency(&self, key: &str) -> Dependency {
        if let Some(dependency) = self.dependencies.get(key) {
            return dependency.clone();
        }
        self.dependencies
            .entry(Arc::from(key))
            .or_default()
            .clone()
    }

    /// Record a read of `key` by the current computation.
    pub fn track_read(&self, key: &str) {
        self.dependency(key).track();
    }

    /// Tell observers `key` is about to change.
    pub fn will_write(&self, key: &str) {
        self.notifier.changing(key);
    }

    /// Report that `key` was written.
    pub fn track_write(&self, key: &str) {
        // Clone out of the map: a synchronous scheduler may read `key` again.
        let dependency = self.dependencies.get(key).map(|dependency| dependency.clone());
        if let Some(dependency) = dependency {
            dependency.trigger();
        }
        self.notifier.changed(key);
    }

    /// Run a mutation of `key`, notifying before and after.
    pub fn write<R>(&self, key: &str, mutate: impl FnOnce() -> R) -> R {
        self.will_write(key);
        let result = mutate();
        self.track_write(key);
        result
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Keys that have been read or written so far.
    pub fn tracked_keys(&self) -> Vec<Arc<str>> {
        self.dependencies.iter().map(|entry| Arc::clone(entry.key())).collect()
    }
}

impl std::fmt::Debug for PropertyTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyTracker")
            .field("tracked_keys", &self.dependencies.len())
            .field("notifier", &self.notifier)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Computed, ComputedState};
    use parking_lot::Mutex;

    struct Person {
        name: Mutex<String>,
        age: Mutex<u32>,
        props: PropertyTracker,
    }

    impl Person {
        fn new(name: &str, age: u32) -> Arc<Self> {
            Arc::new(Self {
                name: Mutex::new(name.to_string()),
                age: Mutex::new(age),
                props: PropertyTracker::new(),
            })
        }

        fn name(&self) -> String {
            self.props.track_read("name");
            self.name.lock().clone()
        }

        fn set_name(&self, name: &str) {
            self.props.write("name", || *self.name.lock() = name.to_string());
        }

        fn set_age(&self, age: u32) {
            self.props.write("age", || *self.age.lock() = age);
        }
    }

    #[test]
    fn reads_and_writes_are_per_key() {
        let person = Person::new("Ada", 36);
        let person_clone = person.clone();
        let greeting = Computed::new(move || format!("Hello, {}", person_clone.name()));

        assert_eq!(greeting.get(), "Hello, Ada");

        person.set_age(37);
        assert_eq!(greeting.state(), ComputedState::Clean);

        person.set_name("Grace");
        assert_eq!(greeting.state(), ComputedState::Dirty);
        assert_eq!(greeting.get(), "Hello, Grace");
    }

    #[test]
    fn write_notifies_changing_first() {
        let person = Person::new("Ada", 36);
        let events = Arc::new(Mutex::new(Vec::new()));

        struct Log(Arc<Mutex<Vec<String>>>);
        impl crate::reactive::ChangeObserver for Log {
            fn property_changing(&self, key: &str) {
                self.0.lock().push(format!("changing:{key}"));
            }
            fn property_changed(&self, _key: &str) {}
        }

        person.props.notifier().subscribe(Log(events.clone()));
        person.set_name("Grace");
        assert_eq!(*events.lock(), vec!["changing:name".to_string()]);
    }

    #[test]
    fn tracked_keys_are_created_lazily() {
        let tracker = PropertyTracker::new();
        assert!(tracker.tracked_keys().is_empty());

        tracker.track_write("untouched");
        assert!(tracker.tracked_keys().is_empty());

        tracker.track_read("name");
        assert_eq!(tracker.tracked_keys(), vec![Arc::<str>::from("name")]);
        assert!(tracker.dependency("name").same(&tracker.dependency("name")));
    }
}
