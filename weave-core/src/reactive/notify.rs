//! Change notification.
//!
//! UI layers bind to objects through "property changing / property changed"
//! callbacks. A [`ChangeNotifier`] carries those callbacks for one reactive
//! object: `changing` fires synchronously before a write, `changed` is
//! deferred through the runtime's notification batcher, where repeated
//! changes of the same key within one tick collapse into one callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::runtime::Runtime;

static NOTIFIER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Receives change notifications from a [`ChangeNotifier`].
pub trait ChangeObserver: Send + Sync {
    /// Called synchronously before `key` is written.
    fn property_changing(&self, _key: &str) {}

    /// Called after `key` was written, on the notification tick.
    fn property_changed(&self, key: &str);
}

impl<F> ChangeObserver for F
where
    F: Fn(&str) + Send + Sync,
{
    fn property_changed(&self, key: &str) {
        self(key)
    }
}

/// Handle returned by [`ChangeNotifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct NotifierInner {
    id: u64,
    next_observer: AtomicU64,
    observers: RwLock<Vec<(ObserverId, Arc<dyn ChangeObserver>)>>,
}

impl NotifierInner {
    fn observers(&self) -> Vec<Arc<dyn ChangeObserver>> {
        self.observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    fn fire_changed(&self, key: &str) {
        for observer in self.observers() {
            observer.property_changed(key);
        }
    }
}

/// The observer list of one reactive object.
///
/// Cloning yields another handle to the same list.
#[derive(Clone)]
pub struct ChangeNotifier {
    inner: Arc<NotifierInner>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                id: NOTIFIER_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                next_observer: AtomicU64::new(0),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Identity used to coalesce notifications of this object.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn subscribe<O>(&self, observer: O) -> ObserverId
    where
        O: ChangeObserver + 'static,
    {
        let id = ObserverId(self.inner.next_observer.fetch_add(1, Ordering::Relaxed));
        self.inner.observers.write().push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.inner.observers.write();
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    pub fn has_observers(&self) -> bool {
        !self.inner.observers.read().is_empty()
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.read().len()
    }

    /// Tell observers `key` is about to change.
    pub fn changing(&self, key: &str) {
        if !self.has_observers() {
            return;
        }
        for observer in self.inner.observers() {
            observer.property_changing(key);
        }
    }

    /// Queue a "changed" notification for `key` on the current runtime.
    pub fn changed(&self, key: &str) {
        if !self.has_observers() {
            return;
        }
        let weak: Weak<NotifierInner> = Arc::downgrade(&self.inner);
        let key: Arc<str> = Arc::from(key);
        let fired = Arc::clone(&key);
        Runtime::current().notify_changed(self.inner.id, key, move || {
            if let Some(inner) = weak.upgrade() {
                inner.fire_changed(&fired);
            }
        });
    }

    /// Deliver a "changed" notification immediately.
    pub fn changed_now(&self, key: &str) {
        self.inner.fire_changed(key);
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("id", &self.inner.id)
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl ChangeObserver for Recorder {
        fn property_changing(&self, key: &str) {
            self.events.lock().push(format!("changing:{key}"));
        }

        fn property_changed(&self, key: &str) {
            self.events.lock().push(format!("changed:{key}"));
        }
    }

    #[test]
    fn changing_is_synchronous() {
        let notifier = ChangeNotifier::new();
        let recorder = Recorder::default();
        notifier.subscribe(recorder.clone());

        notifier.changing("value");
        notifier.changed_now("value");
        assert_eq!(*recorder.events.lock(), vec!["changing:value", "changed:value"]);
    }

    #[test]
    fn closures_observe_changes() {
        let notifier = ChangeNotifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        notifier.subscribe(move |key: &str| seen_clone.lock().push(key.to_string()));

        notifier.changed_now("name");
        assert_eq!(*seen.lock(), vec!["name".to_string()]);
    }

    #[test]
    fn unsubscribe_removes_observer() {
        let notifier = ChangeNotifier::new();
        let id = notifier.subscribe(|_: &str| {});
        assert!(notifier.has_observers());

        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        assert!(!notifier.has_observers());
    }

    #[test]
    fn deferred_changes_are_delivered_on_flush() {
        let notifier = ChangeNotifier::new();
        let recorder = Recorder::default();
        notifier.subscribe(recorder.clone());

        notifier.changed("value");
        notifier.changed("value");
        notifier.changed("other");
        Runtime::global().flush_blocking().unwrap();

        let events = recorder.events.lock();
        assert_eq!(events.first().map(String::as_str), Some("changed:value"));
        assert!(events.iter().any(|event| event == "changed:other"));
        assert!(events.len() <= 3);
    }
}
