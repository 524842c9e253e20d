//! Ref Implementation
//!
//! A Ref is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Refs Work
//!
//! 1. When a ref is read within a computation (effect, computed, watcher),
//!    the ref's dependency registers that computation as a subscriber.
//!
//! 2. When a ref's value changes, its dependency triggers: every subscriber
//!    is scheduled, and observers get a deferred "changed" notification.
//!
//! 3. Writing an equal value does nothing. Use `set_forced` to notify anyway.
//!
//! # Thread Safety
//!
//! The value is protected by a `parking_lot::RwLock`. The lock is released
//! before subscribers are triggered, so a synchronously scheduled
//! computation can read the new value. Writers are serialized by a separate
//! reentrant gate, so `set` compares, announces and writes as one step and
//! never announces a write that a concurrent equal write made redundant.

use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};

use super::dependency::Dependency;
use super::notify::ChangeNotifier;

/// Notification key used by refs.
pub const VALUE_KEY: &str = "value";

struct RefInner<T> {
    name: Option<Arc<str>>,
    value: RwLock<T>,
    /// Held from the equality check through the write.
    writer: ReentrantMutex<()>,
    dependency: Dependency,
    notifier: ChangeNotifier,
}

/// A reactive cell holding a value of type T.
///
/// # Example
///
/// ```rust,ignore
/// let count = Ref::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (schedules subscribers)
/// count.set(5);
/// ```
///
/// Cloning yields another handle to the same cell.
pub struct Ref<T>
where
    T: Send + Sync + 'static,
{
    inner: Arc<RefInner<T>>,
}

impl<T> Ref<T>
where
    T: Send + Sync + 'static,
{
    /// Create a new ref with the given initial value.
    pub fn new(value: T) -> Self {
        Self::build(None, value)
    }

    /// Create a ref with a name, used in logs.
    pub fn named(name: impl Into<Arc<str>>, value: T) -> Self {
        Self::build(Some(name.into()), value)
    }

    fn build(name: Option<Arc<str>>, value: T) -> Self {
        Self {
            inner: Arc::new(RefInner {
                name,
                value: RwLock::new(value),
                writer: ReentrantMutex::new(()),
                dependency: Dependency::new(),
                notifier: ChangeNotifier::new(),
            }),
        }
    }

    /// The id of the ref's dependency.
    pub fn id(&self) -> u64 {
        self.inner.dependency.id()
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Read the value through a borrow, tracking the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.dependency.track();
        f(&self.inner.value.read())
    }

    /// Read the value through a borrow without tracking.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.read())
    }

    /// Replace the value unconditionally and notify.
    pub fn set_forced(&self, value: T) {
        self.write(|current| *current = value);
    }

    /// Mutate the value in place and notify.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.write(f);
    }

    fn write(&self, f: impl FnOnce(&mut T)) {
        {
            let _writing = self.inner.writer.lock();
            self.inner.notifier.changing(VALUE_KEY);
            let mut value = self.inner.value.write();
            f(&mut value);
        }
        self.notify_written();
    }

    fn notify_written(&self) {
        tracing::trace!(
            dependency = self.inner.dependency.id(),
            name = self.inner.name.as_deref().unwrap_or(""),
            "ref written"
        );
        self.inner.dependency.trigger();
        self.inner.notifier.changed(VALUE_KEY);
    }

    /// The dependency readers of this ref subscribe to.
    pub fn dependency(&self) -> &Dependency {
        &self.inner.dependency
    }

    /// Observers of this ref's changes.
    pub fn notifier(&self) -> &ChangeNotifier {
        &self.inner.notifier
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dependency.subscriber_count()
    }
}

impl<T> Ref<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Get the current value.
    ///
    /// If called within a computation, this also registers the computation
    /// as a subscriber.
    pub fn get(&self) -> T {
        self.inner.dependency.track();
        self.inner.value.read().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }
}

impl<T> Ref<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    /// Set a new value. Returns false, and notifies nobody, if it equals the
    /// current one.
    pub fn set(&self, value: T) -> bool {
        {
            let _writing = self.inner.writer.lock();
            if *self.inner.value.read() == value {
                return false;
            }
            self.inner.notifier.changing(VALUE_KEY);
            *self.inner.value.write() = value;
        }
        self.notify_written();
        true
    }
}

impl<T> Clone for Ref<T>
where
    T: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Refs compare by identity.
impl<T> PartialEq for Ref<T>
where
    T: Send + Sync + 'static,
{
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for Ref<T> where T: Send + Sync + 'static {}

impl<T> std::fmt::Debug for Ref<T>
where
    T: Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ref")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("value", &*self.inner.value.read())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
