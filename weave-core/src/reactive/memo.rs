//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computeds Work
//!
//! 1. On first access, the computed runs its getter as its own computation
//!    and caches the result. Whatever the getter reads becomes its read-set.
//!
//! 2. When accessed again while clean, it returns the cached value.
//!
//! 3. When a dependency changes, the computed's lazy computation runs
//!    synchronously: it marks the computed dirty and triggers the computed's
//!    own dependency, so computations reading the computed get scheduled.
//!
//! 4. On next access, the computed recomputes.
//!
//! Because invalidation is synchronous, a read right after a write always
//! sees the new value, even though downstream effects are still batched.
//!
//! # Thread Safety
//!
//! Recomputation runs under the computation's [`AsyncLock`](crate::lock::AsyncLock),
//! so concurrent readers of a dirty computed wait for one recompute instead
//! of racing. The lock is reentrant per thread: a getter that reads its own
//! computed gets the previous value back instead of deadlocking.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::ReactiveContext;
use super::dependency::Dependency;
use super::effect::{Computation, ComputationOptions};
use super::subscriber::ComputationId;
use crate::error::ComputedError;

const CLEAN: u8 = 0;
const COMPUTING: u8 = 1;
const DIRTY: u8 = 2;

/// Freshness of a computed's cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// The cached value is up-to-date.
    Clean,

    /// The getter is running.
    Computing,

    /// The computed needs to recompute before it is read.
    Dirty,
}

impl ComputedState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            CLEAN => Self::Clean,
            COMPUTING => Self::Computing,
            _ => Self::Dirty,
        }
    }
}

type Getter<T> = Box<dyn Fn() -> T + Send + Sync>;
type Setter<T> = Box<dyn Fn(T) + Send + Sync>;

struct ComputedInner<T> {
    getter: Getter<T>,
    setter: Option<Setter<T>>,
    value: RwLock<Option<T>>,
    state: AtomicU8,
    /// Tracked by readers, triggered on invalidation.
    dependency: Dependency,
    computation: Computation,
}

impl<T> ComputedInner<T> {
    fn invalidate(&self) {
        self.state.store(DIRTY, Ordering::SeqCst);
        self.dependency.trigger();
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let first = Ref::new("Ada".to_string());
/// let last = Ref::new("Lovelace".to_string());
///
/// let (f, l) = (first.clone(), last.clone());
/// let full = Computed::new(move || format!("{} {}", f.get(), l.get()));
///
/// assert_eq!(full.get(), "Ada Lovelace");
/// last.set("Byron".to_string());
/// assert_eq!(full.get(), "Ada Byron");
/// ```
///
/// Cloning yields another handle to the same cache.
pub struct Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a read-only computed. The getter runs on first access.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(Box::new(getter), None)
    }

    /// Create a computed whose `set` forwards to `setter`.
    pub fn with_setter<F, S>(getter: F, setter: S) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        S: Fn(T) + Send + Sync + 'static,
    {
        Self::build(Box::new(getter), Some(Box::new(setter)))
    }

    fn build(getter: Getter<T>, setter: Option<Setter<T>>) -> Self {
        let inner = Arc::new_cyclic(|weak: &std::sync::Weak<ComputedInner<T>>| {
            let weak = weak.clone();
            let computation = Computation::with_options(
                move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.invalidate();
                    }
                },
                ComputationOptions::lazy().with_scheduler(|computation| computation.execute()),
            );

            ComputedInner {
                getter,
                setter,
                value: RwLock::new(None),
                state: AtomicU8::new(DIRTY),
                dependency: Dependency::new(),
                computation,
            }
        });

        Self { inner }
    }

    pub fn id(&self) -> ComputationId {
        self.inner.computation.id()
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics if the getter reads this computed before it ever produced a
    /// value, or if the recompute lock is misused. Use [`try_get`](Self::try_get)
    /// to handle those cases.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("failed to read computed {}: {err}", self.id()),
        }
    }

    /// Get the current value, recomputing if necessary.
    pub fn try_get(&self) -> Result<T, ComputedError> {
        // A self-read must not subscribe the computed to its own invalidation.
        if ReactiveContext::current_id() != Some(self.id()) {
            self.inner.dependency.track();
        }

        if let Some(value) = self.clean_value() {
            return Ok(value);
        }

        let guard = self.inner.computation.lock().lock()?;

        // The getter is reading its own computed.
        if guard.scope().depth() > 1 {
            return self.inner.value.read().clone().ok_or(ComputedError::Cycle);
        }

        // Another thread may have recomputed while we waited.
        if let Some(value) = self.clean_value() {
            return Ok(value);
        }

        Ok(self.recompute())
    }

    /// Forward `value` to the setter.
    pub fn set(&self, value: T) -> Result<(), ComputedError> {
        match &self.inner.setter {
            Some(setter) => {
                setter(value);
                Ok(())
            }
            None => Err(ComputedError::ReadOnly),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.setter.is_none()
    }

    /// Force a recompute on the next read and notify readers.
    pub fn mark_dirty(&self) {
        self.inner.invalidate();
    }

    pub fn state(&self) -> ComputedState {
        ComputedState::from_raw(self.inner.state.load(Ordering::SeqCst))
    }

    /// Check if the computed has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }

    /// The dependency readers of this computed subscribe to.
    pub fn dependency(&self) -> &Dependency {
        &self.inner.dependency
    }

    /// The computation that tracks the getter's reads.
    pub fn computation(&self) -> &Computation {
        &self.inner.computation
    }

    fn clean_value(&self) -> Option<T> {
        if self.inner.state.load(Ordering::SeqCst) != CLEAN {
            return None;
        }
        self.inner.value.read().clone()
    }

    /// Run the getter as this computed's computation and cache the result.
    fn recompute(&self) -> T {
        self.inner.state.store(COMPUTING, Ordering::SeqCst);
        let mut reset = ResetOnUnwind {
            state: &self.inner.state,
            armed: true,
        };

        let value = self.inner.computation.run_tracked(|| (self.inner.getter)());
        reset.armed = false;

        *self.inner.value.write() = Some(value.clone());

        // Fails when invalidated mid-compute; the computed then stays dirty.
        let _ = self
            .inner
            .state
            .compare_exchange(COMPUTING, CLEAN, Ordering::SeqCst, Ordering::SeqCst);

        tracing::trace!(computed = %self.id(), state = ?self.state(), "recomputed");
        value
    }
}

/// Puts the computed back to dirty when the getter panics.
struct ResetOnUnwind<'a> {
    state: &'a AtomicU8,
    armed: bool,
}

impl Drop for ResetOnUnwind<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.store(DIRTY, Ordering::SeqCst);
        }
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Computed<T>
where
    T: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("value", &*self.inner.value.read())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Effect, Ref};
    use std::sync::atomic::AtomicI32;

    #[test]
    fn computed_computes_on_first_access() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let computed = Computed::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        // Not computed yet
        assert!(!computed.has_value());
        assert_eq!(computed.state(), ComputedState::Dirty);
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        assert_eq!(computed.get(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(computed.has_value());
        assert_eq!(computed.state(), ComputedState::Clean);
    }

    #[test]
    fn computed_caches_value_when_clean() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let computed = Computed::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        for _ in 0..5 {
            assert_eq!(computed.get(), 42);
        }
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn write_invalidates_synchronously() {
        let source = Ref::new(2);
        let source_clone = source.clone();
        let doubled = Computed::new(move || source_clone.get() * 2);

        assert_eq!(doubled.get(), 4);
        source.set(10);
        assert_eq!(doubled.state(), ComputedState::Dirty);
        assert_eq!(doubled.get(), 20);
    }

    #[test]
    fn computed_recomputes_when_marked_dirty() {
        let counter = Arc::new(AtomicI32::new(0));
        let counter_clone = counter.clone();
        let computed = Computed::new(move || counter_clone.load(Ordering::SeqCst));

        assert_eq!(computed.get(), 0);
        counter.store(5, Ordering::SeqCst);
        assert_eq!(computed.get(), 0);

        computed.mark_dirty();
        assert_eq!(computed.get(), 5);
    }

    #[test]
    fn computed_chain_propagates_invalidation() {
        let source = Ref::new(1);
        let source_clone = source.clone();
        let plus_one = Computed::new(move || source_clone.get() + 1);
        let plus_one_clone = plus_one.clone();
        let times_ten = Computed::new(move || plus_one_clone.get() * 10);

        assert_eq!(times_ten.get(), 20);
        source.set(4);
        assert_eq!(plus_one.state(), ComputedState::Dirty);
        assert_eq!(times_ten.state(), ComputedState::Dirty);
        assert_eq!(times_ten.get(), 50);
    }

    #[test]
    fn effect_reading_computed_subscribes_to_it() {
        let source = Ref::new(1);
        let source_clone = source.clone();
        let computed = Computed::new(move || source_clone.get());
        let computed_clone = computed.clone();

        let seen = Arc::new(AtomicI32::new(0));
        let seen_clone = seen.clone();
        let effect = Effect::with_scheduler(
            move || {
                seen_clone.store(computed_clone.get(), Ordering::SeqCst);
            },
            |computation| computation.execute(),
        );

        assert!(computed.dependency().has_subscriber(effect.id()));
        source.set(7);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn panicking_getter_leaves_computed_dirty() {
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let fail_clone = fail.clone();
        let computed = Computed::new(move || {
            if fail_clone.load(Ordering::SeqCst) {
                panic!("getter failed");
            }
            3
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| computed.get()));
        assert!(result.is_err());
        assert_eq!(computed.state(), ComputedState::Dirty);

        fail.store(false, Ordering::SeqCst);
        assert_eq!(computed.get(), 3);
    }

    #[test]
    fn self_read_without_value_is_a_cycle() {
        let slot: Arc<parking_lot::Mutex<Option<Computed<i32>>>> = Arc::new(parking_lot::Mutex::new(None));
        let slot_clone = slot.clone();
        let computed = Computed::new(move || {
            let this = slot_clone.lock().clone();
            match this {
                Some(this) => match this.try_get() {
                    Ok(previous) => previous + 1,
                    Err(ComputedError::Cycle) => -1,
                    Err(err) => panic!("unexpected error: {err}"),
                },
                None => 0,
            }
        });
        *slot.lock() = Some(computed.clone());

        assert_eq!(computed.get(), -1);
        computed.mark_dirty();
        // The self-read now sees the previous value.
        assert_eq!(computed.get(), 0);
    }

    #[test]
    fn setter_and_read_only() {
        let source = Ref::new(1);
        let (read, write) = (source.clone(), source.clone());
        let writable = Computed::with_setter(move || read.get(), move |value| {
            write.set(value);
        });

        writable.set(9).unwrap();
        assert_eq!(writable.get(), 9);

        let read_only = Computed::new(|| 0);
        assert!(read_only.is_read_only());
        assert_eq!(read_only.set(1), Err(ComputedError::ReadOnly));
    }

    #[test]
    fn computed_clone_shares_state() {
        let computed1 = Computed::new(|| 42);
        assert_eq!(computed1.get(), 42);

        let computed2 = computed1.clone();
        assert_eq!(computed1.id(), computed2.id());
        assert!(computed2.has_value());

        computed1.mark_dirty();
        assert_eq!(computed2.state(), ComputedState::Dirty);
    }

    #[test]
    fn concurrent_readers_compute_once() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();
        let computed = Computed::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            7
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let computed = computed.clone();
                std::thread::spawn(move || computed.get())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 7);
        }
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
