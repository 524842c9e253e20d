//! Watchers
//!
//! A [`Watcher`] re-evaluates a getter whenever something it read changes
//! and hands `(new, old)` to a callback. It is one eager computation: the
//! getter runs tracked, the callback runs untracked, so reads inside the
//! callback never become dependencies of the watcher.
//!
//! # When the callback fires
//!
//! - First evaluation: only with `immediate`, and then with no old value.
//! - Later evaluations: when old and new differ according to the comparer
//!   (`PartialEq` unless one is given). Deep watchers and watchers with
//!   `suppress_equality` turned off fire on every evaluation.
//! - `once` watchers dispose themselves after the first callback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::context::untracked;
use super::deep::Trackable;
use super::effect::{Computation, ComputationOptions, WeakComputation};
use super::signal::Ref;
use super::subscriber::{ComputationId, SchedulerFn};

/// Decides whether two values are equal for the purpose of suppression.
pub type Comparer<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

type DeepTracker<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Options for [`Watcher`].
pub struct WatchOptions<T> {
    immediate: bool,
    once: bool,
    suppress_equality: bool,
    deep: Option<DeepTracker<T>>,
    scheduler: Option<SchedulerFn>,
    comparer: Option<Comparer<T>>,
}

impl<T> Default for WatchOptions<T> {
    fn default() -> Self {
        Self {
            immediate: false,
            once: false,
            suppress_equality: true,
            deep: None,
            scheduler: None,
            comparer: None,
        }
    }
}

impl<T> WatchOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire for the first evaluation too.
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// Dispose after the first callback.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Fire on every evaluation when `suppress` is false.
    pub fn with_suppress_equality(mut self, suppress: bool) -> Self {
        self.suppress_equality = suppress;
        self
    }

    /// Replace `PartialEq` for equality suppression.
    pub fn with_comparer<F>(mut self, comparer: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        self.comparer = Some(Arc::new(comparer));
        self
    }

    /// Decide when a triggered watcher re-evaluates.
    pub fn with_scheduler<F>(mut self, scheduler: F) -> Self
    where
        F: Fn(&Computation) + Send + Sync + 'static,
    {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    pub fn is_immediate(&self) -> bool {
        self.immediate
    }

    pub fn is_once(&self) -> bool {
        self.once
    }

    pub fn is_deep(&self) -> bool {
        self.deep.is_some()
    }

    pub fn suppresses_equality(&self) -> bool {
        self.suppress_equality
    }
}

impl<T: Trackable + 'static> WatchOptions<T> {
    /// Track every reactive source inside the watched value.
    pub fn deep(mut self) -> Self {
        self.deep = Some(Arc::new(|value: &T| value.track_deep()));
        self
    }
}

struct WatchState<T> {
    /// Value of the last evaluation; `None` before the first one.
    last: Mutex<Option<T>>,
    fired: AtomicUsize,
}

/// Watches a getter and calls back with `(new, old)` on change.
///
/// # Example
///
/// ```rust,ignore
/// let count = Ref::new(0);
///
/// let watcher = Watcher::on_ref(&count, |new, old| {
///     println!("count: {old:?} -> {new}");
/// }, WatchOptions::new());
///
/// count.set(1); // prints "count: Some(0) -> 1" on the next computation tick
/// ```
///
/// Keep the `Watcher` alive for as long as it should watch.
pub struct Watcher<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    computation: Computation,
    state: Arc<WatchState<T>>,
}

impl<T> Watcher<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a watcher. The getter is evaluated once before this returns.
    pub fn new<G, C>(getter: G, callback: C, options: WatchOptions<T>) -> Self
    where
        G: Fn() -> T + Send + Sync + 'static,
        C: Fn(&T, Option<&T>) + Send + Sync + 'static,
    {
        let WatchOptions {
            immediate,
            once,
            suppress_equality,
            deep,
            scheduler,
            comparer,
        } = options;

        let state = Arc::new(WatchState {
            last: Mutex::new(None),
            fired: AtomicUsize::new(0),
        });
        let this: Arc<OnceLock<WeakComputation>> = Arc::new(OnceLock::new());

        let body = {
            let state = Arc::clone(&state);
            let this = Arc::clone(&this);
            let deep_enabled = deep.is_some();
            move || {
                let value = getter();
                if let Some(track) = &deep {
                    track(&value);
                }

                let old = state.last.lock().replace(value.clone());
                let fire = match &old {
                    None => immediate,
                    Some(_) if !suppress_equality || deep_enabled => true,
                    Some(old) => match &comparer {
                        Some(equal) => !equal(old, &value),
                        None => *old != value,
                    },
                };
                if !fire {
                    return;
                }

                untracked(|| callback(&value, old.as_ref()));
                state.fired.fetch_add(1, Ordering::SeqCst);

                if once {
                    if let Some(computation) = this.get().and_then(WeakComputation::upgrade) {
                        computation.dispose();
                    }
                }
            }
        };

        let computation = Computation::with_options(
            body,
            ComputationOptions::default().with_scheduler_fn(scheduler),
        );
        // Set exactly once, before the first run.
        let _ = this.set(computation.downgrade());

        computation.execute();

        Self { computation, state }
    }

    pub fn id(&self) -> ComputationId {
        self.computation.id()
    }

    pub fn computation(&self) -> &Computation {
        &self.computation
    }

    /// The value seen by the last evaluation.
    pub fn value(&self) -> Option<T> {
        self.state.last.lock().clone()
    }

    /// How many times the callback ran.
    pub fn fire_count(&self) -> usize {
        self.state.fired.load(Ordering::SeqCst)
    }

    /// Stop watching.
    pub fn dispose(&self) {
        self.computation.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.computation.is_disposed()
    }
}

impl<T> Watcher<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Watch the value of a ref.
    pub fn on_ref<C>(source: &Ref<T>, callback: C, options: WatchOptions<T>) -> Self
    where
        C: Fn(&T, Option<&T>) + Send + Sync + 'static,
    {
        let source = source.clone();
        Self::new(move || source.get(), callback, options)
    }
}

impl<T> std::fmt::Debug for Watcher<T>
where
    T: Clone + PartialEq + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id())
            .field("value", &self.value())
            .field("fire_count", &self.fire_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
