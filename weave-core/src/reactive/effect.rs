//! Computation and Effect
//!
//! A [`Computation`] is a re-runnable unit of work whose reads are tracked.
//! An [`Effect`] is the user-facing eager computation: it runs once when
//! created and again whenever something it read changes.
//!
//! # How Computations Work
//!
//! 1. `execute` takes a per-instance mutex so a computation never runs twice
//!    at the same time.
//!
//! 2. An eager computation first unsubscribes from every dependency of its
//!    previous run, then runs its body as the current computation. Whatever
//!    the body reads becomes the new read-set; stale subscriptions never
//!    survive a run.
//!
//! 3. A lazy computation only invokes its body. [`Computed`](super::Computed)
//!    uses this: its body is the invalidation step, and it manages its own
//!    subscriptions when it recomputes.
//!
//! 4. When a dependency triggers, `schedule` hands the computation to its
//!    custom scheduler, or to the runtime's computation queue.
//!
//! # Failure
//!
//! A panicking body propagates out of `execute`. The current computation is
//! restored regardless, and the subscriptions recorded so far stay in place,
//! so the computation is retried on the next trigger.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::dependency::Dependency;
use super::runtime::Runtime;
use super::subscriber::{ComputationId, SchedulerFn};
use crate::lock::AsyncLock;

/// How a computation is run and scheduled.
#[derive(Clone, Default)]
pub struct ComputationOptions {
    /// Invoke the body without managing subscriptions.
    pub lazy: bool,
    /// Replaces the runtime queue when the computation is triggered.
    pub scheduler: Option<SchedulerFn>,
}

impl ComputationOptions {
    pub fn lazy() -> Self {
        Self {
            lazy: true,
            scheduler: None,
        }
    }

    pub fn with_scheduler<F>(mut self, scheduler: F) -> Self
    where
        F: Fn(&Computation) + Send + Sync + 'static,
    {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    pub fn with_scheduler_fn(mut self, scheduler: Option<SchedulerFn>) -> Self {
        self.scheduler = scheduler;
        self
    }
}

pub(crate) struct ComputationInner {
    id: ComputationId,
    body: Box<dyn Fn() + Send + Sync>,
    scheduler: Option<SchedulerFn>,
    lazy: bool,
    disposed: AtomicBool,
    /// Dependencies read during the last run.
    dependencies: Mutex<SmallVec<[Dependency; 4]>>,
    /// Serializes `execute`.
    running: Mutex<()>,
    /// Guards recomputation across threads; reentrant within one call chain.
    lock: AsyncLock,
    run_count: AtomicUsize,
}

/// A re-runnable, dependency-tracked unit of work.
///
/// Cloning yields another handle to the same computation. Subscriptions hold
/// computations weakly: once every handle is dropped, it stops running.
#[derive(Clone)]
pub struct Computation {
    inner: Arc<ComputationInner>,
}

/// A weak handle to a [`Computation`].
#[derive(Clone)]
pub struct WeakComputation(Weak<ComputationInner>);

impl WeakComputation {
    pub fn upgrade(&self) -> Option<Computation> {
        self.0.upgrade().map(|inner| Computation { inner })
    }
}

impl Computation {
    /// Create an eager computation. It does not run until executed or triggered.
    pub fn new<F>(body: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_options(body, ComputationOptions::default())
    }

    /// Create a lazy computation.
    pub fn lazy<F>(body: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_options(body, ComputationOptions::lazy())
    }

    pub fn with_options<F>(body: F, options: ComputationOptions) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ComputationInner {
                id: ComputationId::new(),
                body: Box::new(body),
                scheduler: options.scheduler,
                lazy: options.lazy,
                disposed: AtomicBool::new(false),
                dependencies: Mutex::new(SmallVec::new()),
                running: Mutex::new(()),
                lock: AsyncLock::new(),
                run_count: AtomicUsize::new(0),
            }),
        }
    }

    pub fn id(&self) -> ComputationId {
        self.inner.id
    }

    /// The lock held while this computation is recomputed by the runtime.
    pub fn lock(&self) -> &AsyncLock {
        &self.inner.lock
    }

    pub fn is_lazy(&self) -> bool {
        self.inner.lazy
    }

    pub fn downgrade(&self) -> WeakComputation {
        WeakComputation(Arc::downgrade(&self.inner))
    }

    /// Run the computation now.
    pub fn execute(&self) {
        let _running = self.inner.running.lock();
        if self.is_disposed() {
            return;
        }

        if self.inner.lazy {
            (self.inner.body)();
        } else {
            self.run_tracked(|| (self.inner.body)());
        }

        self.inner.run_count.fetch_add(1, Ordering::Relaxed);

        // Disposed mid-run: drop whatever the run subscribed to.
        if self.is_disposed() {
            self.clear_dependencies();
        }
    }

    /// Run `f` as this computation, replacing its read-set with what `f` reads.
    pub(crate) fn run_tracked<T>(&self, f: impl FnOnce() -> T) -> T {
        self.clear_dependencies();
        let _ctx = ReactiveContext::enter(self);
        f()
    }

    /// Hand the computation to its scheduler.
    pub fn schedule(&self) {
        if self.is_disposed() {
            return;
        }
        match &self.inner.scheduler {
            Some(scheduler) => scheduler(self),
            None => Runtime::current().schedule_computation(self.clone()),
        }
    }

    /// Stop the computation for good and drop all its subscriptions.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.clear_dependencies();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of times the computation has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::Relaxed)
    }

    /// Get the number of dependencies read during the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }

    /// Whether the last run read `dependency`.
    pub fn depends_on(&self, dependency: &Dependency) -> bool {
        self.inner
            .dependencies
            .lock()
            .iter()
            .any(|dep| dep.same(dependency))
    }

    pub(crate) fn record_dependency(&self, dependency: Dependency) {
        let mut dependencies = self.inner.dependencies.lock();
        if !dependencies.iter().any(|dep| dep.same(&dependency)) {
            dependencies.push(dependency);
        }
    }

    pub(crate) fn clear_dependencies(&self) {
        let dependencies = std::mem::take(&mut *self.inner.dependencies.lock());
        for dependency in dependencies {
            dependency.unsubscribe(self.inner.id);
        }
    }
}

impl PartialEq for Computation {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Computation {}

impl std::fmt::Debug for Computation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.inner.id)
            .field("lazy", &self.inner.lazy)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let count = Ref::new(0);
///
/// let count_clone = count.clone();
/// let effect = Effect::new(move || {
///     println!("Count is: {}", count_clone.get());
/// });
///
/// count.set(5);  // Prints "Count is: 5" on the next computation tick
/// ```
///
/// Keep the `Effect` alive for as long as it should react.
#[derive(Clone, Debug)]
pub struct Effect {
    computation: Computation,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);
        effect.execute();
        effect
    }

    /// Create a new effect without running it immediately.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            computation: Computation::new(run),
        }
    }

    /// Create an effect with a custom scheduler, running it immediately.
    pub fn with_scheduler<F, S>(run: F, scheduler: S) -> Self
    where
        F: Fn() + Send + Sync + 'static,
        S: Fn(&Computation) + Send + Sync + 'static,
    {
        let effect = Self {
            computation: Computation::with_options(
                run,
                ComputationOptions::default().with_scheduler(scheduler),
            ),
        };
        effect.execute();
        effect
    }

    pub fn id(&self) -> ComputationId {
        self.computation.id()
    }

    pub fn computation(&self) -> &Computation {
        &self.computation
    }

    /// Run the effect now.
    pub fn execute(&self) {
        self.computation.execute();
    }

    /// Schedule the effect to re-run.
    pub fn schedule(&self) {
        self.computation.schedule();
    }

    /// Dispose of the effect. After disposal, the effect will not run again.
    pub fn dispose(&self) {
        self.computation.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.computation.is_disposed()
    }

    pub fn run_count(&self) -> usize {
        self.computation.run_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.computation.dependency_count()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
