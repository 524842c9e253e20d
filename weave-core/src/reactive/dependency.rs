//! Dependency
//!
//! A Dependency is the unit of subscription: the set of computations that
//! read one piece of state during their last run.
//!
//! # How Dependencies Work
//!
//! 1. `track` is called on every read. If a computation is current, it joins
//!    the subscriber set and records the dependency in its own read-set.
//!
//! 2. `trigger` is called after every write. It snapshots the subscriber set
//!    and schedules each subscriber. Nothing runs synchronously here unless a
//!    computation's own scheduler chooses to.
//!
//! # Memory
//!
//! The subscriber set holds weak references. A dependency never keeps a
//! computation alive; computations keep their dependencies alive through
//! their read-sets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::context::ReactiveContext;
use super::effect::{Computation, WeakComputation};
use super::subscriber::ComputationId;

static DEPENDENCY_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

struct DependencyInner {
    id: u64,
    subscribers: DashMap<ComputationId, WeakComputation>,
}

/// A set of computations interested in one piece of state.
///
/// Cloning yields another handle to the same set.
#[derive(Clone)]
pub struct Dependency {
    inner: Arc<DependencyInner>,
}

impl Dependency {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DependencyInner {
                id: DEPENDENCY_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                subscribers: DashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Subscribe the current computation, if there is one.
    pub fn track(&self) {
        if let Some(computation) = ReactiveContext::current() {
            self.subscribe(&computation);
        }
    }

    /// Schedule every subscriber for re-execution.
    ///
    /// A computation writing to state it reads is not rescheduled by its own
    /// write.
    pub fn trigger(&self) {
        let mut subscribers = Vec::with_capacity(self.inner.subscribers.len());
        let mut dead = Vec::new();
        for entry in self.inner.subscribers.iter() {
            match entry.value().upgrade() {
                Some(computation) => subscribers.push(computation),
                None => dead.push(*entry.key()),
            }
        }
        for id in dead {
            self.inner.subscribers.remove(&id);
        }

        tracing::trace!(dependency = self.inner.id, subscribers = subscribers.len(), "trigger");

        for computation in subscribers {
            if ReactiveContext::is_running(computation.id()) {
                continue;
            }
            computation.schedule();
        }
    }

    pub(crate) fn subscribe(&self, computation: &Computation) {
        if computation.is_disposed() {
            return;
        }
        let newly_added = self
            .inner
            .subscribers
            .insert(computation.id(), computation.downgrade())
            .is_none();
        if newly_added {
            tracing::trace!(dependency = self.inner.id, computation = %computation.id(), "subscribe");
            computation.record_dependency(self.clone());
        }
    }

    pub(crate) fn unsubscribe(&self, id: ComputationId) {
        self.inner.subscribers.remove(&id);
    }

    /// Whether the computation with `id` is subscribed.
    pub fn has_subscriber(&self, id: ComputationId) -> bool {
        self.inner.subscribers.contains_key(&id)
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Whether two handles refer to the same dependency.
    pub fn same(&self, other: &Dependency) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Dependency {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency")
            .field("id", &self.inner.id)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ComputationOptions;
    use std::sync::atomic::AtomicI32;

    /// A computation that counts how often it gets scheduled.
    fn counting_computation() -> (Computation, Arc<AtomicI32>) {
        let scheduled = Arc::new(AtomicI32::new(0));
        let scheduled_clone = scheduled.clone();
        let computation = Computation::with_options(
            || {},
            ComputationOptions::default().with_scheduler(move |_| {
                scheduled_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (computation, scheduled)
    }

    #[test]
    fn track_outside_computation_is_a_no_op() {
        let dependency = Dependency::new();
        dependency.track();
        assert_eq!(dependency.subscriber_count(), 0);
    }

    #[test]
    fn track_is_idempotent() {
        let dependency = Dependency::new();
        let (computation, _) = counting_computation();

        {
            let _ctx = ReactiveContext::enter(&computation);
            dependency.track();
            dependency.track();
            dependency.track();
        }

        assert_eq!(dependency.subscriber_count(), 1);
        assert_eq!(computation.dependency_count(), 1);
    }

    #[test]
    fn trigger_schedules_subscribers() {
        let dependency = Dependency::new();
        let (a, a_scheduled) = counting_computation();
        let (b, b_scheduled) = counting_computation();

        for computation in [&a, &b] {
            let _ctx = ReactiveContext::enter(computation);
            dependency.track();
        }

        dependency.trigger();
        assert_eq!(a_scheduled.load(Ordering::SeqCst), 1);
        assert_eq!(b_scheduled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_computations_are_pruned() {
        let dependency = Dependency::new();
        {
            let (computation, _) = counting_computation();
            let _ctx = ReactiveContext::enter(&computation);
            dependency.track();
        }

        // Nothing holds the computation anymore.
        assert_eq!(dependency.subscriber_count(), 1);
        dependency.trigger();
        assert_eq!(dependency.subscriber_count(), 0);
    }

    #[test]
    fn running_computation_is_not_rescheduled_by_itself() {
        let dependency = Dependency::new();
        let (computation, scheduled) = counting_computation();

        let _ctx = ReactiveContext::enter(&computation);
        dependency.track();
        dependency.trigger();

        assert_eq!(scheduled.load(Ordering::SeqCst), 0);
    }
}
