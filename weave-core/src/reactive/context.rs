//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a dependency is read,
//! it can register the current computation as a subscriber.
//!
//! # Implementation
//!
//! We use a thread-local stack. Entering a computation pushes it; the guard
//! pops it on drop, including during unwinding, so the previous computation
//! is always restored. An `untracked` entry masks everything below it.
//!
//! Computation bodies are synchronous closures, so a thread is exactly one
//! logical call chain for as long as a body runs.

use std::cell::RefCell;

use super::effect::Computation;
use super::subscriber::ComputationId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack. `None` is an untracked scope.
struct ContextEntry {
    computation: Option<Computation>,
}

impl ContextEntry {
    fn id(&self) -> Option<ComputationId> {
        self.computation.as_ref().map(Computation::id)
    }
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    id: Option<ComputationId>,
}

impl ReactiveContext {
    /// Make `computation` the current computation until the guard drops.
    pub fn enter(computation: &Computation) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                computation: Some(computation.clone()),
            });
        });

        Self {
            id: Some(computation.id()),
        }
    }

    /// Suspend tracking until the guard drops.
    pub fn untracked() -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry { computation: None });
        });

        Self { id: None }
    }

    /// Check if reads are currently being tracked.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .is_some_and(|entry| entry.computation.is_some())
        })
    }

    /// The computation reads are attributed to, if any.
    pub fn current() -> Option<Computation> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.computation.clone()))
    }

    pub fn current_id() -> Option<ComputationId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(ContextEntry::id))
    }

    /// Whether `id` is running anywhere on this thread's stack.
    pub fn is_running(id: ComputationId) -> bool {
        CONTEXT_STACK.with(|stack| stack.borrow().iter().any(|entry| entry.id() == Some(id)))
    }

    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.id(),
                    self.id,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.id,
                    entry.id()
                );
            }
        });
    }
}

/// Run `f` without tracking any reads.
pub fn untracked<T>(f: impl FnOnce() -> T) -> T {
    let _ctx = ReactiveContext::untracked();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_tracks_computation() {
        let computation = Computation::lazy(|| {});

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current().is_none());

        {
            let _ctx = ReactiveContext::enter(&computation);

            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_id(), Some(computation.id()));
        }

        // Context should be cleaned up after drop
        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_id().is_none());
    }

    #[test]
    fn nested_contexts() {
        let outer = Computation::lazy(|| {});
        let inner = Computation::lazy(|| {});

        {
            let _ctx1 = ReactiveContext::enter(&outer);
            assert_eq!(ReactiveContext::current_id(), Some(outer.id()));

            {
                let _ctx2 = ReactiveContext::enter(&inner);
                assert_eq!(ReactiveContext::current_id(), Some(inner.id()));
                assert!(ReactiveContext::is_running(outer.id()));
            }

            // After inner context drops, outer should be current
            assert_eq!(ReactiveContext::current_id(), Some(outer.id()));
            assert!(!ReactiveContext::is_running(inner.id()));
        }

        assert_eq!(ReactiveContext::depth(), 0);
    }

    #[test]
    fn untracked_masks_current() {
        let computation = Computation::lazy(|| {});
        let _ctx = ReactiveContext::enter(&computation);

        let inside = untracked(ReactiveContext::current_id);
        assert_eq!(inside, None);
        assert_eq!(ReactiveContext::current_id(), Some(computation.id()));
    }

    #[test]
    fn context_restored_after_panic() {
        let computation = Computation::lazy(|| {});

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ctx = ReactiveContext::enter(&computation);
            panic!("body failed");
        }));

        assert!(result.is_err());
        assert_eq!(ReactiveContext::depth(), 0);
    }
}
