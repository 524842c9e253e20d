//! Reactive Primitives
//!
//! This module implements the dependency graph: refs, computeds, effects,
//! watchers and reactive collections. These primitives form the foundation
//! of weave's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Dependencies
//!
//! A Dependency is the set of computations that read one piece of state.
//! Reading state tracks its dependency; writing state triggers it, which
//! schedules every subscriber.
//!
//! ## Refs
//!
//! A Ref is a container for mutable state with one dependency. Reactive
//! lists and maps keep one dependency per index or key plus one for their
//! shape, so readers of one element are not disturbed by writes to another.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It is invalidated
//! synchronously when one of its dependencies changes and recomputes on the
//! next read.
//!
//! ## Effects and Watchers
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change. A Watcher runs a getter and calls back with the new
//! and old value when the result changes.
//!
//! # Implementation Notes
//!
//! The current computation lives on a thread-local stack. When a dependency
//! is tracked, we check if there is a current computation and, if so, record
//! the subscription in both directions.
//!
//! Triggered computations are not run in place. They go to the computation
//! batcher of the [`Runtime`], which runs every triggered computation once per
//! tick, unless the computation was given its own scheduler.

mod context;
mod deep;
mod dependency;
mod effect;
mod map;
mod memo;
mod notify;
mod property;
mod runtime;
mod signal;
mod subscriber;
mod vec;
mod watcher;

pub use context::{untracked, ReactiveContext};
pub use deep::Trackable;
pub use dependency::Dependency;
pub use effect::{Computation, ComputationOptions, Effect, WeakComputation};
pub use map::{ReactiveMap, KEYS_KEY};
pub use memo::{Computed, ComputedState};
pub use notify::{ChangeNotifier, ChangeObserver, ObserverId};
pub use property::PropertyTracker;
pub use runtime::{Notification, Runtime};
pub use signal::{Ref, VALUE_KEY};
pub use subscriber::{ComputationId, SchedulerFn};
pub use vec::{ReactiveVec, ITEMS_KEY};
pub use watcher::{Comparer, WatchOptions, Watcher};
