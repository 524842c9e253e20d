//! Weave Core
//!
//! This crate provides a fine-grained, multi-threaded reactive runtime.
//! It implements:
//!
//! - Reactive primitives (refs, computeds, effects, watchers, collections)
//! - A batching engine that turns individual writes into ordered ticks
//! - A reentrant, cancellable lock shared by sync and async code
//! - List synchronization with minimal edit plans
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Dependency tracking, reactive primitives and the [`Runtime`]
//!   that schedules triggered computations
//! - `batch`: The generic [`TaskBatcher`] behind the runtime's queues
//! - `lock`: [`AsyncLock`], reentrant through explicit scopes
//! - `diff`: Keyed and unkeyed synchronization of lists
//! - `config` and `error`: Runtime settings and the error taxonomy
//!
//! # Example
//!
//! ```rust,ignore
//! use weave_core::reactive::{Computed, Effect, Ref, Runtime};
//!
//! // Create a ref
//! let count = Ref::new(0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = Computed::new(move || c.get() * 2);
//!
//! // Create an effect
//! let (c, d) = (count.clone(), doubled.clone());
//! let _effect = Effect::new(move || {
//!     println!("Count: {}, Doubled: {}", c.get(), d.get());
//! });
//!
//! // Update the ref
//! count.set(5);
//! assert_eq!(doubled.get(), 10);
//!
//! // The effect re-runs on the next computation tick
//! Runtime::global().flush().await?;
//! // prints: "Count: 5, Doubled: 10"
//! ```

pub mod batch;
pub mod config;
pub mod diff;
pub mod error;
pub mod lock;
pub mod reactive;

pub use batch::{BatcherOptions, TaskBatcher};
pub use config::RuntimeConfig;
pub use diff::{
    plan_keyed, plan_unkeyed, plan_unkeyed_by, sync_keyed, sync_unkeyed, sync_unkeyed_by, Edit, ListEditor,
    SyncReport,
};
pub use error::{Error, Result};
pub use lock::{AsyncLock, LockGuard, LockScope};
pub use reactive::{Computed, Effect, ReactiveMap, ReactiveVec, Ref, Runtime, WatchOptions, Watcher};
