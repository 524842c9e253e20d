//! Subscriber identity.
//!
//! Every computation (effect, computed, watcher) gets a unique
//! [`ComputationId`] when created. Dependencies key their subscriber sets by
//! it, which is what makes subscriptions identity-based and deduplicated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::effect::Computation;

/// Unique identifier for a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComputationId(u64);

impl ComputationId {
    /// Generate a new unique ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ComputationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ComputationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "computation#{}", self.0)
    }
}

/// Custom scheduling policy for a computation.
///
/// When set, a triggered computation is handed to this callback instead of
/// the runtime's computation queue. The callback decides when (and whether)
/// to call [`Computation::execute`].
pub type SchedulerFn = Arc<dyn Fn(&Computation) + Send + Sync>;
