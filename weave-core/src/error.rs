//! Error types for the Weave runtime.
//!
//! Errors fall into three groups:
//!
//! - **Misuse**: reentering a released lock scope, using a scope from another
//!   lock, writing a read-only computed, duplicate keys while synchronizing a
//!   list, enqueuing on a disposed batcher. These are returned synchronously.
//! - **Batch failures**: a computation body or batch processor failed. These
//!   are caught at the batch boundary and delivered to tick waiters and
//!   failure listeners.
//! - **Cancellation**: a caller abandoned its own wait. Never a failure.

use std::sync::Arc;

use thiserror::Error;

/// Errors raised by [`AsyncLock`](crate::lock::AsyncLock) and its scopes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The scope was already fully released and cannot be reentered.
    #[error("lock scope has already been released")]
    ScopeReleased,

    /// The scope belongs to a different lock instance.
    #[error("lock scope belongs to a different lock")]
    ForeignScope,

    /// A scope was released more times than it was entered.
    #[error("lock scope released more times than it was entered")]
    DoubleRelease,

    /// The caller abandoned the wait.
    #[error("lock acquisition was cancelled")]
    Cancelled,
}

/// Details of a failed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Name of the batcher that ran the batch.
    pub batcher: Arc<str>,
    /// First sequence number contained in the batch.
    pub first_seq: u64,
    /// Last sequence number contained in the batch.
    pub last_seq: u64,
    /// Human readable failure description.
    pub message: Arc<str>,
}

impl BatchFailure {
    /// Whether the given sequence number belongs to this batch.
    pub fn contains(&self, seq: u64) -> bool {
        (self.first_seq..=self.last_seq).contains(&seq)
    }
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "batch {}..={} of `{}` failed: {}",
            self.first_seq, self.last_seq, self.batcher, self.message
        )
    }
}

/// Errors raised by [`TaskBatcher`](crate::batch::TaskBatcher).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// The batcher was disposed.
    #[error("batcher has been disposed")]
    Disposed,

    /// The caller abandoned the wait, or the batcher was disposed while waiting.
    #[error("wait was cancelled")]
    Cancelled,

    /// The batch containing the awaited sequence number failed.
    #[error("{0}")]
    Failed(Arc<BatchFailure>),
}

/// Errors raised by [`Computed`](crate::reactive::Computed).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputedError {
    /// `set` was called on a computed without a setter.
    #[error("computed value is read-only")]
    ReadOnly,

    /// The getter read its own value before a first value existed.
    #[error("computed value depends on itself")]
    Cycle,

    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Which side of a synchronization a duplicate key was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSide {
    Current,
    Target,
}

impl std::fmt::Display for SyncSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncSide::Current => f.write_str("current"),
            SyncSide::Target => f.write_str("target"),
        }
    }
}

/// Errors raised by the list synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("duplicate key at index {index} of the {side} sequence")]
    DuplicateKey { index: usize, side: SyncSide },
}

/// Errors raised while loading a [`RuntimeConfig`](crate::config::RuntimeConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid runtime configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid runtime configuration: {0}")]
    Invalid(&'static str),

    #[error("failed to start worker runtime: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Computed(#[from] ComputedError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_failure_contains_its_range() {
        let failure = BatchFailure {
            batcher: "test".into(),
            first_seq: 3,
            last_seq: 7,
            message: "boom".into(),
        };

        assert!(!failure.contains(2));
        assert!(failure.contains(3));
        assert!(failure.contains(7));
        assert!(!failure.contains(8));
        assert_eq!(failure.to_string(), "batch 3..=7 of `test` failed: boom");
    }

    #[test]
    fn errors_convert_into_top_level() {
        let err: Error = LockError::ScopeReleased.into();
        assert!(matches!(err, Error::Lock(LockError::ScopeReleased)));

        let err: Error = SyncError::DuplicateKey { index: 2, side: SyncSide::Target }.into();
        assert_eq!(err.to_string(), "duplicate key at index 2 of the target sequence");
    }
}
