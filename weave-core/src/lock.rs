//! Reentrant Lock
//!
//! [`AsyncLock`] is a binary lock that can be acquired from both blocking and
//! async call paths, and reentered by whoever holds a [`LockScope`] for it.
//!
//! # How Scopes Work
//!
//! Acquiring the lock returns a fresh scope with a reference count of 1.
//! Passing that scope back into `enter` increments the count instead of
//! waiting, so the same logical call chain can nest acquisitions. Each
//! `release` decrements the count; the lock is physically released exactly
//! once, when the count reaches 0. A scope that reached 0 is dead: it cannot
//! be reentered, and releasing it again is rejected.
//!
//! ```rust,ignore
//! let lock = AsyncLock::new();
//! let scope = lock.enter(None)?;
//! lock.enter(Some(&scope))?;
//! scope.release()?;
//! assert!(scope.is_held());
//! scope.release()?;
//! assert!(!scope.is_held());
//! ```
//!
//! # Thread Affinity
//!
//! Scopes are plain values and carry no thread identity. [`AsyncLock::lock`]
//! adds a thread-local record of held scopes on top, so that synchronous code
//! which does not pass scopes around (such as a computed value reading itself
//! while recomputing) still reenters instead of deadlocking.

use std::cell::RefCell;
use std::future::Future;
use std::sync::atomic::{AtomicIsize, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::error::LockError;

static LOCK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static HELD_SCOPES: RefCell<Vec<LockScope>> = const { RefCell::new(Vec::new()) };
}

struct LockInner {
    id: u64,
    locked: Mutex<bool>,
    /// Wakes blocking waiters.
    released: Condvar,
    /// Wakes async waiters.
    notify: Notify,
}

impl LockInner {
    fn try_acquire(&self) -> bool {
        let mut locked = self.locked.lock();
        if *locked {
            false
        } else {
            *locked = true;
            true
        }
    }

    fn acquire_blocking(&self) {
        let mut locked = self.locked.lock();
        while *locked {
            self.released.wait(&mut locked);
        }
        *locked = true;
    }

    async fn acquire_async<C>(&self, cancel: C) -> Result<(), LockError>
    where
        C: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed.
            notified.as_mut().enable();

            if self.try_acquire() {
                return Ok(());
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = &mut cancel => return Err(LockError::Cancelled),
            }
        }
    }

    fn release(&self) {
        *self.locked.lock() = false;
        self.released.notify_one();
        self.notify.notify_one();
    }
}

/// A reentrant lock usable from blocking and async code.
///
/// Cloning an `AsyncLock` yields another handle to the same lock.
#[derive(Clone)]
pub struct AsyncLock {
    inner: Arc<LockInner>,
}

impl AsyncLock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LockInner {
                id: LOCK_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                locked: Mutex::new(false),
                released: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Unique identifier of this lock.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether any scope currently holds the lock.
    pub fn is_locked(&self) -> bool {
        *self.inner.locked.lock()
    }

    /// Acquire the lock, blocking the current thread, or reenter `existing`.
    pub fn enter(&self, existing: Option<&LockScope>) -> Result<LockScope, LockError> {
        if let Some(scope) = existing {
            return self.reenter(scope);
        }
        self.inner.acquire_blocking();
        Ok(self.fresh_scope())
    }

    /// Acquire the lock asynchronously, or reenter `existing`.
    pub async fn enter_async(&self, existing: Option<&LockScope>) -> Result<LockScope, LockError> {
        self.enter_async_with(existing, std::future::pending()).await
    }

    /// Like [`enter_async`](Self::enter_async), giving up with
    /// [`LockError::Cancelled`] once `cancel` completes.
    pub async fn enter_async_with<C>(
        &self,
        existing: Option<&LockScope>,
        cancel: C,
    ) -> Result<LockScope, LockError>
    where
        C: Future<Output = ()>,
    {
        if let Some(scope) = existing {
            return self.reenter(scope);
        }
        self.inner.acquire_async(cancel).await?;
        Ok(self.fresh_scope())
    }

    /// Acquire the lock or reenter `existing` without waiting.
    ///
    /// Returns `Ok(None)` when the lock is held by someone else.
    pub fn try_enter(&self, existing: Option<&LockScope>) -> Result<Option<LockScope>, LockError> {
        if let Some(scope) = existing {
            return self.reenter(scope).map(Some);
        }
        if self.inner.try_acquire() {
            Ok(Some(self.fresh_scope()))
        } else {
            Ok(None)
        }
    }

    /// Acquire the lock for the current thread and return an RAII guard.
    ///
    /// If this thread already holds a scope of this lock (through another
    /// guard returned by `lock`), that scope is reentered instead.
    pub fn lock(&self) -> Result<LockGuard, LockError> {
        let scope = match self.held_by_current_thread() {
            Some(scope) => self.reenter(&scope)?,
            None => self.enter(None)?,
        };
        HELD_SCOPES.with(|held| held.borrow_mut().push(scope.clone()));
        Ok(LockGuard {
            scope,
            thread_bound: true,
        })
    }

    /// Acquire the lock asynchronously and return an RAII guard.
    ///
    /// Async guards are not recorded per thread, since the task may resume on
    /// another worker.
    pub async fn lock_async(&self) -> Result<LockGuard, LockError> {
        let scope = self.enter_async(None).await?;
        Ok(LockGuard {
            scope,
            thread_bound: false,
        })
    }

    fn held_by_current_thread(&self) -> Option<LockScope> {
        HELD_SCOPES.with(|held| {
            held.borrow()
                .iter()
                .rev()
                .find(|scope| Arc::ptr_eq(&scope.inner.lock, &self.inner))
                .cloned()
        })
    }

    fn reenter(&self, scope: &LockScope) -> Result<LockScope, LockError> {
        if !Arc::ptr_eq(&scope.inner.lock, &self.inner) {
            return Err(LockError::ForeignScope);
        }

        let mut current = scope.inner.count.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                return Err(LockError::ScopeReleased);
            }
            match scope.inner.count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(scope.clone()),
                Err(actual) => current = actual,
            }
        }
    }

    fn fresh_scope(&self) -> LockScope {
        LockScope {
            inner: Arc::new(ScopeInner {
                lock: Arc::clone(&self.inner),
                count: AtomicIsize::new(1),
            }),
        }
    }
}

impl Default for AsyncLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AsyncLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncLock")
            .field("id", &self.inner.id)
            .field("locked", &self.is_locked())
            .finish()
    }
}

struct ScopeInner {
    lock: Arc<LockInner>,
    count: AtomicIsize,
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        // Every handle to a live scope is gone; nobody can release it anymore.
        if self.count.load(Ordering::Acquire) > 0 {
            tracing::warn!(lock = self.lock.id, "lock scope dropped while held, releasing");
            self.lock.release();
        }
    }
}

/// Reference-counted ownership of an [`AsyncLock`].
///
/// Clones share the same count.
#[derive(Clone)]
pub struct LockScope {
    inner: Arc<ScopeInner>,
}

impl LockScope {
    /// Decrement the count, releasing the lock when it reaches 0.
    pub fn release(&self) -> Result<(), LockError> {
        let previous = self.inner.count.fetch_sub(1, Ordering::AcqRel);
        if previous <= 0 {
            self.inner.count.fetch_add(1, Ordering::AcqRel);
            return Err(LockError::DoubleRelease);
        }
        if previous == 1 {
            self.inner.lock.release();
        }
        Ok(())
    }

    /// Whether this scope still owns the lock.
    pub fn is_held(&self) -> bool {
        self.inner.count.load(Ordering::Acquire) > 0
    }

    /// Current reentry depth.
    pub fn depth(&self) -> usize {
        self.inner.count.load(Ordering::Acquire).max(0) as usize
    }

    /// Id of the lock this scope belongs to.
    pub fn lock_id(&self) -> u64 {
        self.inner.lock.id
    }
}

impl std::fmt::Debug for LockScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockScope")
            .field("lock", &self.inner.lock.id)
            .field("depth", &self.depth())
            .finish()
    }
}

/// Releases one level of a [`LockScope`] when dropped.
pub struct LockGuard {
    scope: LockScope,
    thread_bound: bool,
}

impl LockGuard {
    /// The scope this guard holds a level of. Pass it to `enter` to nest.
    pub fn scope(&self) -> &LockScope {
        &self.scope
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.thread_bound {
            HELD_SCOPES.with(|held| {
                let mut held = held.borrow_mut();
                if let Some(pos) = held
                    .iter()
                    .rposition(|scope| Arc::ptr_eq(&scope.inner, &self.scope.inner))
                {
                    held.remove(pos);
                }
            });
        }
        if let Err(err) = self.scope.release() {
            tracing::warn!(lock = self.scope.lock_id(), %err, "lock guard released a dead scope");
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::time::Duration;

    #[test]
    fn two_enters_need_two_releases() {
        let lock = AsyncLock::new();
        let scope = lock.enter(None).unwrap();
        lock.enter(Some(&scope)).unwrap();

        scope.release().unwrap();
        assert!(scope.is_held());
        assert!(lock.is_locked());

        scope.release().unwrap();
        assert!(!scope.is_held());
        assert!(!lock.is_locked());
    }

    #[test]
    fn released_scope_cannot_be_reentered() {
        let lock = AsyncLock::new();
        let scope = lock.enter(None).unwrap();
        scope.release().unwrap();

        assert_eq!(lock.enter(Some(&scope)).unwrap_err(), LockError::ScopeReleased);
        assert_eq!(lock.try_enter(Some(&scope)).unwrap_err(), LockError::ScopeReleased);
    }

    #[test]
    fn double_release_is_rejected() {
        let lock = AsyncLock::new();
        let scope = lock.enter(None).unwrap();
        scope.release().unwrap();

        assert_eq!(scope.release().unwrap_err(), LockError::DoubleRelease);
        assert_eq!(scope.depth(), 0);

        // The lock is free and a new scope works normally.
        let next = lock.try_enter(None).unwrap().expect("lock should be free");
        next.release().unwrap();
    }

    #[test]
    fn foreign_scope_is_rejected() {
        let a = AsyncLock::new();
        let b = AsyncLock::new();
        let scope = a.enter(None).unwrap();

        assert_eq!(b.enter(Some(&scope)).unwrap_err(), LockError::ForeignScope);
        scope.release().unwrap();
    }

    #[test]
    fn try_enter_fails_while_held() {
        let lock = AsyncLock::new();
        let scope = lock.enter(None).unwrap();

        assert!(lock.try_enter(None).unwrap().is_none());

        scope.release().unwrap();
        let scope = lock.try_enter(None).unwrap().expect("lock should be free");
        scope.release().unwrap();
    }

    #[test]
    fn guard_reenters_on_same_thread() {
        let lock = AsyncLock::new();
        let outer = lock.lock().unwrap();
        {
            let inner = lock.lock().unwrap();
            assert_eq!(inner.scope().depth(), 2);
        }
        assert_eq!(outer.scope().depth(), 1);
        drop(outer);
        assert!(!lock.is_locked());
    }

    #[test]
    fn blocking_enter_excludes_other_threads() {
        let lock = AsyncLock::new();
        let inside = Arc::new(AtomicI32::new(0));
        let max_inside = Arc::new(AtomicI32::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let scope = lock.enter(None).unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        scope.release().unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_last_handle_of_held_scope_releases() {
        let lock = AsyncLock::new();
        let scope = lock.enter(None).unwrap();
        drop(scope);
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn async_enter_waits_for_release() {
        let lock = AsyncLock::new();
        let scope = lock.enter(None).unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move {
                let scope = lock.enter_async(None).await.unwrap();
                scope.release().unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        scope.release().unwrap();
        waiter.await.unwrap();
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn async_enter_can_be_cancelled() {
        let lock = AsyncLock::new();
        let scope = lock.enter(None).unwrap();

        let result = lock
            .enter_async_with(None, tokio::time::sleep(Duration::from_millis(10)))
            .await;
        assert_eq!(result.unwrap_err(), LockError::Cancelled);

        // Cancelling did not disturb the holder.
        assert!(scope.is_held());
        scope.release().unwrap();
    }

    #[tokio::test]
    async fn async_reenter_uses_existing_scope() {
        let lock = AsyncLock::new();
        let scope = lock.enter_async(None).await.unwrap();
        let again = lock.enter_async(Some(&scope)).await.unwrap();
        assert_eq!(again.depth(), 2);
        again.release().unwrap();
        scope.release().unwrap();
        assert!(!lock.is_locked());
    }
}
