//! Reactive Runtime
//!
//! The runtime is the scheduling facade that connects the dependency graph to
//! the batching engine. It owns two batchers:
//!
//! - **computations**: triggered computations, deduplicated per batch and run
//!   under their own lock. Default interval: zero, i.e. as soon as possible.
//! - **notifications**: deferred "property changed" notifications, coalesced
//!   per (owner, key) pair. Default interval: one frame.
//!
//! With `flush_notifications_after_computations` enabled (the default), each
//! completed computation batch asks the notification batcher to drain right
//! away, so observers see the post-recompute state without waiting a frame.
//!
//! # Registry
//!
//! Computations without a custom scheduler go to [`Runtime::current`]. That
//! is the runtime installed with [`Runtime::install`], or a default one
//! created lazily on first use. [`Runtime::shutdown`] tears it down.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;

use super::effect::Computation;
use super::subscriber::ComputationId;
use crate::batch::{panic_message, BatcherOptions, TaskBatcher};
use crate::config::RuntimeConfig;
use crate::error::{BatchError, ConfigError};

/// Upper bound on flush rounds when computations keep scheduling each other.
const MAX_FLUSH_ROUNDS: usize = 1024;

/// A deferred change notification.
pub struct Notification {
    /// Identity of the object that changed.
    pub owner: u64,
    /// Which part of it changed.
    pub key: Arc<str>,
    fire: Box<dyn FnOnce() + Send>,
}

impl Notification {
    pub fn new<F>(owner: u64, key: impl Into<Arc<str>>, fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            owner,
            key: key.into(),
            fire: Box::new(fire),
        }
    }
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notification")
            .field("owner", &self.owner)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// The scheduling facade.
pub struct Runtime {
    config: RuntimeConfig,
    handle: Handle,
    computations: TaskBatcher<Computation>,
    notifications: TaskBatcher<Notification>,
    executing: Arc<AtomicUsize>,
    /// Set when the runtime owns its tokio runtime.
    owned: Mutex<Option<tokio::runtime::Runtime>>,
}

static REGISTRY: OnceLock<RwLock<Option<Arc<Runtime>>>> = OnceLock::new();

fn get_registry() -> &'static RwLock<Option<Arc<Runtime>>> {
    REGISTRY.get_or_init(|| RwLock::new(None))
}

impl Runtime {
    /// Create a runtime with its own multi-threaded tokio runtime.
    pub fn new(config: RuntimeConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;

        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.thread_name("weave-worker").enable_all();
        if let Some(threads) = config.worker_threads {
            builder.worker_threads(threads);
        }
        let tokio_runtime = builder.build()?;
        let handle = tokio_runtime.handle().clone();

        Ok(Arc::new(Self::build(config, handle, Some(tokio_runtime))))
    }

    /// Create a runtime whose batchers run on an existing tokio runtime.
    pub fn with_handle(config: RuntimeConfig, handle: Handle) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        Ok(Arc::new(Self::build(config, handle, None)))
    }

    fn build(config: RuntimeConfig, handle: Handle, owned: Option<tokio::runtime::Runtime>) -> Self {
        let notifications = TaskBatcher::new(
            "notifications",
            run_notifications,
            BatcherOptions::default()
                .with_interval(config.notification_interval())
                .with_max_consumers(config.max_consumers),
            handle.clone(),
        );

        let executing = Arc::new(AtomicUsize::new(0));
        let computations = {
            let notifications = notifications.clone();
            let executing = Arc::clone(&executing);
            let flush_after = config.flush_notifications_after_computations;
            TaskBatcher::new(
                "computations",
                move |batch: Vec<Computation>| {
                    executing.fetch_add(1, Ordering::SeqCst);
                    let outcome = run_computations(batch);
                    executing.fetch_sub(1, Ordering::SeqCst);
                    if flush_after {
                        notifications.request_flush();
                    }
                    outcome
                },
                BatcherOptions::default()
                    .with_interval(config.computation_interval())
                    .with_max_consumers(config.max_consumers),
                handle.clone(),
            )
        };

        Self {
            config,
            handle,
            computations,
            notifications,
            executing,
            owned: Mutex::new(owned),
        }
    }

    /// The process-wide runtime, created with default settings on first use.
    ///
    /// # Panics
    ///
    /// Panics if the default worker runtime cannot be started.
    pub fn global() -> Arc<Runtime> {
        if let Some(runtime) = get_registry().read().as_ref() {
            return Arc::clone(runtime);
        }

        let mut registry = get_registry().write();
        if let Some(runtime) = registry.as_ref() {
            return Arc::clone(runtime);
        }
        let runtime = Runtime::new(RuntimeConfig::default())
            .expect("failed to start the default weave runtime");
        tracing::debug!("default runtime started");
        *registry = Some(Arc::clone(&runtime));
        runtime
    }

    /// The runtime computations are scheduled on.
    pub fn current() -> Arc<Runtime> {
        Self::global()
    }

    /// Make `runtime` the process-wide runtime, returning the previous one.
    pub fn install(runtime: Arc<Runtime>) -> Option<Arc<Runtime>> {
        get_registry().write().replace(runtime)
    }

    /// Dispose and remove the process-wide runtime.
    pub fn shutdown() {
        let previous = get_registry().write().take();
        if let Some(runtime) = previous {
            runtime.dispose();
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn computations(&self) -> &TaskBatcher<Computation> {
        &self.computations
    }

    pub fn notifications(&self) -> &TaskBatcher<Notification> {
        &self.notifications
    }

    /// Queue a triggered computation.
    pub fn schedule_computation(&self, computation: Computation) {
        let id = computation.id();
        if let Err(err) = self.computations.enqueue(computation) {
            tracing::warn!(computation = %id, %err, "dropping triggered computation");
        }
    }

    /// Queue a change notification for `(owner, key)`.
    pub fn notify_changed<F>(&self, owner: u64, key: impl Into<Arc<str>>, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let notification = Notification::new(owner, key, fire);
        if let Err(err) = self.notifications.enqueue(notification) {
            tracing::warn!(owner, %err, "dropping change notification");
        }
    }

    /// Whether a computation batch is running right now.
    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst) > 0
    }

    /// Run everything pending, including computations scheduled by other
    /// computations, then deliver pending notifications.
    pub async fn flush(&self) -> Result<(), BatchError> {
        for _ in 0..MAX_FLUSH_ROUNDS {
            self.computations.flush().await?;
            self.notifications.flush().await?;
            if self.computations.enqueued() <= self.computations.processed() {
                return Ok(());
            }
        }
        tracing::warn!(rounds = MAX_FLUSH_ROUNDS, "computations still pending after flush");
        Ok(())
    }

    /// Wait for the next computation tick without forcing it.
    pub async fn next_tick(&self) -> Result<(), BatchError> {
        self.computations.next_tick().await
    }

    /// [`flush`](Self::flush) for synchronous callers.
    ///
    /// # Panics
    ///
    /// Panics when called from inside an async context.
    pub fn flush_blocking(&self) -> Result<(), BatchError> {
        self.handle.block_on(self.flush())
    }

    /// Stop accepting work and cancel all waiters.
    pub fn dispose(&self) {
        self.computations.dispose();
        self.notifications.dispose();
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.dispose();
        if let Some(tokio_runtime) = self.owned.lock().take() {
            // Dropping a runtime from async code panics; don't wait for workers.
            tokio_runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("computations", &self.computations)
            .field("notifications", &self.notifications)
            .finish()
    }
}

/// Run a batch of computations, each once, isolating failures.
fn run_computations(batch: Vec<Computation>) -> Result<(), crate::batch::ProcessorError> {
    let unique: IndexMap<ComputationId, Computation> = batch
        .into_iter()
        .map(|computation| (computation.id(), computation))
        .collect();

    let mut failures = Vec::new();
    for (id, computation) in unique {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = computation.lock().lock()?;
            computation.execute();
            Ok::<(), crate::error::LockError>(())
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => failures.push(format!("{id}: {err}")),
            Err(payload) => failures.push(format!("{id} panicked: {}", panic_message(payload.as_ref()))),
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures.join("; ").into())
    }
}

/// Fire the first notification seen for every (owner, key) pair.
fn run_notifications(batch: Vec<Notification>) -> Result<(), crate::batch::ProcessorError> {
    let mut seen = HashSet::new();
    let mut failures = Vec::new();

    for notification in batch {
        if !seen.insert((notification.owner, Arc::clone(&notification.key))) {
            continue;
        }
        let key = Arc::clone(&notification.key);
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(notification.fire)) {
            failures.push(format!(
                "observer of `{key}` panicked: {}",
                panic_message(payload.as_ref())
            ));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures.join("; ").into())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn notifications_coalesce_per_owner_and_key() {
        let fired = Arc::new(PlMutex::new(Vec::new()));
        let batch: Vec<Notification> = [(1, "a", 1), (1, "a", 2), (1, "b", 3), (2, "a", 4)]
            .into_iter()
            .map(|(owner, key, tag)| {
                let fired = fired.clone();
                Notification::new(owner, key, move || fired.lock().push(tag))
            })
            .collect();

        run_notifications(batch).unwrap();
        assert_eq!(*fired.lock(), vec![1, 3, 4]);
    }

    #[test]
    fn computations_run_once_per_batch() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let computation = Computation::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        run_computations(vec![computation.clone(), computation.clone(), computation]).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn one_failing_computation_does_not_stop_the_batch() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let failing = Computation::new(|| panic!("bad computation"));
        let healthy = Computation::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        let err = run_computations(vec![failing, healthy]).unwrap_err();
        assert!(err.to_string().contains("bad computation"));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn owned_runtime_runs_scheduled_computations() {
        let runtime = Runtime::new(RuntimeConfig::default().with_worker_threads(2)).unwrap();
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let computation = Computation::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        runtime.schedule_computation(computation.clone());
        runtime.schedule_computation(computation);
        runtime.flush_blocking().unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!runtime.is_executing());
    }

    #[test]
    fn notifications_follow_computation_batches() {
        let runtime = Runtime::new(
            RuntimeConfig::default()
                .with_notification_interval(std::time::Duration::from_secs(30))
                .with_worker_threads(2),
        )
        .unwrap();

        let delivered = Arc::new(AtomicI32::new(0));
        let delivered_clone = delivered.clone();
        runtime.notify_changed(7, "value", move || {
            delivered_clone.fetch_add(1, Ordering::SeqCst);
        });
        runtime.schedule_computation(Computation::new(|| {}));

        // The computation batch forces the notification drain; the 30s
        // interval never elapses.
        let notifications = runtime.notifications().clone();
        runtime
            .handle()
            .block_on(async move {
                tokio::time::timeout(std::time::Duration::from_secs(5), notifications.next_tick()).await
            })
            .expect("notification drained early")
            .unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notifications_keep_their_interval_when_not_forced() {
        let runtime = Runtime::new(
            RuntimeConfig::default()
                .with_notification_interval(std::time::Duration::from_secs(30))
                .with_flush_notifications_after_computations(false)
                .with_worker_threads(2),
        )
        .unwrap();

        let delivered = Arc::new(AtomicI32::new(0));
        let delivered_clone = delivered.clone();
        runtime.notify_changed(7, "value", move || {
            delivered_clone.fetch_add(1, Ordering::SeqCst);
        });
        runtime.schedule_computation(Computation::new(|| {}));

        let computations = runtime.computations().clone();
        let notifications = runtime.notifications().clone();
        let early = runtime.handle().block_on(async move {
            computations.flush().await.unwrap();
            tokio::time::timeout(std::time::Duration::from_millis(300), notifications.next_tick()).await
        });

        assert!(early.is_err());
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert_eq!(runtime.notifications().pending(), 1);
        runtime.dispose();
    }

    #[test]
    fn idle_computation_batch_keeps_the_notification_window() {
        let runtime = Runtime::new(
            RuntimeConfig::default()
                .with_notification_interval(std::time::Duration::from_secs(1))
                .with_worker_threads(2),
        )
        .unwrap();

        // Nothing to deliver yet, so the forced drain has nothing to cut short.
        runtime.schedule_computation(Computation::new(|| {}));
        let computations = runtime.computations().clone();
        runtime.handle().block_on(async move { computations.flush().await }).unwrap();

        let fired = Arc::new(PlMutex::new(Vec::new()));
        for tag in [1, 2] {
            let fired = fired.clone();
            runtime.notify_changed(7, "value", move || fired.lock().push(tag));
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        assert!(fired.lock().is_empty());

        let notifications = runtime.notifications().clone();
        runtime
            .handle()
            .block_on(async move {
                tokio::time::timeout(std::time::Duration::from_secs(5), notifications.next_tick()).await
            })
            .expect("notification window never closed")
            .unwrap();
        assert_eq!(*fired.lock(), vec![1]);
        runtime.dispose();
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = Runtime::new(RuntimeConfig::default().with_max_consumers(0)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
