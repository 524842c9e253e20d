//! Task Batcher
//!
//! A [`TaskBatcher`] collects items from any number of threads and hands them
//! to a processor in batches.
//!
//! # How a Tick Works
//!
//! 1. `enqueue` assigns the item the next sequence number and appends it to
//!    the queue. If no drain loop is running, one is spawned; a single-winner
//!    flag guarantees there is never more than one.
//!
//! 2. The drain loop waits for the configured interval. The wait is cut short
//!    by `flush` while items are queued; a flush with nothing queued leaves
//!    later waits alone. A zero interval only yields, so items enqueued in the
//!    same tick still land in the same batch.
//!
//! 3. The whole queue is taken as one batch and handed to the executor.
//!
//! 4. When the batch completes, successfully or not, the processed watermark
//!    moves forward to the batch's last sequence number and every waiter at or
//!    below the watermark is resolved.
//!
//! # Consumers
//!
//! By default one batch runs at a time. With `max_consumers > 1` several
//! batches may run concurrently; the watermark then only advances through
//! batches that completed contiguously, so a waiter is never released before
//! its own item ran.
//!
//! # Hot Settings
//!
//! Interval and executor can be changed at any time. A wait or batch already
//! in progress keeps the value it started with.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Notify, Semaphore};

use super::executor::{BatchExecutor, BlockingExecutor};
use super::panic_message;
use super::waiters::{Registration, Waiters};
use crate::error::{BatchError, BatchFailure};

/// Error type returned by batch processors.
pub type ProcessorError = Box<dyn std::error::Error + Send + Sync>;

/// Processes one drained batch.
pub type BatchProcessor<T> = Arc<dyn Fn(Vec<T>) -> Result<(), ProcessorError> + Send + Sync>;

type FailureListener = Arc<dyn Fn(&BatchFailure) + Send + Sync>;

/// Construction options for a [`TaskBatcher`].
#[derive(Clone)]
pub struct BatcherOptions {
    /// Wait between the first pending item and the drain.
    pub interval: Duration,
    /// Where batches run.
    pub executor: Arc<dyn BatchExecutor>,
    /// Maximum number of batches running at once.
    pub max_consumers: usize,
}

impl Default for BatcherOptions {
    fn default() -> Self {
        Self {
            interval: Duration::ZERO,
            executor: Arc::new(BlockingExecutor),
            max_consumers: 1,
        }
    }
}

impl BatcherOptions {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_executor<E: BatchExecutor>(mut self, executor: E) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    pub fn with_max_consumers(mut self, max_consumers: usize) -> Self {
        self.max_consumers = max_consumers.max(1);
        self
    }
}

struct Queue<T> {
    items: Vec<T>,
    last_seq: u64,
}

struct InFlight {
    /// Running batches, first sequence number to last.
    batches: BTreeMap<u64, u64>,
    /// Last sequence number taken off the queue.
    drained: u64,
}

struct Shared<T> {
    name: Arc<str>,
    handle: Handle,
    processor: BatchProcessor<T>,

    queue: Mutex<Queue<T>>,
    /// Mirror of `queue.last_seq` for lock-free snapshots.
    enqueued: AtomicU64,
    in_flight: Mutex<InFlight>,
    /// Everything at or below this sequence number has been processed.
    watermark: AtomicU64,

    interval_nanos: AtomicU64,
    executor: RwLock<Arc<dyn BatchExecutor>>,
    consumers: Arc<Semaphore>,

    running: AtomicBool,
    disposed: AtomicBool,
    /// Set under the queue lock while queued items should skip the interval.
    /// Cleared when the queue is taken.
    flush_requested: AtomicBool,
    /// Wakes a loop parked in its interval wait. Never stores a permit.
    wake: Notify,

    waiters: Waiters,
    failure_listeners: RwLock<Vec<FailureListener>>,
}

/// A concurrent queue drained in sequence-numbered batches.
///
/// Cloning yields another handle to the same batcher.
pub struct TaskBatcher<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Clone for TaskBatcher<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> TaskBatcher<T> {
    /// Create a batcher whose drain loops run on `handle`.
    pub fn new<F>(name: impl Into<Arc<str>>, processor: F, options: BatcherOptions, handle: Handle) -> Self
    where
        F: Fn(Vec<T>) -> Result<(), ProcessorError> + Send + Sync + 'static,
    {
        let max_consumers = options.max_consumers.max(1);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                handle,
                processor: Arc::new(processor),
                queue: Mutex::new(Queue {
                    items: Vec::new(),
                    last_seq: 0,
                }),
                enqueued: AtomicU64::new(0),
                in_flight: Mutex::new(InFlight {
                    batches: BTreeMap::new(),
                    drained: 0,
                }),
                watermark: AtomicU64::new(0),
                interval_nanos: AtomicU64::new(duration_to_nanos(options.interval)),
                executor: RwLock::new(options.executor),
                consumers: Arc::new(Semaphore::new(max_consumers)),
                running: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                flush_requested: AtomicBool::new(false),
                wake: Notify::new(),
                waiters: Waiters::default(),
                failure_listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Create a batcher on the ambient tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn on_current_runtime<F>(name: impl Into<Arc<str>>, processor: F, options: BatcherOptions) -> Self
    where
        F: Fn(Vec<T>) -> Result<(), ProcessorError> + Send + Sync + 'static,
    {
        Self::new(name, processor, options, Handle::current())
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queue an item and return its sequence number.
    pub fn enqueue(&self, item: T) -> Result<u64, BatchError> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(BatchError::Disposed);
        }

        let seq = {
            let mut queue = self.shared.queue.lock();
            queue.last_seq += 1;
            queue.items.push(item);
            self.shared.enqueued.store(queue.last_seq, Ordering::Release);
            queue.last_seq
        };

        Shared::ensure_running(&self.shared);
        Ok(seq)
    }

    /// Drain immediately and wait until everything enqueued so far is processed.
    pub async fn flush(&self) -> Result<(), BatchError> {
        self.flush_with(std::future::pending()).await
    }

    /// Like [`flush`](Self::flush), abandoning the wait once `cancel` completes.
    pub async fn flush_with<C>(&self, cancel: C) -> Result<(), BatchError>
    where
        C: Future<Output = ()>,
    {
        let target = self.shared.enqueued.load(Ordering::Acquire);
        if target <= self.processed() {
            return Ok(());
        }
        if self.is_disposed() {
            return Err(BatchError::Disposed);
        }

        self.shared.request_drain();
        self.wait_for(target, cancel).await
    }

    /// Wait until everything enqueued so far is processed, without forcing a drain.
    pub async fn next_tick(&self) -> Result<(), BatchError> {
        self.next_tick_with(std::future::pending()).await
    }

    /// Like [`next_tick`](Self::next_tick), abandoning the wait once `cancel` completes.
    pub async fn next_tick_with<C>(&self, cancel: C) -> Result<(), BatchError>
    where
        C: Future<Output = ()>,
    {
        let target = self.shared.enqueued.load(Ordering::Acquire);
        if target <= self.processed() {
            return Ok(());
        }
        self.wait_for(target, cancel).await
    }

    /// Ask the drain loop to stop waiting and drain what is queued now. Does
    /// not wait, and does nothing when the queue is empty.
    pub fn request_flush(&self) {
        self.shared.request_drain();
    }

    async fn wait_for<C>(&self, target: u64, cancel: C) -> Result<(), BatchError>
    where
        C: Future<Output = ()>,
    {
        match self.shared.waiters.register(target, &self.shared.watermark) {
            Registration::Ready(outcome) => outcome,
            Registration::Pending(rx) => {
                tokio::pin!(cancel);
                tokio::select! {
                    outcome = rx => outcome.unwrap_or(Err(BatchError::Cancelled)),
                    _ = &mut cancel => Err(BatchError::Cancelled),
                }
            }
        }
    }

    /// Register a listener for failed batches.
    pub fn on_batch_failed<F>(&self, listener: F)
    where
        F: Fn(&BatchFailure) + Send + Sync + 'static,
    {
        self.shared.failure_listeners.write().push(Arc::new(listener));
    }

    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.shared.interval_nanos.load(Ordering::Acquire))
    }

    /// Change the interval. Applies from the next wait on.
    pub fn set_interval(&self, interval: Duration) {
        self.shared
            .interval_nanos
            .store(duration_to_nanos(interval), Ordering::Release);
    }

    /// Change the executor. Applies from the next batch on.
    pub fn set_executor<E: BatchExecutor>(&self, executor: E) {
        *self.shared.executor.write() = Arc::new(executor);
    }

    /// Last sequence number handed out.
    pub fn enqueued(&self) -> u64 {
        self.shared.enqueued.load(Ordering::Acquire)
    }

    /// Everything at or below this sequence number has been processed.
    pub fn processed(&self) -> u64 {
        self.shared.watermark.load(Ordering::Acquire)
    }

    /// Items waiting in the queue.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().items.len()
    }

    /// Number of callers waiting on a tick.
    pub fn waiting(&self) -> usize {
        self.shared.waiters.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Stop accepting work and cancel every waiter.
    ///
    /// Batches already handed to the executor are not awaited; flush first if
    /// that matters.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = std::mem::take(&mut self.shared.queue.lock().items).len();
        self.shared.wake.notify_waiters();
        self.shared.waiters.cancel_all();
        tracing::debug!(batcher = %self.shared.name, dropped, "batcher disposed");
    }
}

impl<T: Send + 'static> std::fmt::Debug for TaskBatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskBatcher")
            .field("name", &self.shared.name)
            .field("enqueued", &self.enqueued())
            .field("processed", &self.processed())
            .field("interval", &self.interval())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<T: Send + 'static> Shared<T> {
    fn ensure_running(this: &Arc<Self>) {
        if this
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            this.handle.spawn(Self::drain_loop(Arc::clone(this)));
        }
    }

    fn has_pending(&self) -> bool {
        !self.queue.lock().items.is_empty()
    }

    /// Cut the interval wait short for the items queued right now.
    fn request_drain(&self) {
        {
            let queue = self.queue.lock();
            if queue.items.is_empty() {
                return;
            }
            self.flush_requested.store(true, Ordering::Release);
        }
        self.wake.notify_waiters();
    }

    async fn drain_loop(this: Arc<Self>) {
        loop {
            while this.has_pending() && !this.disposed.load(Ordering::Acquire) {
                let interval = Duration::from_nanos(this.interval_nanos.load(Ordering::Acquire));
                if interval.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    // Registered before the flag check so a wake in between is not lost.
                    let woken = this.wake.notified();
                    tokio::pin!(woken);
                    woken.as_mut().enable();

                    if !this.flush_requested.load(Ordering::Acquire) && !this.disposed.load(Ordering::Acquire) {
                        tokio::select! {
                            _ = tokio::time::sleep(interval) => {}
                            _ = &mut woken => {}
                        }
                    }
                }

                if this.disposed.load(Ordering::Acquire) {
                    break;
                }

                let Ok(permit) = Arc::clone(&this.consumers).acquire_owned().await else {
                    break;
                };
                let Some((batch, first, last)) = this.take_batch() else {
                    continue;
                };

                tracing::debug!(
                    batcher = %this.name,
                    size = batch.len(),
                    first,
                    last,
                    "draining batch"
                );

                let (tx, rx) = oneshot::channel();
                let processor = Arc::clone(&this.processor);
                let job = Box::new(move || {
                    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| processor(batch))) {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(err)) => Err(err.to_string()),
                        Err(payload) => Err(panic_message(payload.as_ref())),
                    };
                    let _ = tx.send(outcome);
                });

                let executor = Arc::clone(&*this.executor.read());
                executor.execute(job);

                let shared = Arc::clone(&this);
                this.handle.spawn(async move {
                    let outcome = rx
                        .await
                        .unwrap_or_else(|_| Err("executor dropped the batch without running it".to_owned()));
                    drop(permit);
                    shared.complete(first, last, outcome);
                });
            }

            this.running.store(false, Ordering::Release);

            // An enqueue may have lost the race for `running` just before we cleared it.
            if this.disposed.load(Ordering::Acquire)
                || !this.has_pending()
                || this
                    .running
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
            {
                break;
            }
        }
    }

    fn take_batch(&self) -> Option<(Vec<T>, u64, u64)> {
        let mut queue = self.queue.lock();
        if queue.items.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut queue.items);
        let last = queue.last_seq;
        self.flush_requested.store(false, Ordering::Release);

        let mut in_flight = self.in_flight.lock();
        let first = in_flight.drained + 1;
        in_flight.drained = last;
        in_flight.batches.insert(first, last);
        Some((batch, first, last))
    }

    fn complete(&self, first: u64, last: u64, outcome: Result<(), String>) {
        let failure = outcome.err().map(|message| {
            Arc::new(BatchFailure {
                batcher: Arc::clone(&self.name),
                first_seq: first,
                last_seq: last,
                message: message.into(),
            })
        });

        if let Some(failure) = &failure {
            tracing::error!(
                batcher = %self.name,
                first,
                last,
                error = %failure.message,
                "batch failed"
            );
            let listeners = self.failure_listeners.read().clone();
            for listener in listeners {
                listener(failure);
            }
        }

        let reached = {
            let mut in_flight = self.in_flight.lock();
            in_flight.batches.remove(&first);
            match in_flight.batches.keys().next() {
                Some(&earliest) => earliest - 1,
                None => in_flight.drained,
            }
        };

        self.watermark.fetch_max(reached, Ordering::AcqRel);
        self.waiters
            .resolve(self.watermark.load(Ordering::Acquire), failure);
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
