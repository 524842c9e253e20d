//! Batch Executors
//!
//! An executor decides *where* a drained batch runs. The batcher hands it a
//! self-contained job that already catches panics and reports its outcome,
//! so an executor only has to run the job once, somewhere.

use std::sync::Arc;

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs batch jobs.
///
/// An executor that drops a job without running it makes the batch fail.
pub trait BatchExecutor: Send + Sync + 'static {
    fn execute(&self, job: Job);

    /// Short name used in logs.
    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Runs the job directly on the drain task.
///
/// Only suitable for processors that never block.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl BatchExecutor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}

/// Runs the job on tokio's blocking thread pool.
///
/// This is the default: computation bodies may block on locks or do real
/// work, which must not stall the async workers driving the drain loops.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockingExecutor;

impl BatchExecutor for BlockingExecutor {
    fn execute(&self, job: Job) {
        tokio::task::spawn_blocking(job);
    }

    fn name(&self) -> &'static str {
        "blocking"
    }
}

/// Hands the job to an embedder-provided dispatcher, such as a UI thread's
/// message loop.
#[derive(Clone)]
pub struct CallbackExecutor {
    dispatch: Arc<dyn Fn(Job) + Send + Sync>,
}

impl CallbackExecutor {
    pub fn new<F>(dispatch: F) -> Self
    where
        F: Fn(Job) + Send + Sync + 'static,
    {
        Self {
            dispatch: Arc::new(dispatch),
        }
    }
}

impl BatchExecutor for CallbackExecutor {
    fn execute(&self, job: Job) {
        (self.dispatch)(job);
    }

    fn name(&self) -> &'static str {
        "callback"
    }
}

impl std::fmt::Debug for CallbackExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackExecutor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::mpsc;

    #[test]
    fn inline_runs_immediately() {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        InlineExecutor.execute(Box::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_receives_job() {
        let (tx, rx) = mpsc::channel::<Job>();
        let tx = parking_lot::Mutex::new(tx);
        let executor = CallbackExecutor::new(move |job| {
            tx.lock().send(job).unwrap();
        });

        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        executor.execute(Box::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        // Nothing runs until the "UI thread" pumps its queue.
        assert_eq!(count.load(Ordering::SeqCst), 0);
        rx.recv().unwrap()();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blocking_runs_on_pool() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        BlockingExecutor.execute(Box::new(move || {
            let _ = tx.send(std::thread::current().id());
        }));

        let worker = rx.await.unwrap();
        assert_ne!(worker, std::thread::current().id());
    }
}
