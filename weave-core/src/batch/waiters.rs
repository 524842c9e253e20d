//! Tick waiters.
//!
//! Callers of `flush` / `next_tick` wait for a target sequence number to be
//! processed. Waiters are keyed by target; when the watermark passes a
//! target, every waiter at or below it is resolved, failed if its target fell
//! inside a batch that failed.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{BatchError, BatchFailure};

pub(crate) type TickResult = Result<(), BatchError>;

pub(crate) enum Registration {
    Ready(TickResult),
    Pending(oneshot::Receiver<TickResult>),
}

#[derive(Default)]
struct WaiterState {
    pending: BTreeMap<u64, Vec<oneshot::Sender<TickResult>>>,
    /// Failed batches that may still contain pending targets.
    failures: VecDeque<Arc<BatchFailure>>,
    cancelled: bool,
}

#[derive(Default)]
pub(crate) struct Waiters {
    state: Mutex<WaiterState>,
}

impl Waiters {
    /// Register interest in `target`.
    ///
    /// The watermark is checked again after registering, under the same lock
    /// the resolver takes, so a batch finishing concurrently is never missed.
    pub(crate) fn register(&self, target: u64, watermark: &AtomicU64) -> Registration {
        let mut state = self.state.lock();
        if state.cancelled {
            return Registration::Ready(Err(BatchError::Cancelled));
        }

        let (tx, rx) = oneshot::channel();
        state.pending.entry(target).or_default().push(tx);

        if watermark.load(Ordering::Acquire) >= target {
            let outcome = Self::outcome_for(&state.failures, target);
            // Our sender is the last one pushed for this target.
            if let Some(senders) = state.pending.get_mut(&target) {
                senders.pop();
                if senders.is_empty() {
                    state.pending.remove(&target);
                }
            }
            return Registration::Ready(outcome);
        }

        Registration::Pending(rx)
    }

    /// Resolve every waiter whose target is at or below `watermark`.
    pub(crate) fn resolve(&self, watermark: u64, failure: Option<Arc<BatchFailure>>) {
        let mut state = self.state.lock();
        if let Some(failure) = failure {
            state.failures.push_back(failure);
        }

        let still_waiting = state.pending.split_off(&(watermark + 1));
        let ready = std::mem::replace(&mut state.pending, still_waiting);

        for (target, senders) in ready {
            let outcome = Self::outcome_for(&state.failures, target);
            for sender in senders {
                // The receiver may have given up already.
                let _ = sender.send(outcome.clone());
            }
        }

        state.failures.retain(|failure| failure.last_seq > watermark);
    }

    /// Cancel every outstanding waiter and refuse new ones.
    pub(crate) fn cancel_all(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        for (_, senders) in std::mem::take(&mut state.pending) {
            for sender in senders {
                let _ = sender.send(Err(BatchError::Cancelled));
            }
        }
        state.failures.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().pending.values().map(Vec::len).sum()
    }

    fn outcome_for(failures: &VecDeque<Arc<BatchFailure>>, target: u64) -> TickResult {
        match failures.iter().find(|failure| failure.contains(target)) {
            Some(failure) => Err(BatchError::Failed(Arc::clone(failure))),
            None => Ok(()),
        }
    }
}
