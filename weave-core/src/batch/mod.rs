//! Batching Engine
//!
//! This module implements the generic engine that turns a stream of
//! individually enqueued items into ordered, awaitable batches.
//!
//! # Overview
//!
//! - [`TaskBatcher`] owns a concurrent queue and at most one drain loop.
//! - Every item gets a sequence number; a batch is "done" once the processed
//!   watermark passes its last sequence number.
//! - `flush` and `next_tick` let callers wait for their own writes to be
//!   processed, with optional cancellation.
//! - [`BatchExecutor`] decides where a batch runs: inline, on tokio's
//!   blocking pool, or on a dispatcher supplied by the embedder.
//!
//! The reactive [`Runtime`](crate::reactive::Runtime) builds its computation
//! and notification queues on top of this module, but nothing here knows
//! about reactivity.

mod batcher;
mod executor;
mod waiters;

pub use batcher::{BatchProcessor, BatcherOptions, ProcessorError, TaskBatcher};
pub use executor::{BatchExecutor, BlockingExecutor, CallbackExecutor, InlineExecutor, Job};

use std::any::Any;

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked with a non-string payload".to_owned()
    }
}
