//! Bounded-concurrency job queue.
//!
//! A [`Queue`] holds an ordered list of [`Job`]s, runs up to a configured
//! number of them at once, optionally times each one out, and reports
//! outcomes through listeners.
//!
//! # Architecture
//!
//! - `Queue` - the job store, dispatch loop and lifecycle (`start`, `stop`, `end`)
//! - `Job` - a unit of work that completes through a callback or a future
//! - `Completion` - the once-only, session-scoped callback handed to each job
//! - `Notification` - what listeners receive (`success`, `error`, `timeout`, `end`)
//!
//! Every drain or `end` advances the queue's session. A completion only
//! counts if it arrives in the session its job was dispatched in, so work
//! that outlives an `end` is ignored.
//!
//! # Usage
//!
//! ```ignore
//! use scheduler::{Job, Queue, QueueConfig};
//!
//! let queue = Queue::new(QueueConfig::default().with_concurrency(2).with_results(true));
//! queue.push(Job::future(|| async { Ok(10) }));
//! queue.push(Job::callback(|done| done.resolve(20)));
//!
//! let results = queue.run().await?;
//! assert_eq!(results, Some(vec![Some(10), Some(20)]));
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

mod completion;
mod job;
mod listeners;
mod ops;
mod queue;
mod timers;

pub use completion::Completion;
pub use job::{Job, JobReturn};
pub use listeners::{EventKind, ListenerId, Notification};
pub use queue::{Queue, Results};

/// Re-export core types for convenience.
pub use queue_core::{
    ConfigError, JobError, JobEvent, JobId, QueueConfig, QueueId, QueueState, QueueStats,
};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
