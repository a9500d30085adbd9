//! The completion handle passed to every dispatched job.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use queue_core::JobError;

use crate::job::Job;
use crate::lock;
use crate::queue::Shared;
use crate::timers::TimerId;

/// How a dispatch finished.
pub(crate) enum Outcome<T> {
    Value(T),
    Empty,
    Failed(JobError),
}

/// Bookkeeping for one dispatch of one job.
///
/// The flags are only read and written while the queue state lock is held;
/// the atomics just make them shareable.
pub(crate) struct Dispatch<T> {
    pub(crate) job: Job<T>,
    pub(crate) session: u64,
    pub(crate) slot: Option<usize>,
    pub(crate) started_at: DateTime<Utc>,
    settled: AtomicBool,
    timed_out: AtomicBool,
    timer: Mutex<Option<TimerId>>,
}

impl<T> Dispatch<T> {
    pub(crate) fn new(job: Job<T>, session: u64, slot: Option<usize>) -> Self {
        Self {
            job,
            session,
            slot,
            started_at: Utc::now(),
            settled: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            timer: Mutex::new(None),
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_settled(&self) {
        self.settled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_timed_out(&self) {
        self.timed_out.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_timer(&self, id: TimerId) {
        *lock(&self.timer) = Some(id);
    }

    pub(crate) fn take_timer(&self) -> Option<TimerId> {
        lock(&self.timer).take()
    }

    pub(crate) fn duration_ms(&self) -> u64 {
        u64::try_from((Utc::now() - self.started_at).num_milliseconds()).unwrap_or(0)
    }
}

/// Callback a job uses to report its outcome.
///
/// It may be cloned and called any number of times; only the first call made
/// while the queue is still in the session the job was dispatched in has any
/// effect. Later calls, and calls after the queue was ended, are ignored.
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
    dispatch: Arc<Dispatch<T>>,
}

impl<T: Clone + Send + 'static> Completion<T> {
    pub(crate) fn new(shared: Arc<Shared<T>>, dispatch: Arc<Dispatch<T>>) -> Self {
        Self { shared, dispatch }
    }

    /// Complete the job with a value.
    pub fn resolve(&self, value: T) {
        self.settle(Outcome::Value(value));
    }

    /// Complete the job with an error.
    pub fn reject(&self, error: JobError) {
        self.settle(Outcome::Failed(error));
    }

    /// Complete the job successfully without a value.
    pub fn finish(&self) {
        self.settle(Outcome::Empty);
    }

    /// Complete the job from a `Result`.
    pub fn complete(&self, result: Result<T, JobError>) {
        match result {
            Ok(value) => self.resolve(value),
            Err(error) => self.reject(error),
        }
    }

    /// Whether this dispatch has already been completed.
    pub fn is_settled(&self) -> bool {
        self.dispatch.is_settled()
    }

    /// The session this dispatch belongs to.
    pub fn session(&self) -> u64 {
        self.dispatch.session
    }

    /// The job being completed.
    pub fn job(&self) -> &Job<T> {
        &self.dispatch.job
    }

    pub(crate) fn dispatch(&self) -> &Arc<Dispatch<T>> {
        &self.dispatch
    }

    pub(crate) fn expire(&self, timer: TimerId) {
        self.shared.expire(self, timer);
    }

    fn settle(&self, outcome: Outcome<T>) {
        self.shared.settle(&self.dispatch, outcome);
    }
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            dispatch: Arc::clone(&self.dispatch),
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("job", &self.dispatch.job)
            .field("session", &self.dispatch.session)
            .field("settled", &self.dispatch.is_settled())
            .finish()
    }
}
