//! Job descriptors.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use queue_core::{JobError, JobId};

use crate::completion::Completion;

/// What a job hands back when it is invoked.
pub enum JobReturn<T> {
    /// The job will call its [`Completion`] itself.
    Callback,
    /// The queue drives this future and completes the job with its output.
    Future(BoxFuture<'static, Result<T, JobError>>),
}

impl<T> JobReturn<T> {
    /// Box a future as a job return value.
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, JobError>> + Send + 'static,
    {
        JobReturn::Future(future.boxed())
    }
}

impl<T> fmt::Debug for JobReturn<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobReturn::Callback => f.write_str("JobReturn::Callback"),
            JobReturn::Future(_) => f.write_str("JobReturn::Future(..)"),
        }
    }
}

type RunFn<T> = dyn Fn(Completion<T>) -> JobReturn<T> + Send + Sync;

/// A unit of deferred work.
///
/// Cloning is cheap and keeps the same [`JobId`], so clones compare equal and
/// can be looked up with `index_of`.
pub struct Job<T> {
    id: JobId,
    label: Option<Arc<str>>,
    run: Arc<RunFn<T>>,
}

impl<T> Job<T> {
    /// Create a job from a function that may either complete through the
    /// callback or return a future.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(Completion<T>) -> JobReturn<T> + Send + Sync + 'static,
    {
        Self {
            id: JobId::new(),
            label: None,
            run: Arc::new(run),
        }
    }

    /// Create a job that reports through its completion callback.
    pub fn callback<F>(run: F) -> Self
    where
        F: Fn(Completion<T>) + Send + Sync + 'static,
    {
        Self::new(move |done| {
            run(done);
            JobReturn::Callback
        })
    }

    /// Create a job from an async function.
    pub fn future<F, Fut>(run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, JobError>> + Send + 'static,
    {
        Self::new(move |_done| JobReturn::future(run()))
    }

    /// Attach a human-readable label used in logs.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(Arc::from(label.into()));
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn invoke(&self, done: Completion<T>) -> JobReturn<T> {
        (self.run)(done)
    }
}

impl<T> Clone for Job<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            label: self.label.clone(),
            run: Arc::clone(&self.run),
        }
    }
}

impl<T> PartialEq for Job<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Job<T> {}

impl<T> fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{} ({})", label, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}
