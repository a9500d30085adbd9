//! Publish/subscribe registry for queue notifications.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use queue_core::JobError;

use crate::completion::Completion;
use crate::job::Job;
use crate::lock;

/// The kinds of notification a queue emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Success,
    Error,
    Timeout,
    End,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Success => write!(f, "success"),
            EventKind::Error => write!(f, "error"),
            EventKind::Timeout => write!(f, "timeout"),
            EventKind::End => write!(f, "end"),
        }
    }
}

/// A notification delivered to listeners.
pub enum Notification<T> {
    /// A job completed without an error. `value` is `None` when the job
    /// finished without producing one.
    Success { value: Option<T>, job: Job<T> },
    /// A job completed with an error.
    Error { error: JobError, job: Job<T> },
    /// A job's timer fired. The listener owns the decision and must
    /// eventually call the completion.
    Timeout { completion: Completion<T>, job: Job<T> },
    /// The queue drained or was ended.
    End { error: Option<JobError> },
}

impl<T> Notification<T> {
    pub fn kind(&self) -> EventKind {
        match self {
            Notification::Success { .. } => EventKind::Success,
            Notification::Error { .. } => EventKind::Error,
            Notification::Timeout { .. } => EventKind::Timeout,
            Notification::End { .. } => EventKind::End,
        }
    }

    /// The job this notification is about, if any.
    pub fn job(&self) -> Option<&Job<T>> {
        match self {
            Notification::Success { job, .. }
            | Notification::Error { job, .. }
            | Notification::Timeout { job, .. } => Some(job),
            Notification::End { .. } => None,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Notification<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Success { value, job } => f
                .debug_struct("Success")
                .field("value", value)
                .field("job", job)
                .finish(),
            Notification::Error { error, job } => f
                .debug_struct("Error")
                .field("error", error)
                .field("job", job)
                .finish(),
            Notification::Timeout { job, .. } => {
                f.debug_struct("Timeout").field("job", job).finish_non_exhaustive()
            }
            Notification::End { error } => f.debug_struct("End").field("error", error).finish(),
        }
    }
}

/// Handle returned when registering a listener, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub(crate) type Listener<T> = Arc<dyn Fn(&Notification<T>) + Send + Sync>;

struct Entry<T> {
    id: ListenerId,
    once: bool,
    callback: Listener<T>,
}

struct Registry<T> {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<Entry<T>>>,
}

/// Listeners keyed by event kind, delivered in registration order.
pub(crate) struct Listeners<T> {
    registry: Mutex<Registry<T>>,
}

impl<T> Listeners<T> {
    pub(crate) fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                next_id: 0,
                by_kind: HashMap::new(),
            }),
        }
    }

    pub(crate) fn add(&self, kind: EventKind, once: bool, callback: Listener<T>) -> ListenerId {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry
            .by_kind
            .entry(kind)
            .or_default()
            .push(Entry { id, once, callback });
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut registry = lock(&self.registry);
        for entries in registry.by_kind.values_mut() {
            if let Some(pos) = entries.iter().position(|e| e.id == id) {
                entries.remove(pos);
                return true;
            }
        }
        false
    }

    pub(crate) fn count(&self, kind: EventKind) -> usize {
        lock(&self.registry)
            .by_kind
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Deliver a notification. Returns how many listeners received it.
    ///
    /// The registry lock is released before any callback runs; `once`
    /// entries are unregistered first so a listener can never see the same
    /// registration twice.
    pub(crate) fn emit(&self, notification: &Notification<T>) -> usize {
        let callbacks: Vec<Listener<T>> = {
            let mut registry = lock(&self.registry);
            match registry.by_kind.get_mut(&notification.kind()) {
                Some(entries) => {
                    let callbacks = entries.iter().map(|e| Arc::clone(&e.callback)).collect();
                    entries.retain(|e| !e.once);
                    callbacks
                }
                None => Vec::new(),
            }
        };

        for callback in &callbacks {
            callback(notification);
        }
        callbacks.len()
    }
}
