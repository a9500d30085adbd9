//! Event records for the queue's broadcast feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, QueueId};

/// Events published by a queue for observers that want a serializable feed.
///
/// These mirror the in-process notifications but carry ids instead of job
/// closures, so they can be logged or forwarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    // Queue events
    /// `start` was called.
    QueueStarted {
        queue_id: QueueId,
        session: u64,
        timestamp: DateTime<Utc>,
    },
    /// `stop` was called.
    QueueStopped {
        queue_id: QueueId,
        session: u64,
        timestamp: DateTime<Utc>,
    },
    /// The queue drained or was ended; `session` is the generation that closed.
    QueueEnded {
        queue_id: QueueId,
        session: u64,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    // Job events
    /// A job was added to the store.
    JobEnqueued {
        job_id: JobId,
        queue_id: QueueId,
        timestamp: DateTime<Utc>,
    },
    /// A job was dispatched.
    JobStarted {
        job_id: JobId,
        queue_id: QueueId,
        session: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: JobId,
        queue_id: QueueId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job completed with an error.
    JobFailed {
        job_id: JobId,
        queue_id: QueueId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A job's timer fired.
    JobTimedOut {
        job_id: JobId,
        queue_id: QueueId,
        handled: bool,
        timestamp: DateTime<Utc>,
    },
    /// A timed-out job completed without an error; its value was dropped.
    JobDiscarded {
        job_id: JobId,
        queue_id: QueueId,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::QueueStarted { timestamp, .. } => *timestamp,
            JobEvent::QueueStopped { timestamp, .. } => *timestamp,
            JobEvent::QueueEnded { timestamp, .. } => *timestamp,
            JobEvent::JobEnqueued { timestamp, .. } => *timestamp,
            JobEvent::JobStarted { timestamp, .. } => *timestamp,
            JobEvent::JobCompleted { timestamp, .. } => *timestamp,
            JobEvent::JobFailed { timestamp, .. } => *timestamp,
            JobEvent::JobTimedOut { timestamp, .. } => *timestamp,
            JobEvent::JobDiscarded { timestamp, .. } => *timestamp,
        }
    }

    /// Get the queue ID associated with this event.
    pub fn queue_id(&self) -> QueueId {
        match self {
            JobEvent::QueueStarted { queue_id, .. }
            | JobEvent::QueueStopped { queue_id, .. }
            | JobEvent::QueueEnded { queue_id, .. }
            | JobEvent::JobEnqueued { queue_id, .. }
            | JobEvent::JobStarted { queue_id, .. }
            | JobEvent::JobCompleted { queue_id, .. }
            | JobEvent::JobFailed { queue_id, .. }
            | JobEvent::JobTimedOut { queue_id, .. }
            | JobEvent::JobDiscarded { queue_id, .. } => *queue_id,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobEnqueued { job_id, .. } => Some(*job_id),
            JobEvent::JobStarted { job_id, .. } => Some(*job_id),
            JobEvent::JobCompleted { job_id, .. } => Some(*job_id),
            JobEvent::JobFailed { job_id, .. } => Some(*job_id),
            JobEvent::JobTimedOut { job_id, .. } => Some(*job_id),
            JobEvent::JobDiscarded { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::QueueStarted {
                queue_id, session, ..
            } => format!("Queue {} started (session {})", queue_id, session),
            JobEvent::QueueStopped { queue_id, .. } => format!("Queue {} stopped", queue_id),
            JobEvent::QueueEnded {
                queue_id, error, ..
            } => match error {
                Some(error) => format!("Queue {} ended: {}", queue_id, error),
                None => format!("Queue {} drained", queue_id),
            },
            JobEvent::JobEnqueued { job_id, .. } => format!("Job {} enqueued", job_id),
            JobEvent::JobStarted { job_id, .. } => format!("Job {} started", job_id),
            JobEvent::JobCompleted {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} completed in {}ms", job_id, duration_ms),
            JobEvent::JobFailed { job_id, error, .. } => {
                format!("Job {} failed: {}", job_id, error)
            }
            JobEvent::JobTimedOut {
                job_id, handled, ..
            } => {
                let handler = if *handled { " (handled)" } else { "" };
                format!("Job {} timed out{}", job_id, handler)
            }
            JobEvent::JobDiscarded { job_id, .. } => {
                format!("Job {} discarded after timeout", job_id)
            }
        }
    }
}
