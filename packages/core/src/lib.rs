//! Core domain types for the job queue.
//!
//! This crate contains the runtime-free types shared by the scheduler:
//! - JobId and JobError for units of work
//! - QueueConfig, QueueState and QueueStats for the queue itself
//! - JobEvent records for the observability feed

mod error;
mod events;
mod job;
mod queue;

pub use error::{ConfigError, JobError};
pub use events::JobEvent;
pub use job::JobId;
pub use queue::{QueueConfig, QueueId, QueueState, QueueStats};
