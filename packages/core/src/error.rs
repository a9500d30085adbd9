//! Error types shared across the queue.

use std::sync::Arc;

/// Outcome of a job that did not succeed.
///
/// Errors are cloned into every listener and into the terminal `start`
/// callback, so foreign errors are held behind an `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    #[error("job failed: {0}")]
    Failed(String),

    /// A future-style job aborted without producing a reason.
    #[error("job rejected")]
    Rejected,

    #[error("job panicked: {0}")]
    Panicked(String),

    #[error("job timed out")]
    TimedOut,

    #[error(transparent)]
    Source(Arc<dyn std::error::Error + Send + Sync>),
}

impl JobError {
    /// Build a `Failed` error from any message.
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed(message.into())
    }

    /// Wrap a foreign error.
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        JobError::Source(Arc::new(error))
    }

    /// Turn a caught panic payload into an error.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        JobError::Panicked(message)
    }
}

/// Errors raised while reading queue configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid queue config: {0}")]
    Invalid(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
