//! Queue configuration, state and statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::ConfigError;

/// Unique identifier for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueId(pub Ulid);

impl QueueId {
    /// Create a new unique queue ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a queue ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for QueueId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QueueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current operational state of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Not running and nothing in flight.
    #[default]
    Idle,
    /// Dispatching jobs as capacity frees up.
    Running,
    /// Stopped with jobs still in flight; they finish but nothing new starts.
    Stopped,
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueState::Idle => write!(f, "idle"),
            QueueState::Running => write!(f, "running"),
            QueueState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Configuration for queue behavior. Fixed once the queue is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of jobs in flight. `None` or `Some(0)` means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    /// Per-job timeout in milliseconds. Zero disables the timer.
    pub timeout_ms: u64,
    /// Start dispatching whenever jobs are added.
    pub autostart: bool,
    /// Record each job's value at its submission index.
    pub results: bool,
    /// Capacity of the broadcast event feed.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            timeout_ms: 0,
            autostart: false,
            results: false,
            event_capacity: 1024,
        }
    }
}

impl QueueConfig {
    /// Set the concurrency limit.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Set the per-job timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable autostart.
    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    /// Enable or disable result collection.
    pub fn with_results(mut self, results: bool) -> Self {
        self.results = results;
        self
    }

    /// Effective concurrency limit, `None` when unbounded.
    pub fn concurrency_limit(&self) -> Option<usize> {
        self.concurrency.filter(|&n| n > 0)
    }

    /// Effective per-job timeout, `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Check the config for values the queue cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Parse a config from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: QueueConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from the environment.
    ///
    /// Reads `QUEUE_CONCURRENCY`, `QUEUE_TIMEOUT_MS`, `QUEUE_AUTOSTART` and
    /// `QUEUE_RESULTS`. Unset or empty variables keep the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).and_then(non_empty);
        let mut config = QueueConfig::default();

        if let Some(raw) = var("QUEUE_CONCURRENCY") {
            let n = raw.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                key: "QUEUE_CONCURRENCY",
                value: raw.clone(),
            })?;
            config.concurrency = Some(n);
        }
        if let Some(raw) = var("QUEUE_TIMEOUT_MS") {
            config.timeout_ms = raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: "QUEUE_TIMEOUT_MS",
                value: raw.clone(),
            })?;
        }
        if let Some(v) = parse_bool("QUEUE_AUTOSTART", var("QUEUE_AUTOSTART"))? {
            config.autostart = v;
        }
        if let Some(v) = parse_bool("QUEUE_RESULTS", var("QUEUE_RESULTS"))? {
            config.results = v;
        }

        config.validate()?;
        Ok(config)
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(key: &'static str, raw: Option<String>) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue { key, value: raw }),
    }
}

/// Point-in-time counters for a queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    /// Jobs dispatched and not yet completed.
    pub pending: u64,
    /// Jobs waiting in the store.
    pub queued: u64,
    /// Jobs that completed successfully.
    pub completed: u64,
    /// Jobs that completed with an error.
    pub failed: u64,
    /// Jobs dropped by a timeout with no listener.
    pub timed_out: u64,
    /// Current session (generation) id.
    pub session: u64,
}

impl QueueStats {
    /// Observable queue length (pending + queued).
    pub fn active(&self) -> u64 {
        self.pending + self.queued
    }

    /// Total settled jobs.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed + self.timed_out
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.completed as f64 / total as f64) * 100.0)
        }
    }
}
