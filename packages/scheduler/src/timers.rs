//! Registry of armed per-job timeout timers.

use std::collections::HashMap;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Identifies one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimerId(u64);

/// Tracks armed timers so they can be cancelled one at a time or all at once.
#[derive(Debug, Default)]
pub(crate) struct TimerRegistry {
    next_id: u64,
    active: HashMap<TimerId, AbortHandle>,
}

impl TimerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Arm a timer that calls `on_fire` after `duration`.
    ///
    /// Returns `None` when there is no tokio runtime to drive the timer.
    pub(crate) fn arm<F>(&mut self, duration: Duration, on_fire: F) -> Option<TimerId>
    where
        F: FnOnce(TimerId) + Send + 'static,
    {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("Cannot arm job timeout, no tokio runtime: {}", e);
                return None;
            }
        };

        self.next_id += 1;
        let id = TimerId(self.next_id);
        let task = handle.spawn(async move {
            tokio::time::sleep(duration).await;
            on_fire(id);
        });
        self.active.insert(id, task.abort_handle());
        Some(id)
    }

    /// Abort a timer and drop it from the registry.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        match self.active.remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Drop a timer that has already fired.
    pub(crate) fn forget(&mut self, id: TimerId) -> bool {
        self.active.remove(&id).is_some()
    }

    /// Abort every armed timer. Returns how many were cancelled.
    pub(crate) fn cancel_all(&mut self) -> usize {
        let count = self.active.len();
        for (_, handle) in self.active.drain() {
            handle.abort();
        }
        count
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.active.len()
    }
}
