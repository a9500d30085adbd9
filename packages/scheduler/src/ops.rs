//! Ordered-collection operations on the job store.
//!
//! `push`, `push_all`, `unshift` and `splice` start the queue afterwards when
//! autostart is enabled.

use std::ops::{Bound, RangeBounds};

use chrono::Utc;
use queue_core::{JobEvent, JobId};

use crate::job::Job;
use crate::lock;
use crate::queue::Queue;

impl<T: Clone + Send + 'static> Queue<T> {
    /// Append a job. Returns the number of queued jobs.
    pub fn push(&self, job: Job<T>) -> usize {
        self.push_all([job])
    }

    /// Append several jobs in order. Returns the number of queued jobs.
    pub fn push_all(&self, jobs: impl IntoIterator<Item = Job<T>>) -> usize {
        let (len, added) = {
            let mut state = lock(&self.shared.state);
            let added: Vec<JobId> = jobs
                .into_iter()
                .map(|job| {
                    let id = job.id();
                    state.jobs.push_back(job);
                    id
                })
                .collect();
            (state.jobs.len(), added)
        };
        self.enqueued(&added);
        self.autostart();
        len
    }

    /// Insert a job at the head of the store. Returns the number of queued jobs.
    pub fn unshift(&self, job: Job<T>) -> usize {
        let id = job.id();
        let len = {
            let mut state = lock(&self.shared.state);
            state.jobs.push_front(job);
            state.jobs.len()
        };
        self.enqueued(&[id]);
        self.autostart();
        len
    }

    /// Remove `delete_count` jobs starting at `start` and insert `items` in
    /// their place. Out-of-range arguments are clamped. Returns the removed
    /// jobs.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = Job<T>>,
    ) -> Vec<Job<T>> {
        let (removed, added) = {
            let mut state = lock(&self.shared.state);
            let start = start.min(state.jobs.len());
            let mut tail = state.jobs.split_off(start);
            let delete_count = delete_count.min(tail.len());
            let removed: Vec<Job<T>> = tail.drain(..delete_count).collect();

            let mut added = Vec::new();
            for job in items {
                added.push(job.id());
                state.jobs.push_back(job);
            }
            state.jobs.append(&mut tail);
            (removed, added)
        };
        self.enqueued(&added);
        self.autostart();
        removed
    }

    /// Remove and return the last queued job.
    pub fn pop(&self) -> Option<Job<T>> {
        lock(&self.shared.state).jobs.pop_back()
    }

    /// Remove and return the first queued job without running it.
    pub fn shift(&self) -> Option<Job<T>> {
        lock(&self.shared.state).jobs.pop_front()
    }

    /// Position of the first queued job with this id.
    pub fn index_of(&self, id: JobId) -> Option<usize> {
        lock(&self.shared.state)
            .jobs
            .iter()
            .position(|job| job.id() == id)
    }

    /// Position of the last queued job with this id.
    pub fn last_index_of(&self, id: JobId) -> Option<usize> {
        lock(&self.shared.state)
            .jobs
            .iter()
            .rposition(|job| job.id() == id)
    }

    /// Keep only the queued jobs within `range`; the rest are dropped.
    pub fn slice<R: RangeBounds<usize>>(&self, range: R) -> &Self {
        let mut state = lock(&self.shared.state);
        let len = state.jobs.len();
        let begin = match range.start_bound() {
            Bound::Included(&n) => n,
            Bound::Excluded(&n) => n.saturating_add(1),
            Bound::Unbounded => 0,
        }
        .min(len);
        let end = match range.end_bound() {
            Bound::Included(&n) => n.saturating_add(1),
            Bound::Excluded(&n) => n,
            Bound::Unbounded => len,
        }
        .clamp(begin, len);

        state.jobs.truncate(end);
        state.jobs.drain(..begin);
        self
    }

    /// Reverse the order of queued jobs.
    pub fn reverse(&self) -> &Self {
        lock(&self.shared.state).jobs.make_contiguous().reverse();
        self
    }

    /// Snapshot of the queued jobs, head first.
    pub fn jobs(&self) -> Vec<Job<T>> {
        lock(&self.shared.state).jobs.iter().cloned().collect()
    }

    fn enqueued(&self, ids: &[JobId]) {
        for &job_id in ids {
            self.shared.publish(JobEvent::JobEnqueued {
                job_id,
                queue_id: self.shared.id,
                timestamp: Utc::now(),
            });
        }
    }

    fn autostart(&self) {
        if self.shared.config.autostart {
            self.start();
        }
    }
}
