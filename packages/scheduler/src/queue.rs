//! The queue and its dispatch engine.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use queue_core::{JobError, JobEvent, QueueConfig, QueueId, QueueState, QueueStats};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};

use crate::completion::{Completion, Dispatch, Outcome};
use crate::job::{Job, JobReturn};
use crate::listeners::{EventKind, ListenerId, Listeners, Notification};
use crate::lock;
use crate::timers::{TimerId, TimerRegistry};

/// Values collected at submission index; `None` until the job succeeds.
pub type Results<T> = Vec<Option<T>>;

/// Mutable queue state. Guarded by `Shared::state`, which is never held while
/// jobs or listeners run.
pub(crate) struct State<T> {
    pub(crate) jobs: VecDeque<Job<T>>,
    pub(crate) pending: usize,
    pub(crate) session: u64,
    pub(crate) running: bool,
    pub(crate) results: Option<Results<T>>,
    timers: TimerRegistry,
    // Set while some caller is inside `pump`; other callers leave a request
    // in `repump` instead of recursing.
    pumping: bool,
    repump: bool,
    completed: u64,
    failed: u64,
    timed_out: u64,
}

pub(crate) struct Shared<T> {
    pub(crate) id: QueueId,
    pub(crate) config: QueueConfig,
    pub(crate) state: Mutex<State<T>>,
    pub(crate) listeners: Listeners<T>,
    feed: broadcast::Sender<JobEvent>,
}

/// Releases the pump if a listener panics mid-pass.
struct PumpGuard<'a, T> {
    state: &'a Mutex<State<T>>,
    armed: bool,
}

impl<T> Drop for PumpGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = lock(self.state);
            state.pumping = false;
            state.repump = false;
        }
    }
}

enum Step<T> {
    Dispatch(Completion<T>),
    Drained(u64),
    Idle,
}

/// A bounded-concurrency job queue.
///
/// Jobs run in FIFO order with at most `concurrency` in flight. Outcomes are
/// reported through listeners registered with [`Queue::on`] and, optionally,
/// through the callback given to [`Queue::start_with`].
///
/// Cloning gives another handle to the same queue.
pub struct Queue<T> {
    pub(crate) shared: Arc<Shared<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Queue<T> {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl<T: Clone + Send + 'static> Queue<T> {
    /// Create a queue. The configuration is fixed for the queue's lifetime.
    pub fn new(config: QueueConfig) -> Self {
        let (feed, _) = broadcast::channel(config.event_capacity.max(1));
        let state = State {
            jobs: VecDeque::new(),
            pending: 0,
            session: 0,
            running: false,
            results: config.results.then(Vec::new),
            timers: TimerRegistry::new(),
            pumping: false,
            repump: false,
            completed: 0,
            failed: 0,
            timed_out: 0,
        };

        Self {
            shared: Arc::new(Shared {
                id: QueueId::new(),
                config,
                state: Mutex::new(state),
                listeners: Listeners::new(),
                feed,
            }),
        }
    }

    pub fn id(&self) -> QueueId {
        self.shared.id
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Start dispatching jobs.
    ///
    /// Fills every free concurrency slot right away. An idle queue with no
    /// jobs ends immediately.
    pub fn start(&self) {
        self.shared.start();
    }

    /// Start dispatching and call `on_done(error, results)` when the queue
    /// next ends.
    ///
    /// Until then, the first job error ends the whole queue with that error.
    pub fn start_with<F>(&self, on_done: F)
    where
        F: FnOnce(Option<JobError>, Option<Results<T>>) + Send + 'static,
    {
        let weak = Arc::downgrade(&self.shared);

        let error_id = {
            let weak = weak.clone();
            self.shared.listeners.add(
                EventKind::Error,
                true,
                Arc::new(move |notification: &Notification<T>| {
                    if let (Notification::Error { error, .. }, Some(shared)) =
                        (notification, weak.upgrade())
                    {
                        shared.end(Some(error.clone()));
                    }
                }),
            )
        };

        let on_done = Mutex::new(Some(on_done));
        self.shared.listeners.add(
            EventKind::End,
            true,
            Arc::new(move |notification: &Notification<T>| {
                let Notification::End { error } = notification else {
                    return;
                };
                let results = weak.upgrade().and_then(|shared| {
                    shared.listeners.remove(error_id);
                    let results = lock(&shared.state).results.clone();
                    results
                });
                if let Some(on_done) = lock(&on_done).take() {
                    on_done(error.clone(), results);
                }
            }),
        );

        self.start();
    }

    /// Start dispatching and wait for the queue to end.
    ///
    /// Resolves with the collected results (when results are enabled) or with
    /// the error that ended the queue.
    pub async fn run(&self) -> Result<Option<Results<T>>, JobError> {
        let (tx, rx) = oneshot::channel();
        self.start_with(move |error, results| {
            let _ = tx.send((error, results));
        });

        match rx.await {
            Ok((None, results)) => Ok(results),
            Ok((Some(error), _)) => Err(error),
            Err(_) => Err(JobError::failed("queue dropped before it ended")),
        }
    }

    /// Stop dispatching new jobs. Jobs already in flight still complete.
    pub fn stop(&self) {
        let session = {
            let mut state = lock(&self.shared.state);
            if !std::mem::replace(&mut state.running, false) {
                return;
            }
            state.session
        };
        tracing::info!("Queue {} stopped", self.shared.id);
        self.shared.publish(JobEvent::QueueStopped {
            queue_id: self.shared.id,
            session,
            timestamp: Utc::now(),
        });
    }

    /// End the queue now: cancel timers, drop queued jobs, forget in-flight
    /// ones and emit `end` with `error`.
    ///
    /// Completions from jobs that were in flight are ignored afterwards.
    pub fn end(&self, error: Option<JobError>) {
        self.shared.end(error);
    }

    /// Register a listener for `kind`.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Notification<T>) + Send + Sync + 'static,
    {
        self.shared.listeners.add(kind, false, Arc::new(listener))
    }

    /// Register a listener that is removed after its first delivery.
    pub fn once<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Notification<T>) + Send + Sync + 'static,
    {
        self.shared.listeners.add(kind, true, Arc::new(listener))
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.shared.listeners.count(kind)
    }

    /// Subscribe to the serializable event feed.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.feed.subscribe()
    }

    /// Snapshot of collected results, `None` when results are disabled.
    pub fn results(&self) -> Option<Results<T>> {
        lock(&self.shared.state).results.clone()
    }

    /// Jobs in flight plus jobs queued.
    pub fn len(&self) -> usize {
        let state = lock(&self.shared.state);
        state.pending + state.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Jobs dispatched and not yet completed.
    pub fn pending(&self) -> usize {
        lock(&self.shared.state).pending
    }

    /// Jobs waiting to be dispatched.
    pub fn queued(&self) -> usize {
        lock(&self.shared.state).jobs.len()
    }

    pub fn session(&self) -> u64 {
        lock(&self.shared.state).session
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.state).running
    }

    pub fn state(&self) -> QueueState {
        let state = lock(&self.shared.state);
        if state.running {
            QueueState::Running
        } else if state.pending > 0 {
            QueueState::Stopped
        } else {
            QueueState::Idle
        }
    }

    pub fn stats(&self) -> QueueStats {
        let state = lock(&self.shared.state);
        QueueStats {
            pending: state.pending as u64,
            queued: state.jobs.len() as u64,
            completed: state.completed,
            failed: state.failed,
            timed_out: state.timed_out,
            session: state.session,
        }
    }

    #[cfg(test)]
    pub(crate) fn armed_timers(&self) -> usize {
        lock(&self.shared.state).timers.len()
    }
}

impl<T: Clone + Send + 'static> Shared<T> {
    pub(crate) fn publish(&self, event: JobEvent) {
        // No subscribers is not an error.
        let _ = self.feed.send(event);
    }

    pub(crate) fn start(self: &Arc<Self>) {
        let session = {
            let mut state = lock(&self.state);
            state.running = true;
            state.session
        };
        tracing::info!("Queue {} started (session {})", self.id, session);
        self.publish(JobEvent::QueueStarted {
            queue_id: self.id,
            session,
            timestamp: Utc::now(),
        });
        self.pump();
    }

    /// Dispatch until the queue is at capacity, out of jobs or stopped.
    ///
    /// Only one caller pumps at a time. A completion that wants a refill while
    /// a pump is active (on this stack or another thread) leaves a request and
    /// the active pump runs another pass, so synchronous jobs never recurse.
    fn pump(self: &Arc<Self>) {
        {
            let mut state = lock(&self.state);
            if state.pumping {
                state.repump = true;
                return;
            }
            state.pumping = true;
        }
        let mut guard = PumpGuard {
            state: &self.state,
            armed: true,
        };

        loop {
            let step = {
                let mut state = lock(&self.state);
                self.next_step(&mut state)
            };

            match step {
                Step::Dispatch(done) => {
                    self.launch(done);
                    let state = lock(&self.state);
                    if state.running && !state.jobs.is_empty() {
                        continue;
                    }
                }
                Step::Drained(closed) => self.announce_end(None, closed),
                Step::Idle => {}
            }

            let mut state = lock(&self.state);
            if state.repump {
                state.repump = false;
                continue;
            }
            state.pumping = false;
            guard.armed = false;
            return;
        }
    }

    fn next_step(self: &Arc<Self>, state: &mut State<T>) -> Step<T> {
        if !state.running {
            return Step::Idle;
        }
        if let Some(limit) = self.config.concurrency_limit()
            && state.pending >= limit
        {
            return Step::Idle;
        }

        let Some(job) = state.jobs.pop_front() else {
            if state.pending == 0 {
                return Step::Drained(self.finish_session(state));
            }
            return Step::Idle;
        };

        let slot = state.results.as_mut().map(|results| {
            results.push(None);
            results.len() - 1
        });
        state.pending += 1;

        let dispatch = Arc::new(Dispatch::new(job, state.session, slot));
        let done = Completion::new(Arc::clone(self), Arc::clone(&dispatch));

        if let Some(timeout) = self.config.timeout() {
            let on_fire = done.clone();
            if let Some(timer) = state.timers.arm(timeout, move |id| on_fire.expire(id)) {
                dispatch.set_timer(timer);
            }
        }

        tracing::debug!(
            "Dispatching job {} ({} in flight)",
            dispatch.job,
            state.pending
        );
        Step::Dispatch(done)
    }

    fn launch(self: &Arc<Self>, done: Completion<T>) {
        let job = done.job().clone();
        self.publish(JobEvent::JobStarted {
            job_id: job.id(),
            queue_id: self.id,
            session: done.session(),
            timestamp: Utc::now(),
        });

        match std::panic::catch_unwind(AssertUnwindSafe(|| job.invoke(done.clone()))) {
            Ok(JobReturn::Callback) => {}
            Ok(JobReturn::Future(future)) => self.drive(future, done),
            // Already settled: the panic is not the job's outcome to report.
            Err(payload) if done.is_settled() => std::panic::resume_unwind(payload),
            Err(payload) => done.reject(JobError::from_panic(&*payload)),
        }
    }

    fn drive(&self, future: BoxFuture<'static, Result<T, JobError>>, done: Completion<T>) {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("Cannot drive job {}, no tokio runtime: {}", done.job(), e);
                done.reject(JobError::failed("no tokio runtime to drive job future"));
                return;
            }
        };

        handle.spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => done.complete(result),
                Err(_) => done.reject(JobError::Rejected),
            }
        });
    }

    /// Apply the first effective completion of a dispatch.
    pub(crate) fn settle(self: &Arc<Self>, dispatch: &Arc<Dispatch<T>>, outcome: Outcome<T>) {
        let job = &dispatch.job;

        let notification = {
            let mut state = lock(&self.state);
            if dispatch.is_settled() || state.session != dispatch.session {
                tracing::trace!(
                    "Ignoring completion of job {} from session {}",
                    job.id(),
                    dispatch.session
                );
                return;
            }
            dispatch.mark_settled();
            state.pending = state.pending.saturating_sub(1);
            if let Some(timer) = dispatch.take_timer() {
                state.timers.cancel(timer);
            }

            match outcome {
                Outcome::Failed(error) => {
                    state.failed += 1;
                    Some(Notification::Error {
                        error,
                        job: job.clone(),
                    })
                }
                _ if dispatch.timed_out() => {
                    state.timed_out += 1;
                    None
                }
                Outcome::Value(value) => {
                    state.completed += 1;
                    if let (Some(results), Some(slot)) = (state.results.as_mut(), dispatch.slot)
                        && let Some(cell) = results.get_mut(slot)
                    {
                        *cell = Some(value.clone());
                    }
                    Some(Notification::Success {
                        value: Some(value),
                        job: job.clone(),
                    })
                }
                Outcome::Empty => {
                    state.completed += 1;
                    Some(Notification::Success {
                        value: None,
                        job: job.clone(),
                    })
                }
            }
        };

        match &notification {
            Some(Notification::Error { error, .. }) => {
                tracing::debug!("Job {} failed: {}", job, error);
                self.publish(JobEvent::JobFailed {
                    job_id: job.id(),
                    queue_id: self.id,
                    error: error.to_string(),
                    timestamp: Utc::now(),
                });
            }
            Some(_) => {
                let duration_ms = dispatch.duration_ms();
                tracing::debug!("Job {} completed in {}ms", job, duration_ms);
                self.publish(JobEvent::JobCompleted {
                    job_id: job.id(),
                    queue_id: self.id,
                    duration_ms,
                    timestamp: Utc::now(),
                });
            }
            None => {
                tracing::debug!("Job {} timed out, dropping its result", job);
                self.publish(JobEvent::JobDiscarded {
                    job_id: job.id(),
                    queue_id: self.id,
                    timestamp: Utc::now(),
                });
            }
        }

        match notification {
            Some(Notification::Error { error, job }) => self.emit_error(error, job),
            Some(notification) => {
                self.listeners.emit(&notification);
            }
            None => {}
        }

        // An error listener may have ended the queue; that wins.
        let closed = {
            let mut state = lock(&self.state);
            if state.session != dispatch.session {
                return;
            }
            if state.pending == 0 && state.jobs.is_empty() {
                self.finish_session(&mut state)
            } else if state.running {
                drop(state);
                self.pump();
                return;
            } else {
                return;
            }
        };
        self.announce_end(None, closed);
    }

    fn emit_error(self: &Arc<Self>, error: JobError, job: Job<T>) {
        let notification = Notification::Error {
            error: error.clone(),
            job,
        };
        if self.listeners.emit(&notification) == 0 {
            tracing::error!("Unhandled job error, ending queue {}: {}", self.id, error);
            self.end(Some(error));
        }
    }

    /// Called by a dispatch's timer when it fires.
    pub(crate) fn expire(self: &Arc<Self>, done: &Completion<T>, timer: TimerId) {
        let dispatch = done.dispatch();
        let handled = {
            let mut state = lock(&self.state);
            state.timers.forget(timer);
            if dispatch.is_settled() || state.session != dispatch.session {
                return;
            }
            dispatch.take_timer();
            let handled = self.listeners.count(EventKind::Timeout) > 0;
            if !handled {
                dispatch.mark_timed_out();
            }
            handled
        };

        tracing::debug!("Job {} timed out", dispatch.job);
        self.publish(JobEvent::JobTimedOut {
            job_id: dispatch.job.id(),
            queue_id: self.id,
            handled,
            timestamp: Utc::now(),
        });

        let delivered = handled
            && self.listeners.emit(&Notification::Timeout {
                completion: done.clone(),
                job: dispatch.job.clone(),
            }) > 0;
        // A listener takes over the completion; otherwise the job is dropped.
        if !delivered {
            {
                let _state = lock(&self.state);
                dispatch.mark_timed_out();
            }
            done.finish();
        }
    }

    pub(crate) fn end(self: &Arc<Self>, error: Option<JobError>) {
        let closed = {
            let mut state = lock(&self.state);
            let timers = state.timers.cancel_all();
            let dropped = state.jobs.len();
            let abandoned = state.pending;
            state.jobs.clear();
            state.pending = 0;
            tracing::info!(
                "Ending queue {}: {} queued dropped, {} in flight abandoned, {} timers cancelled",
                self.id,
                dropped,
                abandoned,
                timers
            );
            self.finish_session(&mut state)
        };
        self.announce_end(error, closed);
    }

    /// Close the current session. Returns the id of the session that closed.
    fn finish_session(&self, state: &mut State<T>) -> u64 {
        let closed = state.session;
        state.session += 1;
        state.running = false;
        closed
    }

    fn announce_end(&self, error: Option<JobError>, closed: u64) {
        match &error {
            Some(error) => tracing::info!("Queue {} ended: {}", self.id, error),
            None => tracing::info!("Queue {} drained (session {})", self.id, closed),
        }
        self.publish(JobEvent::QueueEnded {
            queue_id: self.id,
            session: closed,
            error: error.as_ref().map(ToString::to_string),
            timestamp: Utc::now(),
        });
        self.listeners.emit(&Notification::End { error });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    type Parked = Arc<Mutex<Vec<Completion<u32>>>>;

    fn parked(slot: &Parked) -> Job<u32> {
        let slot = Arc::clone(slot);
        Job::callback(move |done| slot.lock().unwrap().push(done))
    }

    fn resolving(value: u32) -> Job<u32> {
        Job::callback(move |done| done.resolve(value))
    }

    fn failing(message: &'static str) -> Job<u32> {
        Job::callback(move |done| done.reject(JobError::failed(message)))
    }

    /// Records every notification as a short string.
    fn record(queue: &Queue<u32>, kinds: &[EventKind]) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for &kind in kinds {
            let log = Arc::clone(&log);
            queue.on(kind, move |n| {
                let entry = match n {
                    Notification::Success { value, .. } => format!("success:{:?}", value),
                    Notification::Error { error, .. } => format!("error:{}", error),
                    Notification::Timeout { .. } => "timeout".to_string(),
                    Notification::End { error: None } => "end".to_string(),
                    Notification::End { error: Some(e) } => format!("end:{}", e),
                };
                log.lock().unwrap().push(entry);
            });
        }
        log
    }

    #[test]
    fn empty_queue_drains_synchronously() {
        let queue = Queue::<u32>::default();
        let log = record(&queue, &[EventKind::End]);

        queue.start();

        assert_eq!(*log.lock().unwrap(), vec!["end"]);
        assert_eq!(queue.session(), 1);
        assert!(!queue.is_running());
        assert_eq!(queue.state(), QueueState::Idle);
    }

    #[test]
    fn sequential_queue_runs_in_fifo_order() {
        let queue = Queue::new(QueueConfig::default().with_concurrency(1));
        let log = record(&queue, &[EventKind::Success, EventKind::End]);
        queue.push_all((0..5).map(resolving));

        queue.start();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "success:Some(0)",
                "success:Some(1)",
                "success:Some(2)",
                "success:Some(3)",
                "success:Some(4)",
                "end",
            ]
        );
        assert_eq!(queue.session(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn dispatch_fills_and_refills_up_to_the_limit() {
        let queue = Queue::new(QueueConfig::default().with_concurrency(2));
        let slot = Parked::default();
        for _ in 0..5 {
            queue.push(parked(&slot));
        }

        let peak = Arc::new(AtomicUsize::new(0));
        {
            let peak = Arc::clone(&peak);
            let q = queue.clone();
            queue.on(EventKind::Success, move |_| {
                peak.fetch_max(q.pending(), Ordering::SeqCst);
            });
        }

        queue.start();
        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.queued(), 3);
        assert_eq!(queue.len(), 5);
        assert_eq!(slot.lock().unwrap().len(), 2);

        let first = slot.lock().unwrap()[0].clone();
        first.resolve(1);
        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.queued(), 2);
        assert_eq!(queue.len(), 4);
        assert_eq!(slot.lock().unwrap().len(), 3);

        for i in 1..5 {
            let done = slot.lock().unwrap()[i].clone();
            done.resolve(i as u32);
        }
        assert!(queue.is_empty());
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(queue.stats().completed, 5);
    }

    #[test]
    fn repeated_completion_has_effect_once() {
        let queue = Queue::<u32>::default();
        let log = record(&queue, &[EventKind::Success, EventKind::End]);
        let slot = Parked::default();
        queue.push_all([parked(&slot), parked(&slot)]);
        queue.start();

        let done = slot.lock().unwrap()[0].clone();
        done.resolve(1);
        done.resolve(2);
        done.clone().finish();

        assert!(done.is_settled());
        assert_eq!(queue.pending(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["success:Some(1)"]);
    }

    #[test]
    fn end_discards_in_flight_completions() {
        let queue = Queue::<u32>::default();
        let log = record(&queue, &[EventKind::Success, EventKind::Error, EventKind::End]);
        let slot = Parked::default();
        queue.push_all([parked(&slot), parked(&slot)]);
        queue.start();
        assert_eq!(queue.len(), 2);

        queue.end(Some(JobError::failed("abort")));
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.session(), 1);
        assert!(!queue.is_running());

        for done in slot.lock().unwrap().iter() {
            done.resolve(7);
            done.reject(JobError::failed("late"));
        }

        assert_eq!(*log.lock().unwrap(), vec!["end:job failed: abort"]);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.session(), 1);
        assert_eq!(queue.stats().completed, 0);
    }

    #[test]
    fn error_listener_ending_the_queue_preempts_dispatch() {
        let queue = Queue::new(QueueConfig::default().with_concurrency(1));
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let q = queue.clone();
            queue.on(EventKind::Error, move |n| {
                if let Notification::Error { error, .. } = n {
                    q.end(Some(error.clone()));
                }
            });
        }
        let log = record(&queue, &[EventKind::End]);
        queue.push(failing("first"));
        {
            let ran = Arc::clone(&ran);
            queue.push(Job::callback(move |done| {
                ran.fetch_add(1, Ordering::SeqCst);
                done.resolve(2);
            }));
        }

        queue.start();

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(*log.lock().unwrap(), vec!["end:job failed: first"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn error_without_listener_ends_the_queue() {
        let queue = Queue::new(QueueConfig::default().with_concurrency(1));
        let log = record(&queue, &[EventKind::Success, EventKind::End]);
        queue.push_all([resolving(1), failing("bad input"), resolving(3)]);

        queue.start();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["success:Some(1)", "end:job failed: bad input"]
        );
        assert_eq!(queue.queued(), 0);
        assert_eq!(queue.stats().failed, 1);
    }

    #[test]
    fn explicit_error_listener_keeps_the_queue_going() {
        let queue = Queue::new(QueueConfig::default().with_concurrency(1));
        let log = record(&queue, &[EventKind::Success, EventKind::Error, EventKind::End]);
        queue.push_all([failing("one"), resolving(2)]);

        queue.start();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["error:job failed: one", "success:Some(2)", "end"]
        );
    }

    #[test]
    fn start_with_reports_results() {
        let queue = Queue::new(QueueConfig::default().with_results(true));
        queue.push_all([resolving(1), resolving(2)]);

        let outcome = Arc::new(Mutex::new(None));
        {
            let outcome = Arc::clone(&outcome);
            queue.start_with(move |error, results| {
                *outcome.lock().unwrap() = Some((error.is_some(), results));
            });
        }

        let (errored, results) = outcome.lock().unwrap().take().unwrap();
        assert!(!errored);
        assert_eq!(results, Some(vec![Some(1), Some(2)]));
        assert_eq!(queue.listener_count(EventKind::Error), 0);
        assert_eq!(queue.listener_count(EventKind::End), 0);
    }

    #[test]
    fn start_with_aborts_the_batch_on_first_error() {
        let queue = Queue::new(QueueConfig::default().with_concurrency(1).with_results(true));
        let ran_third = Arc::new(AtomicUsize::new(0));
        queue.push_all([resolving(1), failing("broken")]);
        {
            let ran_third = Arc::clone(&ran_third);
            queue.push(Job::callback(move |done| {
                ran_third.fetch_add(1, Ordering::SeqCst);
                done.resolve(3);
            }));
        }

        let outcome = Arc::new(Mutex::new(None));
        {
            let outcome = Arc::clone(&outcome);
            queue.start_with(move |error, results| {
                *outcome.lock().unwrap() = Some((error.map(|e| e.to_string()), results));
            });
        }

        let (error, results) = outcome.lock().unwrap().take().unwrap();
        assert_eq!(error.as_deref(), Some("job failed: broken"));
        assert_eq!(results, Some(vec![Some(1), None]));
        assert_eq!(ran_third.load(Ordering::SeqCst), 0);
        assert_eq!(queue.listener_count(EventKind::Error), 0);
    }

    #[test]
    fn panicking_job_is_reported_as_error() {
        let queue = Queue::<u32>::default();
        let log = record(&queue, &[EventKind::Error, EventKind::End]);
        queue.push(Job::callback(|_done| panic!("job exploded")));

        queue.start();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["error:job panicked: job exploded", "end"]
        );
    }

    #[test]
    fn stop_halts_new_dispatch_until_restarted() {
        let queue = Queue::new(QueueConfig::default().with_concurrency(1));
        let log = record(&queue, &[EventKind::End]);
        let slot = Parked::default();
        queue.push_all([parked(&slot), parked(&slot)]);

        queue.start();
        queue.stop();
        assert_eq!(queue.state(), QueueState::Stopped);

        let first = slot.lock().unwrap()[0].clone();
        first.resolve(1);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.queued(), 1);
        assert_eq!(queue.state(), QueueState::Idle);
        assert!(log.lock().unwrap().is_empty());

        queue.start();
        assert_eq!(queue.pending(), 1);
        let second = slot.lock().unwrap()[1].clone();
        second.resolve(2);
        assert_eq!(*log.lock().unwrap(), vec!["end"]);
    }

    #[test]
    fn stopped_queue_still_reports_drain() {
        let queue = Queue::<u32>::default();
        let log = record(&queue, &[EventKind::End]);
        let slot = Parked::default();
        queue.push(parked(&slot));

        queue.start();
        queue.stop();
        let done = slot.lock().unwrap()[0].clone();
        done.finish();

        assert_eq!(*log.lock().unwrap(), vec!["end"]);
        assert_eq!(queue.session(), 1);
    }

    #[test]
    fn sessions_advance_once_per_cycle() {
        let queue = Queue::<u32>::default();
        queue.push(resolving(1));
        queue.start();
        assert_eq!(queue.session(), 1);

        queue.push(resolving(2));
        queue.start();
        assert_eq!(queue.session(), 2);

        queue.end(None);
        assert_eq!(queue.session(), 3);
        assert_eq!(queue.stats().session, 3);
    }

    #[test]
    fn listener_panic_during_sync_completion_propagates() {
        let queue = Queue::new(QueueConfig::default().with_concurrency(1));
        let log = record(&queue, &[EventKind::End]);
        let tripped = Arc::new(AtomicUsize::new(0));
        {
            let tripped = Arc::clone(&tripped);
            queue.on(EventKind::Success, move |_| {
                if tripped.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("success listener failed");
                }
            });
        }
        queue.push(resolving(1));

        let first = std::panic::catch_unwind(AssertUnwindSafe(|| queue.start()));
        assert!(first.is_err());
        assert_eq!(queue.stats().completed, 1);
        assert_eq!(queue.stats().failed, 0);
        assert!(log.lock().unwrap().is_empty());

        // The pump was released, so the next start drains normally.
        queue.start();
        assert_eq!(*log.lock().unwrap(), vec!["end"]);
        assert!(!queue.is_running());
    }

    #[test]
    fn end_listener_panic_does_not_wedge_the_queue() {
        let queue = Queue::<u32>::default();
        let ends = Arc::new(AtomicUsize::new(0));
        {
            let ends = Arc::clone(&ends);
            queue.on(EventKind::End, move |_| {
                if ends.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("end listener failed");
                }
            });
        }

        let first = std::panic::catch_unwind(AssertUnwindSafe(|| queue.start()));
        assert!(first.is_err());
        assert_eq!(queue.session(), 1);

        let ran = Arc::new(AtomicUsize::new(0));
        {
            let ran = Arc::clone(&ran);
            queue.push(Job::callback(move |done| {
                ran.fetch_add(1, Ordering::SeqCst);
                done.resolve(1);
            }));
        }
        queue.start();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(ends.load(Ordering::SeqCst), 2);
        assert_eq!(queue.session(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn stop_on_idle_queue_is_silent() {
        let queue = Queue::<u32>::default();
        let mut feed = queue.subscribe();

        queue.stop();
        assert!(feed.try_recv().is_err());

        let slot = Parked::default();
        queue.push(parked(&slot));
        queue.start();
        queue.stop();
        queue.stop();

        let stopped = std::iter::from_fn(|| feed.try_recv().ok())
            .filter(|event| matches!(event, JobEvent::QueueStopped { session: 0, .. }))
            .count();
        assert_eq!(stopped, 1);
    }

    #[tokio::test]
    async fn end_cancels_armed_timers() {
        let queue = Queue::new(QueueConfig::default().with_timeout(Duration::from_secs(1)));
        let slot = Parked::default();
        queue.push_all([parked(&slot), parked(&slot)]);

        queue.start();
        assert_eq!(queue.armed_timers(), 2);

        let first = slot.lock().unwrap()[0].clone();
        first.resolve(1);
        assert_eq!(queue.armed_timers(), 1);

        queue.end(None);
        assert_eq!(queue.armed_timers(), 0);
    }
}
