use std::sync::{Arc, Mutex};
use std::time::Duration;

use scheduler::{EventKind, Job, JobError, Notification, Queue};

/// Route engine logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A job that sleeps for `delay_ms` and then resolves to `value`.
pub fn delayed(value: u32, delay_ms: u64) -> Job<u32> {
    Job::future(move || async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok::<_, JobError>(value)
    })
}

/// A job that never calls its completion.
pub fn hanging() -> Job<u32> {
    Job::callback(|_done| {})
}

/// Count notifications of one kind.
pub fn count(queue: &Queue<u32>, kind: EventKind) -> Arc<Mutex<usize>> {
    let hits = Arc::new(Mutex::new(0));
    let h = Arc::clone(&hits);
    queue.on(kind, move |_| *h.lock().unwrap() += 1);
    hits
}

/// Collect the values of success notifications in arrival order.
pub fn successes(queue: &Queue<u32>) -> Arc<Mutex<Vec<Option<u32>>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    queue.on(EventKind::Success, move |n| {
        if let Notification::Success { value, .. } = n {
            s.lock().unwrap().push(*value);
        }
    });
    seen
}
