use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{extract::Request, extract::State, middleware::Next, response::Response};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Last request time and in-flight count, read by the idle watchdog.
#[derive(Debug)]
pub struct ActivityTracker {
    last_activity: Mutex<Instant>,
    in_flight: AtomicUsize,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self {
            last_activity: Mutex::new(Instant::now()),
            in_flight: AtomicUsize::new(0),
        }
    }
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// No request is running and none has finished within `timeout`.
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.in_flight() == 0 && self.idle_for() >= timeout
    }

    /// Mark a request as started; activity is refreshed again when the
    /// guard drops.
    pub fn begin(self: &Arc<Self>) -> RequestGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.touch();
        RequestGuard {
            tracker: Arc::clone(self),
        }
    }
}

#[derive(Debug)]
pub struct RequestGuard {
    tracker: Arc<ActivityTracker>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.tracker.touch();
        self.tracker.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

pub async fn track_activity(
    State(tracker): State<Arc<ActivityTracker>>,
    request: Request,
    next: Next,
) -> Response {
    let _guard = tracker.begin();
    next.run(request).await
}
