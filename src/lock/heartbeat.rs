use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::lock::coordinator::LockCoordinator;

/// Granularity at which a renewal thread polls its stop flag
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to a periodic heartbeat-renewal task for one lock name.
///
/// The task renews on a fixed interval (strictly shorter than the
/// staleness threshold) and stops itself when a renewal reports the
/// lock lost. Dropping the handle signals the task and joins it, so
/// shutdown is deterministic.
pub struct HeartbeatHandle {
    lock_name: String,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    /// Spawn the renewal task.
    ///
    /// The task holds only a weak reference to the coordinator; if the
    /// coordinator is dropped the task exits on its next tick instead
    /// of keeping it alive.
    pub(crate) fn spawn(
        coordinator: Weak<LockCoordinator>,
        lock_name: String,
        interval: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread_name = lock_name.clone();

        let thread = thread::spawn(move || {
            renewal_loop(coordinator, &thread_name, interval, &thread_stop);
        });

        Self {
            lock_name,
            stop,
            thread: Some(thread),
        }
    }

    /// Lock name this task renews
    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }

    /// Whether the renewal task is still running
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Signal the task to stop and wait for it to finish
    pub fn stop(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            // A renewal task can end up dropping the last coordinator
            // reference itself; joining our own thread would deadlock
            if thread.thread().id() == std::thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                warn!("heartbeat task for {} panicked", self.lock_name);
            }
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn renewal_loop(
    coordinator: Weak<LockCoordinator>,
    lock_name: &str,
    interval: Duration,
    stop: &AtomicBool,
) {
    loop {
        let deadline = Instant::now() + interval;
        while Instant::now() < deadline {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            thread::sleep(remaining.min(STOP_POLL_INTERVAL));
        }
        if stop.load(Ordering::SeqCst) {
            return;
        }

        let coordinator = match coordinator.upgrade() {
            Some(coordinator) => coordinator,
            None => return, // Coordinator gone, nothing left to renew against
        };

        match coordinator.renew_heartbeat(lock_name) {
            Ok(true) => {}
            Ok(false) => {
                // Lost the lock; the task stops itself and the caller
                // notices through is_running or its own lock checks
                warn!("lock {} no longer held, heartbeat stopping", lock_name);
                return;
            }
            Err(e) => {
                // Transient store trouble; keep the lock alive by retrying
                debug!("heartbeat renewal for {} errored: {}", lock_name, e);
            }
        }
    }
}
