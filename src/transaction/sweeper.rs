use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::transaction::coordinator::TransactionCoordinator;

/// Granularity at which the sweep task polls its stop flag
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to the periodic purge-sweep task of a transaction
/// coordinator.
///
/// The sweep deletes purge-eligible log records on a fixed interval.
/// Dropping the handle signals the task and joins it.
pub struct PurgeTaskHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PurgeTaskHandle {
    pub(crate) fn spawn(coordinator: Weak<TransactionCoordinator>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        let thread = thread::spawn(move || {
            sweep_loop(coordinator, interval, &thread_stop);
        });

        Self {
            stop,
            thread: Some(thread),
        }
    }

    /// Whether the sweep task is still running
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
            if thread.thread().id() == std::thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                warn!("purge sweep task panicked");
            }
        }
    }
}

impl Drop for PurgeTaskHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn sweep_loop(coordinator: Weak<TransactionCoordinator>, interval: Duration, stop: &AtomicBool) {
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
            None => return,
        };

        // A failed sweep is maintenance trouble, not a reason to stop
        if let Err(e) = coordinator.purge() {
            debug!("purge sweep errored: {}", e);
        }
    }
}
