use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{millis_since, now_millis};
use crate::lock::heartbeat::HeartbeatHandle;
use crate::lock::record::{LockRecord, LockRecordError};
use crate::runner::RunnerIdentity;
use crate::storage::store::{RecordStore, StoreError};
use crate::telemetry::{AuditSink, TelemetrySink};

/// Error type for lock coordinator operations
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Record error: {0}")]
    RecordError(#[from] LockRecordError),
}

/// Result type for lock coordinator operations
pub type Result<T> = std::result::Result<T, LockError>;

/// Configuration for the lock coordinator
#[derive(Debug, Clone)]
pub struct LockCoordinatorConfig {
    /// Container holding the lock records
    pub lock_container: String,

    /// Time since the last heartbeat after which a holder counts as
    /// stale and its lock becomes takeable
    pub staleness_threshold: Duration,

    /// Interval between heartbeat renewals; must be strictly shorter
    /// than the staleness threshold
    pub heartbeat_interval: Duration,
}

impl Default for LockCoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_container: "locks".to_string(),
            staleness_threshold: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

/// Snapshot of lock coordinator counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockStats {
    /// Successful acquisitions (fresh, idempotent re-acquire, takeover)
    pub acquired: u64,
    /// Acquire attempts refused because another runner holds the lock
    pub contention: u64,
    /// Acquisitions that displaced a stale holder
    pub takeovers: u64,
    /// Locks released by this runner
    pub released: u64,
    /// Successful heartbeat renewals
    pub renewals: u64,
    /// Release/renew attempts against a lock owned by someone else
    pub mismatches: u64,
    /// Renewal tasks currently running
    pub active_heartbeats: usize,
}

#[derive(Default)]
struct Counters {
    acquired: AtomicU64,
    contention: AtomicU64,
    takeovers: AtomicU64,
    released: AtomicU64,
    renewals: AtomicU64,
    mismatches: AtomicU64,
}

/// Heartbeat-based advisory lock coordinator.
///
/// Mutual exclusion between runners sharing a storage directory is
/// best-effort: ownership is a record in the lock container, liveness is
/// a wall-clock heartbeat, and a stale record is taken over by
/// rewriting it. There is no fencing token, so a revived holder whose
/// renewal lands after a competitor's takeover can momentarily disagree
/// with the store about ownership; callers must treat a false renewal
/// as loss of the lock.
pub struct LockCoordinator {
    store: Arc<dyn RecordStore>,
    runner: RunnerIdentity,
    telemetry: Arc<dyn TelemetrySink>,
    audit: Arc<dyn AuditSink>,
    config: LockCoordinatorConfig,
    counters: Counters,

    /// Renewal tasks keyed by lock name
    heartbeats: Mutex<HashMap<String, HeartbeatHandle>>,
}

impl LockCoordinator {
    /// Create a coordinator acting as the given runner.
    ///
    /// The heartbeat interval must be strictly shorter than the
    /// staleness threshold or a healthy holder would go stale between
    /// its own renewals.
    pub fn new(
        store: Arc<dyn RecordStore>,
        runner: RunnerIdentity,
        telemetry: Arc<dyn TelemetrySink>,
        audit: Arc<dyn AuditSink>,
        config: LockCoordinatorConfig,
    ) -> Self {
        debug_assert!(config.heartbeat_interval < config.staleness_threshold);
        Self {
            store,
            runner,
            telemetry,
            audit,
            config,
            counters: Counters::default(),
            heartbeats: Mutex::new(HashMap::new()),
        }
    }

    /// Identity this coordinator acquires locks as
    pub fn runner(&self) -> &RunnerIdentity {
        &self.runner
    }

    /// Coordinator configuration
    pub fn config(&self) -> &LockCoordinatorConfig {
        &self.config
    }

    /// Try to acquire a lock.
    ///
    /// Succeeds when the lock is free, already ours (idempotent, no
    /// rewrite), or held by a stale runner (takeover). Returns `false`
    /// on contention with a live holder.
    pub fn acquire_lock(
        &self,
        lock_name: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<bool> {
        let now = now_millis();

        match self.read_record(lock_name)? {
            None => {
                self.write_fresh_record(lock_name, now, metadata)?;
                self.counters.acquired.fetch_add(1, Ordering::Relaxed);
                self.telemetry.incr_counter("lock.acquire.success", 1);
                info!("acquired lock {} as {}", lock_name, self.runner.id);
                Ok(true)
            }
            Some(record) if record.runner_id == self.runner.id => {
                // Idempotent re-acquire: keep acquired_at and renewals
                self.counters.acquired.fetch_add(1, Ordering::Relaxed);
                self.telemetry.incr_counter("lock.acquire.success", 1);
                debug!("lock {} already held by this runner", lock_name);
                Ok(true)
            }
            Some(record) if record.is_stale(now, self.config.staleness_threshold) => {
                warn!(
                    "taking over stale lock {} from {} (last heartbeat {}ms ago)",
                    lock_name,
                    record.runner_id,
                    millis_since(now, record.last_heartbeat)
                );
                self.write_fresh_record(lock_name, now, metadata)?;
                self.counters.acquired.fetch_add(1, Ordering::Relaxed);
                self.counters.takeovers.fetch_add(1, Ordering::Relaxed);
                self.telemetry.incr_counter("lock.acquire.success", 1);
                self.telemetry.incr_counter("lock.acquire.takeover", 1);

                let mut audit_meta = HashMap::new();
                audit_meta.insert("lock_name".to_string(), lock_name.to_string());
                audit_meta.insert("previous_runner".to_string(), record.runner_id.clone());
                audit_meta.insert("new_runner".to_string(), self.runner.id.clone());
                self.audit.record_event("lock.takeover", &audit_meta);
                Ok(true)
            }
            Some(record) => {
                self.counters.contention.fetch_add(1, Ordering::Relaxed);
                self.telemetry.incr_counter("lock.acquire.contention", 1);
                debug!(
                    "lock {} contended, held by live runner {}",
                    lock_name, record.runner_id
                );
                Ok(false)
            }
        }
    }

    /// Release a lock held by this runner.
    ///
    /// A release against a lock held by another runner (or no lock at
    /// all) is an expected race: logged, counted, and a no-op.
    pub fn release_lock(&self, lock_name: &str) -> Result<bool> {
        match self.read_record(lock_name)? {
            Some(record) if record.runner_id == self.runner.id => {
                self.store.delete(&self.config.lock_container, lock_name)?;
                self.counters.released.fetch_add(1, Ordering::Relaxed);
                self.telemetry.incr_counter("lock.release", 1);
                self.telemetry.record_gauge(
                    "lock.hold.duration_ms",
                    millis_since(now_millis(), record.acquired_at) as f64,
                );
                info!("released lock {}", lock_name);
                Ok(true)
            }
            Some(record) => {
                self.counters.mismatches.fetch_add(1, Ordering::Relaxed);
                self.telemetry.incr_counter("lock.mismatch", 1);
                warn!(
                    "refusing to release lock {} held by {}",
                    lock_name, record.runner_id
                );
                Ok(false)
            }
            None => {
                debug!("release of absent lock {}", lock_name);
                Ok(false)
            }
        }
    }

    /// Renew the heartbeat on a lock held by this runner.
    ///
    /// Returns `false` without mutating anything if the lock is absent
    /// or owned by another runner - the caller has lost the lock.
    pub fn renew_heartbeat(&self, lock_name: &str) -> Result<bool> {
        match self.read_record(lock_name)? {
            Some(mut record) if record.runner_id == self.runner.id => {
                record.renew(now_millis());
                self.write_record(&record)?;
                self.counters.renewals.fetch_add(1, Ordering::Relaxed);
                self.telemetry.incr_counter("lock.renewal", 1);
                Ok(true)
            }
            Some(record) => {
                self.counters.mismatches.fetch_add(1, Ordering::Relaxed);
                self.telemetry.incr_counter("lock.mismatch", 1);
                warn!(
                    "cannot renew lock {}: now held by {}",
                    lock_name, record.runner_id
                );
                Ok(false)
            }
            None => {
                debug!("cannot renew absent lock {}", lock_name);
                Ok(false)
            }
        }
    }

    /// Start a periodic renewal task for a lock this runner holds.
    /// A task already running for the name is left in place.
    pub fn start_heartbeat(self: &Arc<Self>, lock_name: &str) {
        let mut heartbeats = self.heartbeats.lock();
        if let Some(handle) = heartbeats.get(lock_name) {
            if handle.is_running() {
                return;
            }
        }
        let handle = HeartbeatHandle::spawn(
            Arc::downgrade(self),
            lock_name.to_string(),
            self.config.heartbeat_interval,
        );
        heartbeats.insert(lock_name.to_string(), handle);
    }

    /// Stop and join the renewal task for a lock name, if any
    pub fn stop_heartbeat(&self, lock_name: &str) {
        let handle = self.heartbeats.lock().remove(lock_name);
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    /// Stop and join every renewal task. Called on shutdown.
    pub fn stop_all_heartbeats(&self) {
        let handles: Vec<HeartbeatHandle> = {
            let mut heartbeats = self.heartbeats.lock();
            heartbeats.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.stop();
        }
    }

    /// Whether the renewal task for a lock name is still running
    pub fn heartbeat_running(&self, lock_name: &str) -> bool {
        self.heartbeats
            .lock()
            .get(lock_name)
            .map(|handle| handle.is_running())
            .unwrap_or(false)
    }

    /// Whether any runner currently holds the lock (stale or not)
    pub fn is_lock_held(&self, lock_name: &str) -> Result<bool> {
        Ok(self.read_record(lock_name)?.is_some())
    }

    /// Whether this runner holds the lock
    pub fn is_lock_held_by_me(&self, lock_name: &str) -> Result<bool> {
        Ok(self
            .read_record(lock_name)?
            .map(|record| record.runner_id == self.runner.id)
            .unwrap_or(false))
    }

    /// Current record for a lock name, if any
    pub fn get_lock_info(&self, lock_name: &str) -> Result<Option<LockRecord>> {
        self.read_record(lock_name)
    }

    /// Every lock record in the container. Undecodable records are
    /// skipped with a warning.
    pub fn get_all_locks(&self) -> Result<Vec<LockRecord>> {
        let mut records = Vec::new();
        for (key, bytes) in self.store.scan(&self.config.lock_container)? {
            match LockRecord::deserialize(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!("skipping undecodable lock record {}: {}", key, e),
            }
        }
        Ok(records)
    }

    /// Release every lock held by this runner, returning how many were
    /// released. Heartbeat tasks for them are stopped first.
    pub fn release_all_my_locks(&self) -> Result<usize> {
        let mine: Vec<LockRecord> = self
            .get_all_locks()?
            .into_iter()
            .filter(|record| record.runner_id == self.runner.id)
            .collect();

        let mut released = 0;
        for record in mine {
            self.stop_heartbeat(&record.lock_name);
            if self.release_lock(&record.lock_name)? {
                released += 1;
            }
        }
        Ok(released)
    }

    /// Delete every stale lock record, regardless of holder. Returns
    /// the number removed.
    pub fn cleanup_stale_locks(&self) -> Result<usize> {
        let now = now_millis();
        let mut removed = 0;
        for record in self.get_all_locks()? {
            if record.is_stale(now, self.config.staleness_threshold) {
                self.store
                    .delete(&self.config.lock_container, &record.lock_name)?;
                removed += 1;
                warn!(
                    "cleaned up stale lock {} held by {}",
                    record.lock_name, record.runner_id
                );
            }
        }
        if removed > 0 {
            self.telemetry
                .incr_counter("lock.cleanup.removed", removed as u64);
        }
        Ok(removed)
    }

    /// Snapshot of coordinator counters
    pub fn get_stats(&self) -> LockStats {
        let active_heartbeats = self
            .heartbeats
            .lock()
            .values()
            .filter(|handle| handle.is_running())
            .count();
        LockStats {
            acquired: self.counters.acquired.load(Ordering::Relaxed),
            contention: self.counters.contention.load(Ordering::Relaxed),
            takeovers: self.counters.takeovers.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
            renewals: self.counters.renewals.load(Ordering::Relaxed),
            mismatches: self.counters.mismatches.load(Ordering::Relaxed),
            active_heartbeats,
        }
    }

    fn read_record(&self, lock_name: &str) -> Result<Option<LockRecord>> {
        match self.store.get(&self.config.lock_container, lock_name)? {
            Some(bytes) => Ok(Some(LockRecord::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_record(&self, record: &LockRecord) -> Result<()> {
        let bytes = record.serialize()?;
        self.store
            .put(&self.config.lock_container, &record.lock_name, &bytes)?;
        Ok(())
    }

    fn write_fresh_record(
        &self,
        lock_name: &str,
        now: u64,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<()> {
        let mut metadata = metadata.unwrap_or_default();
        metadata
            .entry("pid".to_string())
            .or_insert_with(|| std::process::id().to_string());
        let record = LockRecord::new(lock_name, &self.runner.id, now, metadata);
        self.write_record(&record)
    }
}

impl Drop for LockCoordinator {
    fn drop(&mut self) {
        self.stop_all_heartbeats();
    }
}
