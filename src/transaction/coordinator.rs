use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::common::types::{now_millis, INDEX_ORDER_KEY};
use crate::storage::store::{RecordStore, StoreError};
use crate::telemetry::{AuditSink, TelemetrySink};
use crate::transaction::record::{PendingOp, RecordError, TransactionRecord};
use crate::transaction::sweeper::PurgeTaskHandle;

/// Error type for transaction coordinator operations
#[derive(Error, Debug)]
pub enum TransactionError {
    /// Programmer misuse: `begin` before the prior transaction finished
    #[error("A transaction is already in progress")]
    AlreadyInProgress,

    /// Programmer misuse: mutation or commit with no open transaction
    #[error("No transaction is in progress")]
    NotInProgress,

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Record error: {0}")]
    RecordError(#[from] RecordError),

    #[error("Failed to serialize staged value for {container}/{key}: {reason}")]
    StagedValueError {
        container: String,
        key: String,
        reason: String,
    },
}

/// Result type for transaction coordinator operations
pub type Result<T> = std::result::Result<T, TransactionError>;

/// Configuration for the transaction coordinator
#[derive(Debug, Clone)]
pub struct TransactionCoordinatorConfig {
    /// Container holding the transaction log records
    pub log_container: String,

    /// Container receiving enqueued pending operations
    pub work_queue_container: String,

    /// How long applied records are retained before purge
    pub applied_grace: Duration,

    /// How long failed records are retained for diagnosis before purge
    pub failed_grace: Duration,

    /// Interval of the periodic purge sweep task
    pub purge_interval: Duration,
}

impl Default for TransactionCoordinatorConfig {
    fn default() -> Self {
        Self {
            log_container: "txn_log".to_string(),
            work_queue_container: "op_queue".to_string(),
            applied_grace: Duration::from_secs(60 * 60),
            failed_grace: Duration::from_secs(24 * 60 * 60),
            purge_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Write-ahead transaction coordinator.
///
/// Emulates atomic multi-container mutation on a store that only offers
/// atomic single-record writes: all mutations are staged into one
/// `TransactionRecord`, the record is persisted in `Committed` state
/// (the atomicity boundary), and only then are the staged writes applied
/// to their target containers. A crash between those two steps leaves an
/// incomplete record that startup recovery re-applies.
///
/// One transaction may be in flight per coordinator instance; beginning
/// a second one is a programming error, not a retryable condition.
pub struct TransactionCoordinator {
    store: Arc<dyn RecordStore>,
    telemetry: Arc<dyn TelemetrySink>,
    audit: Arc<dyn AuditSink>,
    config: TransactionCoordinatorConfig,

    /// The single in-flight transaction, if any
    current: Mutex<Option<TransactionRecord>>,

    /// Periodic purge sweep task, if started
    purge_task: Mutex<Option<PurgeTaskHandle>>,
}

impl TransactionCoordinator {
    /// Create a coordinator over the given store
    pub fn new(
        store: Arc<dyn RecordStore>,
        telemetry: Arc<dyn TelemetrySink>,
        audit: Arc<dyn AuditSink>,
        config: TransactionCoordinatorConfig,
    ) -> Self {
        Self {
            store,
            telemetry,
            audit,
            config,
            current: Mutex::new(None),
            purge_task: Mutex::new(None),
        }
    }

    /// Start the periodic purge sweep task. A task already running is
    /// left in place.
    pub fn start_purge_task(self: &Arc<Self>) {
        let mut purge_task = self.purge_task.lock();
        if let Some(handle) = purge_task.as_ref() {
            if handle.is_running() {
                return;
            }
        }
        *purge_task = Some(PurgeTaskHandle::spawn(
            Arc::downgrade(self),
            self.config.purge_interval,
        ));
    }

    /// Stop and join the purge sweep task, if running
    pub fn stop_purge_task(&self) {
        if let Some(handle) = self.purge_task.lock().take() {
            handle.stop();
        }
    }

    /// Whether the purge sweep task is running
    pub fn purge_task_running(&self) -> bool {
        self.purge_task
            .lock()
            .as_ref()
            .map(|handle| handle.is_running())
            .unwrap_or(false)
    }

    /// Coordinator configuration
    pub fn config(&self) -> &TransactionCoordinatorConfig {
        &self.config
    }

    /// Whether a transaction is currently in flight
    pub fn in_progress(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Begin a new transaction, returning its id.
    ///
    /// The pending record lives only in memory until commit; nothing is
    /// persisted yet.
    pub fn begin_transaction(&self) -> Result<String> {
        let mut current = self.current.lock();
        if current.is_some() {
            return Err(TransactionError::AlreadyInProgress);
        }

        let record = TransactionRecord::new();
        let id = record.id.clone();
        *current = Some(record);
        debug!("began transaction {}", id);
        Ok(id)
    }

    /// Stage a model write into the in-flight transaction.
    ///
    /// The value is serialized now, so replay during recovery rewrites
    /// the exact bytes staged here.
    pub fn write_model_state<T: Serialize + ?Sized>(
        &self,
        container: &str,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let bytes =
            bincode::serialize(value).map_err(|e| TransactionError::StagedValueError {
                container: container.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        let mut current = self.current.lock();
        let record = current.as_mut().ok_or(TransactionError::NotInProgress)?;
        record.stage_model_change(container, key, bytes);
        Ok(())
    }

    /// Stage an operation for the work-queue container
    pub fn enqueue_pending_op(&self, op: PendingOp) -> Result<()> {
        let mut current = self.current.lock();
        let record = current.as_mut().ok_or(TransactionError::NotInProgress)?;
        record.pending_op = Some(op);
        Ok(())
    }

    /// Stage an ordered-index append for the given index container
    pub fn add_index_entry(&self, index_container: &str, op_id: &str) -> Result<()> {
        let mut current = self.current.lock();
        let record = current.as_mut().ok_or(TransactionError::NotInProgress)?;
        record.stage_index_entry(index_container, op_id);
        Ok(())
    }

    /// Commit the in-flight transaction.
    ///
    /// Persists the record as `Committed` (after which the transaction
    /// survives a crash), applies every staged write, then persists the
    /// record as `Applied`. An error while applying marks the record
    /// `Failed` with the error text and propagates to the caller. The
    /// in-flight slot is cleared regardless of outcome.
    pub fn commit_transaction(&self) -> Result<()> {
        let mut record = self
            .current
            .lock()
            .take()
            .ok_or(TransactionError::NotInProgress)?;

        record.mark_committed(now_millis());
        self.persist_record(&record)?;

        match self.apply_record(&record) {
            Ok(()) => {
                record.mark_applied(now_millis());
                self.persist_record(&record)?;
                self.telemetry.incr_counter("txn.commit.success", 1);
                info!("committed transaction {}", record.id);
                Ok(())
            }
            Err(e) => {
                record.mark_failed(&e.to_string());
                if let Err(persist_err) = self.persist_record(&record) {
                    warn!(
                        "failed to persist failure state for transaction {}: {}",
                        record.id, persist_err
                    );
                }
                self.telemetry.incr_counter("txn.commit.failure", 1);
                warn!("transaction {} failed to apply: {}", record.id, e);
                Err(e)
            }
        }
    }

    /// Roll back the in-flight transaction.
    ///
    /// No target-container writes have happened yet, so this only marks
    /// the record failed and persists it for diagnosis.
    pub fn rollback_transaction(&self) -> Result<()> {
        let mut record = self
            .current
            .lock()
            .take()
            .ok_or(TransactionError::NotInProgress)?;

        record.mark_failed("rolled back");
        self.persist_record(&record)?;
        self.telemetry.incr_counter("txn.rollback", 1);
        info!("rolled back transaction {}", record.id);
        Ok(())
    }

    /// Persist a log record under its id
    pub(crate) fn persist_record(&self, record: &TransactionRecord) -> Result<()> {
        let bytes = record.serialize()?;
        self.store
            .put(&self.config.log_container, &record.id, &bytes)?;
        Ok(())
    }

    /// Apply every staged write of a committed record to its targets.
    ///
    /// Safe to re-run: model puts are last-write-wins and index appends
    /// skip ids that already landed.
    pub(crate) fn apply_record(&self, record: &TransactionRecord) -> Result<()> {
        for (container, changes) in &record.model_changes {
            for (key, value) in changes {
                self.store.put(container, key, value)?;
            }
        }

        if let Some(op) = &record.pending_op {
            let bytes = bincode::serialize(op).map_err(|e| {
                TransactionError::StagedValueError {
                    container: self.config.work_queue_container.clone(),
                    key: op.op_id.clone(),
                    reason: e.to_string(),
                }
            })?;
            self.store
                .put(&self.config.work_queue_container, &op.op_id, &bytes)?;
        }

        for (index_container, op_ids) in &record.index_entries {
            self.append_index_entries(index_container, op_ids)?;
        }

        Ok(())
    }

    /// Read-modify-write append to an index container's ordered list.
    /// The store has no list-append primitive, so the whole list is
    /// rewritten.
    fn append_index_entries(&self, index_container: &str, op_ids: &[String]) -> Result<()> {
        let mut order: Vec<String> = match self.store.get(index_container, INDEX_ORDER_KEY)? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map_err(|e| RecordError::DeserializationError(e.to_string()))?,
            None => Vec::new(),
        };

        let mut changed = false;
        for op_id in op_ids {
            if !order.contains(op_id) {
                order.push(op_id.clone());
                changed = true;
            }
        }

        if changed {
            let bytes = bincode::serialize(&order)
                .map_err(|e| RecordError::SerializationError(e.to_string()))?;
            self.store.put(index_container, INDEX_ORDER_KEY, &bytes)?;
        }
        Ok(())
    }

    pub(crate) fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub(crate) fn telemetry(&self) -> &dyn TelemetrySink {
        self.telemetry.as_ref()
    }

    pub(crate) fn audit(&self) -> &dyn AuditSink {
        self.audit.as_ref()
    }
}
