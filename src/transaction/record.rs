use linked_hash_map::LinkedHashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::types::{now_millis, TimestampMs};

/// Error type for transaction record encoding
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Failed to serialize transaction record: {0}")]
    SerializationError(String),

    #[error("Failed to deserialize transaction record: {0}")]
    DeserializationError(String),
}

/// Result type for transaction record operations
pub type Result<T> = std::result::Result<T, RecordError>;

/// States of a transaction log record.
///
/// Monotonic `Pending -> Committed -> Applied`, with `Failed` as the
/// single escape hatch (rollback, apply error, or recovery error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Mutations are being staged in memory; nothing persisted yet
    Pending,
    /// Log record is durable; staged writes may or may not have landed
    Committed,
    /// Every staged write reached its target container
    Applied,
    /// Rolled back, or application raised an error
    Failed,
}

/// Operation descriptor staged for the work-queue container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOp {
    /// Unique operation id; also its key in the work-queue container
    pub op_id: String,

    /// Free-form operation kind, interpreted by the queue consumer
    pub op_type: String,

    /// Serialized operation payload
    pub payload: Vec<u8>,
}

/// Write-ahead log record describing one multi-container transaction.
///
/// Persisting this record in `Committed` state is the durability
/// boundary: everything needed to finish (or re-finish) the transaction
/// is inside it, and re-applying it is idempotent - model writes are
/// last-write-wins per key and index appends skip ids already present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Unique transaction id, generated at begin
    pub id: String,

    /// When the transaction was begun
    pub created_at: TimestampMs,

    /// Current lifecycle state
    pub state: TransactionState,

    /// Set when the record was persisted as committed
    pub committed_at: Option<TimestampMs>,

    /// Set when every staged write was applied
    pub applied_at: Option<TimestampMs>,

    /// Staged model writes: target container -> key -> serialized value.
    /// Iteration order is staging order.
    pub model_changes: LinkedHashMap<String, LinkedHashMap<String, Vec<u8>>>,

    /// Optional operation to enqueue as part of the same transaction
    pub pending_op: Option<PendingOp>,

    /// Index appends: index container -> operation ids to append
    pub index_entries: LinkedHashMap<String, Vec<String>>,

    /// Set only when `state == Failed`
    pub error_message: Option<String>,
}

impl TransactionRecord {
    /// Create a new pending record with a freshly generated id
    pub fn new() -> Self {
        let now = now_millis();
        let suffix: u32 = rand::thread_rng().gen_range(0..0x1000000);
        Self {
            id: format!("txn-{}-{:06x}", now, suffix),
            created_at: now,
            state: TransactionState::Pending,
            committed_at: None,
            applied_at: None,
            model_changes: LinkedHashMap::new(),
            pending_op: None,
            index_entries: LinkedHashMap::new(),
            error_message: None,
        }
    }

    /// Stage one model write (last write per key wins)
    pub fn stage_model_change(&mut self, container: &str, key: &str, value: Vec<u8>) {
        self.model_changes
            .entry(container.to_string())
            .or_insert_with(LinkedHashMap::new)
            .insert(key.to_string(), value);
    }

    /// Stage an index append for the given index container
    pub fn stage_index_entry(&mut self, index_container: &str, op_id: &str) {
        self.index_entries
            .entry(index_container.to_string())
            .or_insert_with(Vec::new)
            .push(op_id.to_string());
    }

    /// Transition to committed
    pub fn mark_committed(&mut self, now: TimestampMs) {
        self.state = TransactionState::Committed;
        self.committed_at = Some(now);
    }

    /// Transition to applied
    pub fn mark_applied(&mut self, now: TimestampMs) {
        self.state = TransactionState::Applied;
        self.applied_at = Some(now);
    }

    /// Transition to failed with a reason
    pub fn mark_failed(&mut self, reason: &str) {
        self.state = TransactionState::Failed;
        self.error_message = Some(reason.to_string());
    }

    /// A record that was persisted committed but whose staged writes
    /// never finished - the crash-recovery case
    pub fn is_incomplete(&self) -> bool {
        self.state == TransactionState::Committed && self.applied_at.is_none()
    }

    /// Serialize the record to bytes
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| RecordError::SerializationError(e.to_string()))
    }

    /// Deserialize bytes into a record
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| RecordError::DeserializationError(e.to_string()))
    }
}

impl Default for TransactionRecord {
    fn default() -> Self {
        Self::new()
    }
}
