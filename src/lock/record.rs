use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::types::{millis_since, TimestampMs};

/// Error type for lock record encoding
#[derive(Error, Debug)]
pub enum LockRecordError {
    #[error("Failed to serialize lock record: {0}")]
    SerializationError(String),

    #[error("Failed to deserialize lock record: {0}")]
    DeserializationError(String),
}

/// Result type for lock record operations
pub type Result<T> = std::result::Result<T, LockRecordError>;

/// Persisted state of one advisory lock.
///
/// A record exists while a runner holds (or held) the lock. Staleness
/// alone never removes a record - it only makes the record eligible for
/// takeover on acquire or deletion by stale-lock cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    /// Logical resource this lock guards
    pub lock_name: String,

    /// Identity of the holder
    pub runner_id: String,

    /// When the current holder acquired the lock
    pub acquired_at: TimestampMs,

    /// Last successful heartbeat renewal
    pub last_heartbeat: TimestampMs,

    /// Descriptive metadata captured at acquisition (pid, host, ...)
    pub metadata: HashMap<String, String>,

    /// Number of heartbeat renewals since acquisition
    pub renewal_count: u64,
}

impl LockRecord {
    /// Create a fresh record for a new acquisition
    pub fn new(
        lock_name: &str,
        runner_id: &str,
        now: TimestampMs,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            lock_name: lock_name.to_string(),
            runner_id: runner_id.to_string(),
            acquired_at: now,
            last_heartbeat: now,
            metadata,
            renewal_count: 0,
        }
    }

    /// Whether the holder has missed its heartbeat window
    pub fn is_stale(&self, now: TimestampMs, staleness_threshold: Duration) -> bool {
        millis_since(now, self.last_heartbeat) > staleness_threshold.as_millis() as u64
    }

    /// Record a successful heartbeat renewal
    pub fn renew(&mut self, now: TimestampMs) {
        self.last_heartbeat = now;
        self.renewal_count += 1;
    }

    /// Serialize the record to bytes
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| LockRecordError::SerializationError(e.to_string()))
    }

    /// Deserialize bytes into a record
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| LockRecordError::DeserializationError(e.to_string()))
    }
}
