use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::types::{now_millis, TimestampMs};
use crate::storage::store::{RecordStore, StoreError};

/// Default container holding the persisted runner identity
pub const RUNNER_METADATA_CONTAINER: &str = "runner_meta";

/// Fixed key of the identity record inside the metadata container
const RUNNER_METADATA_KEY: &str = "identity";

/// Error type for runner identity operations
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Failed to serialize runner identity: {0}")]
    SerializationError(String),
}

/// Result type for runner identity operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Identity of one process/instance capable of holding locks.
///
/// Generated once per storage directory (timestamp + random suffix +
/// process id) and persisted, so a restarted process that still sees the
/// metadata record reuses its identity instead of minting a new one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunnerIdentity {
    /// Unique runner id string
    pub id: String,

    /// When this identity was first generated
    pub created_at: TimestampMs,
}

impl RunnerIdentity {
    /// Generate a fresh identity without persisting it
    pub fn generate() -> Self {
        let now = now_millis();
        let suffix: u32 = rand::thread_rng().gen_range(0..0x1000000);
        Self {
            id: format!("runner-{}-{:06x}-{}", now, suffix, std::process::id()),
            created_at: now,
        }
    }

    /// Load the persisted identity, or generate and persist a new one.
    ///
    /// A metadata record that fails to decode is treated as corrupt and
    /// replaced; locks held under the lost identity will age out through
    /// staleness.
    pub fn load_or_create(store: &dyn RecordStore, container: &str) -> Result<Self> {
        if let Some(bytes) = store.get(container, RUNNER_METADATA_KEY)? {
            match bincode::deserialize::<RunnerIdentity>(&bytes) {
                Ok(identity) => {
                    info!("loaded runner identity {}", identity.id);
                    return Ok(identity);
                }
                Err(e) => {
                    warn!("runner metadata corrupt, regenerating identity: {}", e);
                }
            }
        }

        let identity = Self::generate();
        let bytes = bincode::serialize(&identity)
            .map_err(|e| RunnerError::SerializationError(e.to_string()))?;
        store.put(container, RUNNER_METADATA_KEY, &bytes)?;
        info!("generated runner identity {}", identity.id);
        Ok(identity)
    }
}
