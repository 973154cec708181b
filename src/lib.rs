// Duralog - write-ahead transaction and advisory lock coordination
// for embedded key-value storage

pub mod common;
pub mod lock;
pub mod runner;
pub mod storage;
pub mod telemetry;
pub mod transaction;

// Re-export key items for convenient access
pub use storage::store::{RecordStore, StoreError};
pub use storage::file_store::FileStore;
pub use storage::memory::MemoryStore;
pub use runner::RunnerIdentity;
pub use transaction::coordinator::{TransactionCoordinator, TransactionCoordinatorConfig};
pub use transaction::record::{PendingOp, TransactionRecord, TransactionState};
pub use lock::coordinator::{LockCoordinator, LockCoordinatorConfig};
pub use lock::record::LockRecord;
