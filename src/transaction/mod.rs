// Transaction coordination module: write-ahead log records, the
// coordinator protocol, and the startup recovery / purge passes

pub mod coordinator;
pub mod record;
pub mod recovery;
pub mod sweeper;

// Public exports
pub use coordinator::{TransactionCoordinator, TransactionCoordinatorConfig, TransactionError};
pub use record::{PendingOp, TransactionRecord, TransactionState};
pub use recovery::{PurgeReport, RecoveryReport, TransactionStats};
pub use sweeper::PurgeTaskHandle;
