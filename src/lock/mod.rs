// Advisory lock coordination module: lock records, the acquire /
// takeover / heartbeat / release protocol, and periodic renewal tasks

pub mod coordinator;
pub mod heartbeat;
pub mod record;

// Public exports
pub use coordinator::{LockCoordinator, LockCoordinatorConfig, LockError, LockStats};
pub use heartbeat::HeartbeatHandle;
pub use record::LockRecord;
