pub mod store;
pub mod file_store;
pub mod memory;

pub use store::{RecordStore, StoreError};
pub use file_store::FileStore;
pub use memory::MemoryStore;
