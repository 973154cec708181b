use thiserror::Error;

/// Error type for record store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid key encoding in container {container}: {reason}")]
    InvalidKey { container: String, reason: String },
}

/// Result type for record store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable key-value store with atomic per-record operations.
///
/// Containers are flat namespaces of keyed records. Each `put`, `get` and
/// `delete` is atomic for a single record; the store offers no
/// multi-record or multi-container transactions. The coordinators built
/// on top provide those semantics through write-ahead logging.
pub trait RecordStore: Send + Sync {
    /// Write a record, replacing any previous value for the key
    fn put(&self, container: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Read a record, `None` if the key is absent
    fn get(&self, container: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a record, returning whether it existed
    fn delete(&self, container: &str, key: &str) -> Result<bool>;

    /// All records of a container as (key, value) pairs.
    /// A container that was never written to scans as empty.
    fn scan(&self, container: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Names of every container that has been written to, sorted
    fn list_containers(&self) -> Result<Vec<String>>;
}
