use std::collections::HashMap;

use parking_lot::RwLock;

use crate::storage::store::{RecordStore, Result};

/// In-memory record store.
///
/// Offers the same per-record atomicity as `FileStore` without any
/// durability. Used by tests and by embedders that want the coordinator
/// protocols without a storage directory.
#[derive(Default)]
pub struct MemoryStore {
    containers: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn put(&self, container: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut containers = self.containers.write();
        containers
            .entry(container.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, container: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let containers = self.containers.read();
        Ok(containers
            .get(container)
            .and_then(|records| records.get(key))
            .cloned())
    }

    fn delete(&self, container: &str, key: &str) -> Result<bool> {
        let mut containers = self.containers.write();
        Ok(containers
            .get_mut(container)
            .map(|records| records.remove(key).is_some())
            .unwrap_or(false))
    }

    fn scan(&self, container: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let containers = self.containers.read();
        let mut records: Vec<(String, Vec<u8>)> = containers
            .get(container)
            .map(|records| {
                records
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }

    fn list_containers(&self) -> Result<Vec<String>> {
        let containers = self.containers.read();
        let mut names: Vec<String> = containers.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
