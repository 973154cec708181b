use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::storage::store::{RecordStore, Result, StoreError};

/// File extension for record files
const RECORD_EXT: &str = "rec";

/// File extension for in-flight temp files
const TEMP_EXT: &str = "tmp";

/// File-backed record store.
///
/// Layout: one directory per container under the root, one file per
/// record. Keys are hex-encoded to stay filesystem-safe. A record write
/// goes to a temp file, is synced, then renamed over the final path -
/// the rename is the per-record atomicity boundary the coordinators
/// rely on.
pub struct FileStore {
    root: PathBuf,

    /// Serializes mutations within this process. Cross-process callers
    /// are expected to coordinate through the lock coordinator.
    write_lock: Mutex<()>,

    /// Monotonic suffix so concurrent temp files never collide
    temp_seq: AtomicU64,
}

impl FileStore {
    /// Open a store rooted at the given directory, creating it if needed
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
            temp_seq: AtomicU64::new(0),
        })
    }

    /// Root directory this store operates in
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, container: &str) -> PathBuf {
        self.root.join(container)
    }

    fn record_path(&self, container: &str, key: &str) -> PathBuf {
        self.container_dir(container)
            .join(format!("{}.{}", hex::encode(key.as_bytes()), RECORD_EXT))
    }

    fn decode_key(container: &str, stem: &str) -> Result<String> {
        let bytes = hex::decode(stem).map_err(|e| StoreError::InvalidKey {
            container: container.to_string(),
            reason: e.to_string(),
        })?;
        String::from_utf8(bytes).map_err(|e| StoreError::InvalidKey {
            container: container.to_string(),
            reason: e.to_string(),
        })
    }
}

impl RecordStore for FileStore {
    fn put(&self, container: &str, key: &str, value: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock();

        let dir = self.container_dir(container);
        fs::create_dir_all(&dir)?;

        let seq = self.temp_seq.fetch_add(1, Ordering::SeqCst);
        let temp_path = dir.join(format!(
            "{}.{}.{}",
            hex::encode(key.as_bytes()),
            seq,
            TEMP_EXT
        ));

        {
            let mut file: File = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(value)?;
            file.sync_all()?;
        }

        let final_path = self.record_path(container, key);
        fs::rename(&temp_path, &final_path)?;
        Ok(())
    }

    fn get(&self, container: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.record_path(container, key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::IoError(e)),
        }
    }

    fn delete(&self, container: &str, key: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();

        let path = self.record_path(container, key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::IoError(e)),
        }
    }

    fn scan(&self, container: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let dir = self.container_dir(container);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::IoError(e)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue; // Skip temp files and strays
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem,
                None => continue,
            };
            let key = Self::decode_key(container, stem)?;
            let value = fs::read(&path)?;
            records.push((key, value));
        }

        // Directory order is arbitrary; keep scans deterministic
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }

    fn list_containers(&self) -> Result<Vec<String>> {
        let mut containers = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                containers.push(name.to_string());
            }
        }
        containers.sort();
        Ok(containers)
    }
}
