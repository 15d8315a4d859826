//! Key-value store boundary.
//!
//! The runtime persists network records and IP allocation bitmaps through
//! this interface only. The default implementation keeps one file per key
//! under a bucket directory; an in-memory implementation backs unit tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{Result, VesselError};

/// Bucket-scoped byte-value store.
///
/// Implementations must serialize conflicting writes; callers rely on
/// single-writer semantics per bucket.
pub trait KvStore: Send + Sync {
    /// Stores `value` under `key` in `bucket`, creating the bucket if needed.
    fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Returns the value stored under `key`, or `None` if absent.
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Removes `key` from `bucket`. Removing an absent key is a no-op.
    fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    /// Returns every key/value pair in `bucket`.
    fn get_all(&self, bucket: &str) -> Result<HashMap<String, Vec<u8>>>;
}

/// File-backed store: `<root>/<bucket>/<key>` holds the raw value bytes.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Creates a store rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    fn key_path(&self, bucket: &str, key: &str) -> PathBuf {
        // Keys may not contain path separators; bucket and key names are
        // chosen by the runtime, not by end users.
        self.root.join(bucket).join(key.replace('/', "_"))
    }
}

impl KvStore for FileStore {
    fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let dir = self.root.join(bucket);
        std::fs::create_dir_all(&dir).map_err(|e| VesselError::io(&dir, e))?;
        let path = self.key_path(bucket, key);
        std::fs::write(&path, value).map_err(|e| VesselError::io(path, e))
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let path = self.key_path(bucket, key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VesselError::io(path, e)),
        }
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let path = self.key_path(bucket, key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VesselError::io(path, e)),
        }
    }

    fn get_all(&self, bucket: &str) -> Result<HashMap<String, Vec<u8>>> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let dir = self.root.join(bucket);
        let mut result = HashMap::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(result),
            Err(e) => return Err(VesselError::io(dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| VesselError::io(&dir, e))?;
            if !entry.path().is_file() {
                continue;
            }
            let key = entry.file_name().to_string_lossy().into_owned();
            let value =
                std::fs::read(entry.path()).map_err(|e| VesselError::io(entry.path(), e))?;
            let _ = result.insert(key, value);
        }
        Ok(result)
    }
}

/// In-memory store for unit tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut buckets = self.buckets.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let _ = buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let buckets = self.buckets.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(buckets.get(bucket).and_then(|b| b.get(key)).cloned())
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let mut buckets = self.buckets.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(b) = buckets.get_mut(bucket) {
            let _ = b.remove(key);
        }
        Ok(())
    }

    fn get_all(&self, bucket: &str) -> Result<HashMap<String, Vec<u8>>> {
        let buckets = self.buckets.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(buckets.get(bucket).cloned().unwrap_or_default())
    }
}
