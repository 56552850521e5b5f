//! In-memory blob backend
//!
//! Used when durability is not wanted and by tests. Writes can be made to
//! fail on demand to exercise the flush retry path.

use super::BlobStore;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

/// In-memory blob store
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Seed a blob directly, bypassing the failure switch
    pub fn insert(&self, key: &str, value: Vec<u8>) {
        let mut blobs = match self.blobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        blobs.insert(key.to_string(), value);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let blobs = match self.blobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(blobs.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EngineError::StorageWrite {
                key: key.to_string(),
                message: "writes disabled".to_string(),
            });
        }
        self.insert(key, value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EngineError::StorageWrite {
                key: key.to_string(),
                message: "writes disabled".to_string(),
            });
        }
        let mut blobs = match self.blobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        blobs.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failing_writes() {
        let store = MemoryBlobStore::new();
        store.put("a", vec![1]).await.unwrap();

        store.set_fail_writes(true);
        let err = store.put("a", vec![2]).await.unwrap_err();
        assert!(matches!(err, EngineError::StorageWrite { .. }));
        assert_eq!(store.get("a").await.unwrap(), Some(vec![1]));

        store.set_fail_writes(false);
        store.put("a", vec![3]).await.unwrap();
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_deletes() {
        let store = MemoryBlobStore::new();
        store.insert("a", vec![1]);

        store.set_fail_writes(true);
        assert!(store.delete("a").await.is_err());
        assert!(store.get("a").await.unwrap().is_some());

        store.set_fail_writes(false);
        store.delete("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }
}
