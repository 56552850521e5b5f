//! SQLite blob backend
//!
//! Stores blobs in a single key/value table, with connection pooling via
//! deadpool-sqlite. Each `put` is an upsert in its own statement.

use super::BlobStore;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use deadpool_sqlite::{Config, Pool, Runtime};
use std::path::Path;
use tracing::{debug, info};

/// SQLite-backed blob store
pub struct SqliteBlobStore {
    pool: Pool,
}

impl SqliteBlobStore {
    /// Open (or create) the database and its blob table
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let path_str = db_path.to_string_lossy().to_string();
        info!("Opening sqlite pattern store at: {}", path_str);

        let pool = Config::new(path_str).create_pool(Runtime::Tokio1).map_err(|e| {
            EngineError::Database(format!("Failed to create connection pool: {}", e))
        })?;

        let store = Self { pool };
        store.create_table().await?;
        Ok(store)
    }

    async fn create_table(&self) -> Result<()> {
        let conn = self.connection().await?;
        conn.interact(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS blobs (
                    key TEXT PRIMARY KEY,
                    value BLOB NOT NULL,
                    updated_at TEXT NOT NULL
                )",
            )
            .map_err(|e| EngineError::Database(format!("Failed to create blob table: {}", e)))
        })
        .await
        .map_err(|e| EngineError::Database(format!("Pool interaction failed: {}", e)))??;
        Ok(())
    }

    async fn connection(&self) -> Result<deadpool_sqlite::Object> {
        self.pool.get().await.map_err(|e| {
            EngineError::Database(format!("Failed to get connection from pool: {}", e))
        })
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.connection().await?;
        let key_owned = key.to_string();

        let value = conn
            .interact(move |conn| -> Result<Option<Vec<u8>>> {
                let result = conn.query_row(
                    "SELECT value FROM blobs WHERE key = ?",
                    rusqlite::params![key_owned],
                    |row| row.get::<_, Vec<u8>>(0),
                );
                match result {
                    Ok(bytes) => Ok(Some(bytes)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(EngineError::Database(format!("Failed to read blob: {}", e))),
                }
            })
            .await
            .map_err(|e| EngineError::Database(format!("Pool interaction failed: {}", e)))??;

        debug!("Read blob '{}' ({} bytes)", key, value.as_ref().map_or(0, Vec::len));
        Ok(value)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let conn = self.connection().await?;
        let key_owned = key.to_string();
        let len = value.len();

        conn.interact(move |conn| -> Result<()> {
            conn.execute(
                "INSERT INTO blobs (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![key_owned, value, chrono::Utc::now().to_rfc3339()],
            )
            .map_err(|e| EngineError::Database(format!("Failed to write blob: {}", e)))?;
            Ok(())
        })
        .await
        .map_err(|e| EngineError::Database(format!("Pool interaction failed: {}", e)))??;

        debug!("Wrote blob '{}' ({} bytes)", key, len);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let conn = self.connection().await?;
        let key_owned = key.to_string();

        conn.interact(move |conn| -> Result<()> {
            conn.execute("DELETE FROM blobs WHERE key = ?", rusqlite::params![key_owned])
                .map_err(|e| EngineError::Database(format!("Failed to delete blob: {}", e)))?;
            Ok(())
        })
        .await
        .map_err(|e| EngineError::Database(format!("Pool interaction failed: {}", e)))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteBlobStore::open(temp_dir.path().join("nested/patterns.db"))
            .await
            .unwrap();

        assert!(store.get("default/patterns").await.unwrap().is_none());

        store.put("default/patterns", b"first".to_vec()).await.unwrap();
        store.put("default/patterns", b"second".to_vec()).await.unwrap();
        assert_eq!(
            store.get("default/patterns").await.unwrap().as_deref(),
            Some(&b"second"[..])
        );

        store.delete("default/patterns").await.unwrap();
        assert!(store.get("default/patterns").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("patterns.db");

        {
            let store = SqliteBlobStore::open(&path).await.unwrap();
            store.put("k", b"v".to_vec()).await.unwrap();
        }

        let store = SqliteBlobStore::open(&path).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }
}
