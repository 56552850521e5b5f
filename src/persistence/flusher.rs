//! Background flusher
//!
//! Sole writer of persisted state. Watches store snapshots and writes the
//! latest one when the flush interval elapses or when enough mutations have
//! accumulated, whichever comes first. A failed write keeps the snapshot
//! dirty so the next trigger retries it. On cancellation the latest
//! snapshot is flushed once more before the task exits.
//!
//! After a reset the flusher deletes the documents instead of writing
//! empty ones, so learned data leaves the backend entirely.

use super::{delete_state, save_snapshot, BlobKeys, BlobStore};
use crate::config::PersistenceConfig;
use crate::error::{EngineError, Result};
use crate::store::StoreSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Reply = oneshot::Sender<Result<()>>;

enum FlushRequest {
    Flush(Reply),
    Clear(Reply),
}

impl FlushRequest {
    fn into_reply(self) -> Reply {
        match self {
            FlushRequest::Flush(reply) | FlushRequest::Clear(reply) => reply,
        }
    }
}

/// Requests an immediate flush from the running flusher
#[derive(Debug, Clone)]
pub struct FlushHandle {
    requests: mpsc::Sender<FlushRequest>,
}

impl FlushHandle {
    /// Flush now and wait for the outcome
    pub async fn flush(&self) -> Result<()> {
        self.request(FlushRequest::Flush).await
    }

    /// Delete the persisted documents if the store is empty, flush otherwise
    pub async fn clear(&self) -> Result<()> {
        self.request(FlushRequest::Clear).await
    }

    async fn request(&self, build: fn(Reply) -> FlushRequest) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(build(tx))
            .await
            .map_err(|_| EngineError::Other("flusher is not running".to_string()))?;
        rx.await
            .map_err(|_| EngineError::Other("flusher stopped before answering".to_string()))?
    }
}

/// Snapshot flusher
pub struct Flusher {
    store: Arc<dyn BlobStore>,
    keys: BlobKeys,
    snapshots: watch::Receiver<Arc<StoreSnapshot>>,
    interval: Duration,
    batch_size: u64,
    last_flushed: u64,
}

impl Flusher {
    pub fn new(
        store: Arc<dyn BlobStore>,
        keys: BlobKeys,
        mut snapshots: watch::Receiver<Arc<StoreSnapshot>>,
        config: &PersistenceConfig,
    ) -> Self {
        // The snapshot at startup is what was just loaded
        let last_flushed = snapshots.borrow_and_update().version();
        Self {
            store,
            keys,
            snapshots,
            interval: config.flush_interval,
            batch_size: config.flush_batch_size.max(1),
            last_flushed,
        }
    }

    /// Version of the last snapshot written successfully
    pub fn last_flushed(&self) -> u64 {
        self.last_flushed
    }

    /// Write the latest snapshot if it has unflushed mutations
    pub async fn flush(&mut self) -> Result<bool> {
        let snapshot = self.snapshots.borrow().clone();
        if snapshot.version() == self.last_flushed {
            return Ok(false);
        }

        save_snapshot(self.store.as_ref(), &self.keys, &snapshot).await?;
        self.last_flushed = snapshot.version();
        Ok(true)
    }

    /// Delete the persisted documents when the latest snapshot is empty
    ///
    /// A snapshot that gained data again is flushed instead.
    pub async fn clear(&mut self) -> Result<bool> {
        let snapshot = self.snapshots.borrow().clone();
        if !snapshot.is_empty() || !snapshot.behavior().is_empty() {
            return self.flush().await;
        }

        delete_state(self.store.as_ref(), &self.keys).await?;
        self.last_flushed = snapshot.version();
        Ok(true)
    }

    async fn clear_logged(&mut self) -> Result<()> {
        self.clear().await.map(|_| ()).map_err(|e| {
            warn!("Clearing persisted state failed: {}", e);
            e
        })
    }

    async fn flush_logged(&mut self) -> Result<()> {
        match self.flush().await {
            Ok(written) => {
                if written {
                    debug!("Flushed snapshot version {}", self.last_flushed);
                }
                Ok(())
            }
            Err(e) => {
                warn!("Flush failed, will retry: {}", e);
                Err(e)
            }
        }
    }

    /// Run until `cancel` fires or the store goes away
    ///
    /// Resolves to the outcome of the final flush.
    pub fn spawn(mut self, cancel: CancellationToken) -> (FlushHandle, JoinHandle<Result<()>>) {
        let (tx, mut requests) = mpsc::channel::<FlushRequest>(16);

        let handle = tokio::spawn(async move {
            info!(
                "Starting flusher (interval: {:?}, batch: {})",
                self.interval, self.batch_size
            );

            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = self.snapshots.changed() => {
                        if changed.is_err() {
                            debug!("Snapshot channel closed");
                            break;
                        }
                        let version = self.snapshots.borrow_and_update().version();
                        if version.saturating_sub(self.last_flushed) >= self.batch_size {
                            let _ = self.flush_logged().await;
                        }
                    }
                    Some(request) = requests.recv() => match request {
                        FlushRequest::Flush(reply) => {
                            let _ = reply.send(self.flush_logged().await);
                        }
                        FlushRequest::Clear(reply) => {
                            let _ = reply.send(self.clear_logged().await);
                        }
                    },
                    _ = ticker.tick() => {
                        let _ = self.flush_logged().await;
                    }
                }
            }

            // Answer requests that raced with shutdown
            requests.close();
            let result = self.flush_logged().await;
            while let Ok(request) = requests.try_recv() {
                let _ = request.into_reply().send(match &result {
                    Ok(()) => Ok(()),
                    Err(e) => Err(EngineError::Other(e.to_string())),
                });
            }

            info!("Flusher stopped at snapshot version {}", self.last_flushed);
            result
        });

        (FlushHandle { requests: tx }, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::BehaviorAggregates;
    use crate::persistence::{load_state, MemoryBlobStore};

    fn snapshot(version: u64) -> Arc<StoreSnapshot> {
        let mut snapshot = StoreSnapshot::from_records(Vec::new(), BehaviorAggregates::default());
        snapshot.version = version;
        Arc::new(snapshot)
    }

    fn config(batch: u64) -> PersistenceConfig {
        PersistenceConfig {
            flush_interval: Duration::from_secs(3600),
            flush_batch_size: batch,
            ..PersistenceConfig::default()
        }
    }

    #[tokio::test]
    async fn test_clean_snapshot_is_not_written() {
        let store = Arc::new(MemoryBlobStore::new());
        let (_tx, rx) = watch::channel(snapshot(0));
        let mut flusher = Flusher::new(store.clone(), BlobKeys::for_instance("t"), rx, &config(1));

        assert!(!flusher.flush().await.unwrap());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_is_retried() {
        let store = Arc::new(MemoryBlobStore::new());
        let (tx, rx) = watch::channel(snapshot(0));
        let mut flusher = Flusher::new(store.clone(), BlobKeys::for_instance("t"), rx, &config(1));

        tx.send_replace(snapshot(3));
        store.set_fail_writes(true);
        let err = flusher.flush().await.unwrap_err();
        assert!(matches!(err, EngineError::StorageWrite { .. }));
        assert_eq!(flusher.last_flushed(), 0);

        store.set_fail_writes(false);
        assert!(flusher.flush().await.unwrap());
        assert_eq!(flusher.last_flushed(), 3);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_batch_threshold_triggers_flush() {
        let store = Arc::new(MemoryBlobStore::new());
        let (tx, rx) = watch::channel(snapshot(0));
        let flusher = Flusher::new(store.clone(), BlobKeys::for_instance("t"), rx, &config(3));
        let cancel = CancellationToken::new();
        let (_handle, task) = flusher.spawn(cancel.clone());

        tx.send_replace(snapshot(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.write_count(), 0);

        tx.send_replace(snapshot(3));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.write_count(), 2);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_explicit_and_final_flush() {
        let store = Arc::new(MemoryBlobStore::new());
        let keys = BlobKeys::for_instance("t");
        let (tx, rx) = watch::channel(snapshot(0));
        let flusher = Flusher::new(store.clone(), keys.clone(), rx, &config(100));
        let cancel = CancellationToken::new();
        let (handle, task) = flusher.spawn(cancel.clone());

        tx.send_replace(snapshot(1));
        handle.flush().await.unwrap();
        assert_eq!(store.write_count(), 2);

        tx.send_replace(snapshot(2));
        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(store.write_count(), 4);
        assert!(handle.flush().await.is_err());

        let loaded = load_state(store.as_ref(), &keys).await;
        assert!(loaded.records.is_empty());
    }

    #[tokio::test]
    async fn test_clear_deletes_documents_of_an_empty_store() {
        let store = Arc::new(MemoryBlobStore::new());
        let keys = BlobKeys::for_instance("t");
        let (tx, rx) = watch::channel(snapshot(0));
        let mut flusher = Flusher::new(store.clone(), keys.clone(), rx, &config(100));

        tx.send_replace(snapshot(1));
        assert!(flusher.flush().await.unwrap());
        assert!(store.get(&keys.patterns).await.unwrap().is_some());

        tx.send_replace(snapshot(2));
        assert!(flusher.clear().await.unwrap());
        assert!(store.get(&keys.patterns).await.unwrap().is_none());
        assert!(store.get(&keys.behavior).await.unwrap().is_none());
        assert_eq!(flusher.last_flushed(), 2);

        // Nothing left to write, so the documents stay deleted
        assert!(!flusher.flush().await.unwrap());
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_clear_flushes_a_store_with_data() {
        use crate::types::{Observation, PatternKind, PatternRecord, UsageStats};
        use chrono::Utc;

        let store = Arc::new(MemoryBlobStore::new());
        let keys = BlobKeys::for_instance("t");
        let (tx, rx) = watch::channel(snapshot(0));
        let mut flusher = Flusher::new(store.clone(), keys.clone(), rx, &config(100));

        let obs = Observation::new(PatternKind::Test, "given/when/then", "kotlin");
        let record = PatternRecord {
            id: obs.pattern_id(),
            seq: 0,
            kind: obs.kind,
            content: obs.content,
            language: obs.language,
            context: obs.context,
            confidence: 0.5,
            usage: UsageStats::default(),
            adaptation_history: Vec::new(),
            created_at: Utc::now(),
            last_decayed_at: None,
        };
        let mut written = StoreSnapshot::from_records(vec![record], BehaviorAggregates::default());
        written.version = 4;
        tx.send_replace(Arc::new(written));

        assert!(flusher.clear().await.unwrap());
        assert_eq!(load_state(store.as_ref(), &keys).await.records.len(), 1);
    }

    #[tokio::test]
    async fn test_final_flush_failure_is_reported() {
        let store = Arc::new(MemoryBlobStore::new());
        let (tx, rx) = watch::channel(snapshot(0));
        let flusher = Flusher::new(store.clone(), BlobKeys::for_instance("t"), rx, &config(100));
        let cancel = CancellationToken::new();
        let (_handle, task) = flusher.spawn(cancel.clone());

        store.set_fail_writes(true);
        tx.send_replace(snapshot(1));
        cancel.cancel();
        assert!(task.await.unwrap().is_err());
    }
}
