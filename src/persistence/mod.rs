//! Durable persistence
//!
//! The store is persisted as two JSON documents per engine instance, one
//! for pattern records and one for behavior aggregates, written through a
//! pluggable [`BlobStore`] backend:
//!
//! - **memory**: nothing survives the process (default)
//! - **file**: one JSON file per document, atomic replace on write
//! - **sqlite**: key/value table via deadpool-sqlite
//!
//! Loading never fails the engine: unreadable documents are logged and the
//! engine starts empty; individually malformed records are skipped.

pub mod file;
pub mod flusher;
pub mod memory;
pub mod sqlite;

pub use file::FileBlobStore;
pub use flusher::{FlushHandle, Flusher};
pub use memory::MemoryBlobStore;
pub use sqlite::SqliteBlobStore;

use crate::behavior::{BehaviorAggregates, UserBehaviorAggregate};
use crate::config::{BackendKind, PersistenceConfig};
use crate::error::{EngineError, Result};
use crate::store::StoreSnapshot;
use crate::types::{Domain, PatternId, PatternRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Current document schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Key/value blob backend
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Open the backend selected by configuration
pub async fn open_blob_store(config: &PersistenceConfig) -> Result<Arc<dyn BlobStore>> {
    let path = || {
        config.path.clone().ok_or_else(|| {
            EngineError::InvalidConfig("persistence.path is required".to_string())
        })
    };

    let store: Arc<dyn BlobStore> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryBlobStore::new()),
        BackendKind::File => Arc::new(FileBlobStore::new(path()?)),
        BackendKind::Sqlite => Arc::new(SqliteBlobStore::open(path()?).await?),
    };
    info!("Using {} persistence backend", store.name());
    Ok(store)
}

/// Blob keys of one engine instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobKeys {
    pub patterns: String,
    pub behavior: String,
}

impl BlobKeys {
    pub fn for_instance(instance: &str) -> Self {
        Self {
            patterns: format!("{}/patterns", instance),
            behavior: format!("{}/behavior", instance),
        }
    }
}

/// State recovered from storage
#[derive(Debug, Clone, Default)]
pub struct PersistedState {
    pub records: Vec<PatternRecord>,
    pub behavior: BehaviorAggregates,
}

#[derive(Serialize)]
struct PatternDocumentOut<'a> {
    schema_version: u32,
    saved_at: DateTime<Utc>,
    patterns: BTreeMap<&'a PatternId, &'a PatternRecord>,
}

#[derive(Deserialize)]
struct PatternDocumentIn {
    #[serde(default)]
    schema_version: u32,
    #[serde(default)]
    patterns: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
struct BehaviorDocument {
    #[serde(default)]
    schema_version: u32,
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    domains: BTreeMap<Domain, UserBehaviorAggregate>,
}

/// Encode the pattern document of a snapshot
pub fn encode_patterns(snapshot: &StoreSnapshot) -> Result<Vec<u8>> {
    let document = PatternDocumentOut {
        schema_version: SCHEMA_VERSION,
        saved_at: Utc::now(),
        patterns: snapshot.iter().map(|p| (&p.id, p.as_ref())).collect(),
    };
    Ok(serde_json::to_vec(&document)?)
}

/// Encode the behavior document of a snapshot
pub fn encode_behavior(snapshot: &StoreSnapshot) -> Result<Vec<u8>> {
    let document = BehaviorDocument {
        schema_version: SCHEMA_VERSION,
        saved_at: Some(Utc::now()),
        domains: snapshot.behavior().domains.clone(),
    };
    Ok(serde_json::to_vec(&document)?)
}

/// Decode a pattern document, skipping records that do not parse
///
/// IDs are re-derived from each record's identity tuple, so documents
/// written with a different ID scheme load under current IDs.
pub fn decode_patterns(key: &str, bytes: &[u8]) -> Result<Vec<PatternRecord>> {
    let document: PatternDocumentIn =
        serde_json::from_slice(bytes).map_err(|e| EngineError::StorageRead {
            key: key.to_string(),
            message: e.to_string(),
        })?;

    if document.schema_version > SCHEMA_VERSION {
        warn!(
            "Pattern document '{}' has newer schema version {} (supported: {}), loading known fields",
            key, document.schema_version, SCHEMA_VERSION
        );
    }

    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(document.patterns.len());
    for (stored_id, value) in document.patterns {
        let mut record: PatternRecord = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping malformed pattern record '{}': {}", stored_id, e);
                continue;
            }
        };
        if record.content.trim().is_empty() || record.language.trim().is_empty() {
            warn!("Skipping pattern record '{}' without content or language", stored_id);
            continue;
        }

        let derived = PatternId::derive(record.kind, &record.content, &record.language, &record.context);
        if derived != record.id {
            debug!("Re-keyed pattern {} as {}", record.id, derived.short());
            record.id = derived;
        }
        if !seen.insert(record.id.clone()) {
            warn!("Skipping duplicate pattern record '{}'", stored_id);
            continue;
        }
        records.push(record);
    }
    Ok(records)
}

/// Decode a behavior document
pub fn decode_behavior(key: &str, bytes: &[u8]) -> Result<BehaviorAggregates> {
    let document: BehaviorDocument =
        serde_json::from_slice(bytes).map_err(|e| EngineError::StorageRead {
            key: key.to_string(),
            message: e.to_string(),
        })?;
    Ok(BehaviorAggregates {
        domains: document.domains,
    })
}

/// Load persisted state; failures degrade to an empty store
pub async fn load_state(store: &dyn BlobStore, keys: &BlobKeys) -> PersistedState {
    let records = match store.get(&keys.patterns).await {
        Ok(Some(bytes)) => decode_patterns(&keys.patterns, &bytes).unwrap_or_else(|e| {
            warn!("{}; starting with an empty pattern store", e);
            Vec::new()
        }),
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!("{}; starting with an empty pattern store", read_error(&keys.patterns, e));
            Vec::new()
        }
    };

    let behavior = match store.get(&keys.behavior).await {
        Ok(Some(bytes)) => decode_behavior(&keys.behavior, &bytes).unwrap_or_else(|e| {
            warn!("{}; starting without behavior aggregates", e);
            BehaviorAggregates::default()
        }),
        Ok(None) => BehaviorAggregates::default(),
        Err(e) => {
            warn!("{}; starting without behavior aggregates", read_error(&keys.behavior, e));
            BehaviorAggregates::default()
        }
    };

    info!(
        "Loaded {} patterns from {} backend",
        records.len(),
        store.name()
    );
    PersistedState { records, behavior }
}

fn read_error(key: &str, err: EngineError) -> EngineError {
    match err {
        EngineError::StorageRead { .. } => err,
        other => EngineError::StorageRead {
            key: key.to_string(),
            message: other.to_string(),
        },
    }
}

fn write_error(key: &str, err: EngineError) -> EngineError {
    match err {
        EngineError::StorageWrite { .. } => err,
        other => EngineError::StorageWrite {
            key: key.to_string(),
            message: other.to_string(),
        },
    }
}

/// Write both documents of a snapshot
pub async fn save_snapshot(store: &dyn BlobStore, keys: &BlobKeys, snapshot: &StoreSnapshot) -> Result<()> {
    let patterns = encode_patterns(snapshot)?;
    let behavior = encode_behavior(snapshot)?;

    store
        .put(&keys.patterns, patterns)
        .await
        .map_err(|e| write_error(&keys.patterns, e))?;
    store
        .put(&keys.behavior, behavior)
        .await
        .map_err(|e| write_error(&keys.behavior, e))?;

    debug!(
        "Persisted snapshot version {} ({} patterns)",
        snapshot.version(),
        snapshot.len()
    );
    Ok(())
}

/// Remove both documents of an instance
pub async fn delete_state(store: &dyn BlobStore, keys: &BlobKeys) -> Result<()> {
    store
        .delete(&keys.patterns)
        .await
        .map_err(|e| write_error(&keys.patterns, e))?;
    store
        .delete(&keys.behavior)
        .await
        .map_err(|e| write_error(&keys.behavior, e))?;

    info!("Deleted persisted state from {} backend", store.name());
    Ok(())
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    schema_version: u32,
    exported_at: DateTime<Utc>,
    patterns: Vec<&'a PatternRecord>,
    behavior: &'a BTreeMap<Domain, UserBehaviorAggregate>,
}

/// Human-readable dump of everything the engine has learned
pub fn export_json(snapshot: &StoreSnapshot) -> Result<String> {
    let document = ExportDocument {
        schema_version: SCHEMA_VERSION,
        exported_at: Utc::now(),
        patterns: snapshot.iter().map(|p| p.as_ref()).collect(),
        behavior: &snapshot.behavior().domains,
    };
    Ok(serde_json::to_string_pretty(&document)?)
}
