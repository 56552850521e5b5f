//! Common test utilities and helpers
#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use patternwise_core::{
    Engine, EngineConfig, MemoryBlobStore, Observation, PatternContext, PatternKind, PatternRecord,
    UsageStats,
};
use std::sync::Arc;

/// Default configuration with the background scheduler off
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.instance = "test".to_string();
    config.maintenance.enabled = false;
    config
}

/// Engine over a fresh in-memory backend
pub async fn create_test_engine() -> (Engine, Arc<MemoryBlobStore>) {
    create_engine_with(test_config()).await
}

pub async fn create_engine_with(config: EngineConfig) -> (Engine, Arc<MemoryBlobStore>) {
    let blobs = Arc::new(MemoryBlobStore::new());
    let engine = Engine::init_with_store(config, blobs.clone())
        .await
        .expect("Failed to start test engine");
    (engine, blobs)
}

pub fn ui_context() -> PatternContext {
    PatternContext::new().with("domain", "ui")
}

/// A stored record as it would appear in a persisted document
pub fn stored_record(
    kind: PatternKind,
    content: &str,
    language: &str,
    confidence: f64,
    suggested: u64,
    last_used: DateTime<Utc>,
) -> PatternRecord {
    let obs = Observation::new(kind, content, language);
    PatternRecord {
        id: obs.pattern_id(),
        seq: 0,
        kind,
        content: obs.content,
        language: obs.language,
        context: obs.context,
        confidence,
        usage: UsageStats {
            suggested_count: suggested,
            accepted_count: 0,
            rejected_count: 0,
            last_used,
        },
        adaptation_history: Vec::new(),
        created_at: last_used - Duration::days(1),
        last_decayed_at: None,
    }
}

/// Write a pattern document for `instance` straight into the backend
pub fn seed_patterns(blobs: &MemoryBlobStore, instance: &str, records: &[PatternRecord]) {
    let patterns: serde_json::Map<String, serde_json::Value> = records
        .iter()
        .map(|r| (r.id.to_string(), serde_json::to_value(r).unwrap()))
        .collect();
    let document = serde_json::json!({
        "schema_version": 1,
        "patterns": patterns,
    });
    blobs.insert(
        &format!("{}/patterns", instance),
        serde_json::to_vec(&document).unwrap(),
    );
}
