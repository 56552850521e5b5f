//! Durability tests: restart round trips, failed writes and tolerant loading
mod common;

use chrono::{Duration, Utc};
use common::{create_engine_with, create_test_engine, seed_patterns, stored_record, test_config, ui_context};
use patternwise_core::{
    BackendKind, BlobStore, Engine, EngineConfig, EngineError, FeedbackAction, FeedbackEvent,
    MemoryBlobStore, Observation, PatternKind,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn backend_config(backend: BackendKind, path: &Path) -> EngineConfig {
    let mut config = test_config();
    config.persistence.backend = backend;
    config.persistence.path = Some(path.to_path_buf());
    config
}

async fn learn_and_stop(config: EngineConfig) -> patternwise_core::PatternId {
    let engine = Engine::init(config).await.unwrap();
    let id = engine
        .observe(Observation::new(PatternKind::Naming, "camelCase", "typescript").with_context(ui_context()))
        .await
        .unwrap();
    engine
        .apply_feedback(FeedbackEvent::new(id.clone(), FeedbackAction::Accept))
        .await
        .unwrap();
    engine.shutdown().await.unwrap();
    id
}

#[tokio::test]
async fn test_file_backend_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = backend_config(BackendKind::File, dir.path());

    let id = learn_and_stop(config.clone()).await;

    let engine = Engine::init(config).await.unwrap();
    let record = engine.get(&id).expect("pattern reloaded");
    assert!((record.confidence - 0.6).abs() < 1e-9);
    assert_eq!(record.usage.accepted_count, 1);
    assert_eq!(record.adaptation_history.len(), 1);

    let behavior = engine.insights(5).behavior;
    assert_eq!(behavior.len(), 1);
    assert_eq!(behavior[0].accepted, 1);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sqlite_backend_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = backend_config(BackendKind::Sqlite, &dir.path().join("patterns.db"));

    let id = learn_and_stop(config.clone()).await;

    let engine = Engine::init(config).await.unwrap();
    let record = engine.get(&id).expect("pattern reloaded");
    assert!((record.confidence - 0.6).abs() < 1e-9);
    assert_eq!(record.usage.suggested_count, 1);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_flush_reports_storage_write_and_recovers() {
    let (engine, blobs) = create_test_engine().await;
    engine
        .observe(Observation::new(PatternKind::Style, "trailing commas", "javascript"))
        .await
        .unwrap();

    blobs.set_fail_writes(true);
    let err = engine.flush().await.unwrap_err();
    assert!(matches!(err, EngineError::StorageWrite { .. }));

    // In-memory state is untouched by the failure
    assert_eq!(engine.all().len(), 1);

    blobs.set_fail_writes(false);
    engine.flush().await.unwrap();
    assert!(blobs.get("test/patterns").await.unwrap().is_some());
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_reports_unflushed_state() {
    let (engine, blobs) = create_test_engine().await;
    engine
        .observe(Observation::new(PatternKind::Doc, "/// Returns", "rust"))
        .await
        .unwrap();

    blobs.set_fail_writes(true);
    let err = engine.shutdown().await.unwrap_err();
    assert!(matches!(err, EngineError::StorageWrite { .. }));
}

#[tokio::test]
async fn test_corrupt_store_starts_empty() {
    let blobs = Arc::new(MemoryBlobStore::new());
    blobs.insert("test/patterns", b"{not json".to_vec());
    blobs.insert("test/behavior", b"[]".to_vec());

    let engine = Engine::init_with_store(test_config(), blobs.clone()).await.unwrap();
    assert!(engine.all().is_empty());

    // The engine keeps working and overwrites the corrupt document
    engine
        .observe(Observation::new(PatternKind::Test, "describe/it", "javascript"))
        .await
        .unwrap();
    engine.flush().await.unwrap();
    engine.shutdown().await.unwrap();

    let reloaded = Engine::init_with_store(test_config(), blobs).await.unwrap();
    assert_eq!(reloaded.all().len(), 1);
    reloaded.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_tolerates_extra_and_missing_fields() {
    let blobs = Arc::new(MemoryBlobStore::new());
    let document = serde_json::json!({
        "schema_version": 1,
        "written_by": "an older release",
        "patterns": {
            "legacy-1": {
                "id": "legacy-1",
                "kind": "naming",
                "content": "snake_case",
                "language": "python",
                "color": "blue"
            },
            "legacy-2": {
                "id": "legacy-2",
                "kind": "not-a-kind",
                "content": "x",
                "language": "python"
            }
        }
    });
    blobs.insert("test/patterns", serde_json::to_vec(&document).unwrap());

    let engine = Engine::init_with_store(test_config(), blobs).await.unwrap();
    let snapshot = engine.all();
    assert_eq!(snapshot.len(), 1);

    let record = snapshot.iter().next().unwrap();
    assert_eq!(record.content, "snake_case");
    assert!((record.confidence - 0.5).abs() < 1e-9);
    assert_eq!(record.usage.suggested_count, 0);

    // Re-observing the same tuple lands on the re-derived ID
    let id = engine
        .observe(Observation::new(PatternKind::Naming, "snake_case", "python"))
        .await
        .unwrap();
    assert_eq!(id, record.id);
    assert_eq!(engine.all().len(), 1);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_out_of_range_confidence_is_clamped_on_load() {
    let blobs = Arc::new(MemoryBlobStore::new());
    let now = Utc::now();
    seed_patterns(
        &blobs,
        "test",
        &[
            stored_record(PatternKind::Syntax, "too high", "go", 3.5, 1, now),
            stored_record(PatternKind::Syntax, "too low", "go", -1.0, 1, now),
        ],
    );

    let engine = Engine::init_with_store(test_config(), blobs).await.unwrap();
    let mut confidences: Vec<f64> = engine.all().iter().map(|r| r.confidence).collect();
    confidences.sort_by(|a, b| a.total_cmp(b));
    assert_eq!(confidences, vec![0.1, 1.0]);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reset_is_durable() {
    let (engine, blobs) = create_test_engine().await;
    let id = engine
        .observe(Observation::new(PatternKind::Refactor, "extract method", "java"))
        .await
        .unwrap();
    engine
        .apply_feedback(FeedbackEvent::new(id, FeedbackAction::Reject))
        .await
        .unwrap();

    engine.flush().await.unwrap();
    assert!(blobs.get("test/behavior").await.unwrap().is_some());

    assert_eq!(engine.reset().await.unwrap(), 1);
    assert!(engine.all().is_empty());
    assert!(engine.insights(3).behavior.is_empty());
    assert!(blobs.get("test/patterns").await.unwrap().is_none());
    assert!(blobs.get("test/behavior").await.unwrap().is_none());
    engine.shutdown().await.unwrap();
    assert!(blobs.get("test/patterns").await.unwrap().is_none());

    let reloaded = Engine::init_with_store(test_config(), blobs).await.unwrap();
    assert!(reloaded.all().is_empty());
    reloaded.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_instances_are_isolated() {
    let blobs = Arc::new(MemoryBlobStore::new());

    let mut first = test_config();
    first.instance = "alpha".to_string();
    let engine = Engine::init_with_store(first.clone(), blobs.clone()).await.unwrap();
    engine
        .observe(Observation::new(PatternKind::Style, "tabs", "go"))
        .await
        .unwrap();
    engine.shutdown().await.unwrap();

    let mut second = test_config();
    second.instance = "beta".to_string();
    let other = Engine::init_with_store(second, blobs.clone()).await.unwrap();
    assert!(other.all().is_empty());
    other.shutdown().await.unwrap();

    let again = Engine::init_with_store(first, blobs).await.unwrap();
    assert_eq!(again.all().len(), 1);
    again.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_export_lists_patterns_and_behavior() {
    let (engine, _blobs) = create_engine_with(test_config()).await;
    let id = engine
        .observe(
            Observation::new(PatternKind::ErrorHandling, "if err != nil", "go")
                .at(Utc::now() - Duration::minutes(5)),
        )
        .await
        .unwrap();
    engine
        .apply_feedback(FeedbackEvent::new(id.clone(), FeedbackAction::Accept))
        .await
        .unwrap();

    let exported: serde_json::Value = serde_json::from_str(&engine.export_json().unwrap()).unwrap();
    assert_eq!(exported["schema_version"], 1);
    let patterns = exported["patterns"].as_array().unwrap();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0]["id"], id.to_string());
    assert_eq!(patterns[0]["content"], "if err != nil");
    assert!(exported["behavior"]["error_handling"].is_object());
    engine.shutdown().await.unwrap();
}
