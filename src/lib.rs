//! Patternwise - Adaptive Pattern Confidence Engine
//!
//! Learns which code patterns (idioms, naming conventions, structures) a user
//! actually adopts, and ranks suggestions by a confidence score that adapts
//! to feedback, time and context:
//! - Content-addressed pattern identity (SHA-256 over kind, content, language, context)
//! - Feedback-driven confidence with per-domain accept/reject deltas
//! - Pluggable adaptation strategies (frequency, recency, context relevance, decay)
//! - Periodic maintenance: temporal decay, cleanup of failed patterns
//! - Durable, schema-tolerant persistence (memory, file or SQLite backends)
//!
//! # Architecture
//!
//! - **Store**: single-writer actor owning all records, publishing immutable snapshots
//! - **Confidence**: pure scoring of a pattern against a query context
//! - **Feedback**: accept/reject/ignore processing and behavior aggregates
//! - **Maintenance**: background decay/cleanup/rank sweeps
//! - **Retrieval**: ranked, deterministic suggestion queries over snapshots
//! - **Persistence**: background flusher over a `BlobStore` backend
//!
//! # Example
//!
//! ```ignore
//! use patternwise_core::{Engine, EngineConfig, Observation, PatternContext, PatternKind};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::init(EngineConfig::default()).await?;
//!
//!     let context = PatternContext::new().with("domain", "ui");
//!     engine
//!         .observe(Observation::new(PatternKind::Syntax, "arrow functions", "javascript")
//!             .with_context(context.clone()))
//!         .await?;
//!
//!     for suggestion in engine.get_suggestions("javascript", &context, 0.3) {
//!         println!("{} ({:.2})", suggestion.pattern.content, suggestion.adjusted_confidence);
//!     }
//!
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod behavior;
pub mod confidence;
pub mod config;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod insights;
pub mod maintenance;
pub mod persistence;
pub mod retrieval;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use behavior::{BehaviorAggregates, DomainBehaviorSummary, UserBehaviorAggregate};
pub use confidence::{ConfidenceBreakdown, ConfidenceModel, RelevanceScorer, StrategyKind};
pub use config::{BackendKind, CountingMode, EngineConfig};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use feedback::{FeedbackOutcome, FeedbackProcessor};
pub use insights::InsightReport;
pub use maintenance::{MaintenanceReport, MaintenanceRun, SweepReport};
pub use persistence::{BlobStore, FileBlobStore, MemoryBlobStore, SqliteBlobStore};
pub use retrieval::{Suggestion, SuggestionQuery, SuggestionRetriever};
pub use store::{PatternStore, StoreSnapshot};
pub use types::{
    AdaptationEvent, AdaptationReason, Domain, FeedbackAction, FeedbackEvent, Observation,
    PatternContext, PatternId, PatternKind, PatternRecord, UsageStats,
};
