//! Engine façade
//!
//! Wires the store actor, the flusher, the maintenance scheduler and the
//! read-side components into one handle with an explicit lifecycle:
//! [`Engine::init`] loads persisted state and starts the background tasks,
//! [`Engine::shutdown`] stops them in order and guarantees a final flush.

use crate::config::EngineConfig;
use crate::confidence::{ConfidenceBreakdown, ConfidenceModel};
use crate::error::{EngineError, Result};
use crate::feedback::FeedbackOutcome;
use crate::insights::{self, InsightReport};
use crate::maintenance::{MaintenanceReport, MaintenanceRun, MaintenanceScheduler};
use crate::persistence::{self, BlobKeys, BlobStore, FlushHandle, Flusher};
use crate::retrieval::{Suggestion, SuggestionQuery, SuggestionRetriever};
use crate::store::{PatternStore, StoreSnapshot};
use crate::types::{FeedbackEvent, Observation, PatternContext, PatternId, PatternRecord};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Background tasks owned by the engine
struct EngineTasks {
    actor: JoinHandle<()>,
    flusher: JoinHandle<Result<()>>,
    flusher_cancel: CancellationToken,
    scheduler: Option<JoinHandle<()>>,
    scheduler_cancel: CancellationToken,
}

/// Adaptive pattern confidence engine
pub struct Engine {
    config: Arc<EngineConfig>,
    store: PatternStore,
    model: Arc<ConfidenceModel>,
    retriever: SuggestionRetriever,
    scheduler: Arc<MaintenanceScheduler>,
    flush: FlushHandle,
    tasks: EngineTasks,
}

impl Engine {
    /// Validate `config`, open its persistence backend and start the engine
    pub async fn init(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let blob_store = persistence::open_blob_store(&config.persistence).await?;
        Self::init_with_store(config, blob_store).await
    }

    /// Start the engine over an already opened backend
    pub async fn init_with_store(config: EngineConfig, blob_store: Arc<dyn BlobStore>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let keys = BlobKeys::for_instance(&config.instance);

        info!("Initializing pattern engine '{}'", config.instance);
        let initial = persistence::load_state(blob_store.as_ref(), &keys).await;
        let (store, actor) = PatternStore::spawn(config.clone(), initial).await?;

        let flusher_cancel = CancellationToken::new();
        let flusher = Flusher::new(blob_store, keys, store.reader().subscribe(), &config.persistence);
        let (flush, flusher) = flusher.spawn(flusher_cancel.clone());

        let scheduler = Arc::new(MaintenanceScheduler::new(
            store.clone(),
            config.maintenance.clone(),
        ));
        let scheduler_cancel = CancellationToken::new();
        let scheduler_task = config
            .maintenance
            .enabled
            .then(|| scheduler.clone().start(scheduler_cancel.clone()));

        let model = Arc::new(ConfidenceModel::new(config.clone()));
        let retriever = SuggestionRetriever::new(store.reader(), model.clone());

        info!(
            "Pattern engine ready ({} patterns)",
            store.snapshot().len()
        );

        Ok(Self {
            config,
            store,
            model,
            retriever,
            scheduler,
            flush,
            tasks: EngineTasks {
                actor,
                flusher,
                flusher_cancel,
                scheduler: scheduler_task,
                scheduler_cancel,
            },
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Record one observation; returns the pattern's ID
    pub async fn observe(&self, observation: Observation) -> Result<PatternId> {
        self.store.upsert(observation).await
    }

    /// Record a batch; malformed items fail individually
    pub async fn observe_batch(&self, observations: Vec<Observation>) -> Vec<Result<PatternId>> {
        let mut results = Vec::with_capacity(observations.len());
        for observation in observations {
            let result = self.store.upsert(observation).await;
            if let Err(e) = &result {
                warn!("Dropping observation: {}", e);
            }
            results.push(result);
        }
        results
    }

    pub async fn apply_feedback(&self, event: FeedbackEvent) -> Result<FeedbackOutcome> {
        self.store.apply_feedback(event).await
    }

    /// Count suggestions rendered to the user (surface counting mode)
    pub async fn mark_surfaced(&self, ids: &[PatternId]) -> Result<usize> {
        self.store.mark_surfaced(ids.to_vec(), Utc::now()).await
    }

    pub fn get(&self, id: &PatternId) -> Option<Arc<PatternRecord>> {
        self.store.get(id)
    }

    /// Consistent snapshot of every pattern
    pub fn all(&self) -> Arc<StoreSnapshot> {
        self.store.snapshot()
    }

    pub fn get_suggestions(
        &self,
        language: &str,
        context: &PatternContext,
        min_confidence: f64,
    ) -> Vec<Suggestion> {
        self.retriever.get_suggestions(language, context, min_confidence)
    }

    pub fn query(&self, query: &SuggestionQuery) -> Vec<Suggestion> {
        self.retriever.query(query)
    }

    /// Cloneable retriever for hosts that rank off the request path
    pub fn retriever(&self) -> SuggestionRetriever {
        self.retriever.clone()
    }

    /// Per-strategy explanation of a pattern's adjusted confidence
    pub fn explain(&self, id: &PatternId, context: &PatternContext) -> Result<ConfidenceBreakdown> {
        let pattern = self
            .get(id)
            .ok_or_else(|| EngineError::Other(format!("unknown pattern {}", id)))?;
        Ok(self.model.breakdown(&pattern, &context.clone().normalized(), Utc::now()))
    }

    pub fn insights(&self, top_n: usize) -> InsightReport {
        insights::compute(&self.store.snapshot(), top_n)
    }

    /// Run one maintenance sweep now, as of `now`
    pub async fn run_maintenance_at(&self, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        self.scheduler.run_once(now).await
    }

    pub fn maintenance_history(&self) -> Vec<MaintenanceRun> {
        self.scheduler.history()
    }

    /// Write the current state to the backend now
    pub async fn flush(&self) -> Result<()> {
        self.store.drain().await?;
        self.flush.flush().await
    }

    pub fn export_json(&self) -> Result<String> {
        persistence::export_json(&self.store.snapshot())
    }

    /// Delete every learned pattern and behavior aggregate, durably
    ///
    /// The persisted documents are removed from the backend.
    pub async fn reset(&self) -> Result<usize> {
        let removed = self.store.reset().await?;
        self.flush.clear().await?;
        Ok(removed)
    }

    /// Stop background work and flush
    ///
    /// Order: scheduler, then the store's queued mutations, then the store,
    /// then a final flush. Returns the outcome of that flush.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down pattern engine '{}'", self.config.instance);
        let tasks = self.tasks;

        tasks.scheduler_cancel.cancel();
        if let Some(handle) = tasks.scheduler {
            if let Err(e) = handle.await {
                warn!("Maintenance scheduler task failed: {}", e);
            }
        }

        if let Err(e) = self.store.drain().await {
            warn!("Store drain failed: {}", e);
        }
        self.store.stop();
        if let Err(e) = tasks.actor.await {
            warn!("Store actor task failed: {}", e);
        }

        tasks.flusher_cancel.cancel();
        let result = match tasks.flusher.await {
            Ok(result) => result,
            Err(e) => Err(EngineError::Other(format!("flusher task failed: {}", e))),
        };

        match &result {
            Ok(()) => info!("Pattern engine stopped"),
            Err(e) => warn!("Pattern engine stopped with unflushed state: {}", e),
        }
        result
    }
}
