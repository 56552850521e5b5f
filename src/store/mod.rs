//! Pattern store
//!
//! Keyed collection of pattern records behind a single-writer actor.
//! Writers go through [`PatternStore`]; readers take an immutable
//! [`StoreSnapshot`] that reflects every mutation acknowledged before it
//! was taken and never changes afterwards.

pub mod actor;
pub mod messages;

pub use actor::{StoreActor, StoreArguments, StoreState};
pub use messages::StoreMessage;

use crate::behavior::BehaviorAggregates;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::feedback::FeedbackOutcome;
use crate::maintenance::SweepReport;
use crate::persistence::PersistedState;
use crate::types::{FeedbackEvent, Observation, PatternId, PatternRecord};
use chrono::{DateTime, Utc};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef, RpcReplyPort};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Immutable view of the store at one version
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub(crate) version: u64,
    pub(crate) records: Arc<BTreeMap<u64, Arc<PatternRecord>>>,
    pub(crate) index: Arc<HashMap<PatternId, u64>>,
    pub(crate) behavior: Arc<BehaviorAggregates>,
}

impl StoreSnapshot {
    /// Build a detached snapshot; sequence numbers are assigned in order
    pub fn from_records(records: Vec<PatternRecord>, behavior: BehaviorAggregates) -> Self {
        let mut by_seq = BTreeMap::new();
        let mut index = HashMap::new();
        for (seq, mut record) in records.into_iter().enumerate() {
            let seq = seq as u64;
            record.seq = seq;
            index.insert(record.id.clone(), seq);
            by_seq.insert(seq, Arc::new(record));
        }
        StoreSnapshot {
            version: 0,
            records: Arc::new(by_seq),
            index: Arc::new(index),
            behavior: Arc::new(behavior),
        }
    }

    /// Monotonic mutation counter
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &PatternId) -> Option<&Arc<PatternRecord>> {
        self.index.get(id).and_then(|seq| self.records.get(seq))
    }

    /// Records in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<PatternRecord>> {
        self.records.values()
    }

    pub fn behavior(&self) -> &BehaviorAggregates {
        &self.behavior
    }
}

/// Read-only access to the latest snapshot
#[derive(Debug, Clone)]
pub struct StoreReader {
    snapshots: watch::Receiver<Arc<StoreSnapshot>>,
}

impl StoreReader {
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreSnapshot>> {
        self.snapshots.clone()
    }
}

/// Handle to the store actor
#[derive(Clone)]
pub struct PatternStore {
    actor: ActorRef<StoreMessage>,
    reader: StoreReader,
}

impl PatternStore {
    /// Spawn the store actor over previously persisted state
    pub async fn spawn(
        config: Arc<EngineConfig>,
        initial: PersistedState,
    ) -> Result<(Self, JoinHandle<()>)> {
        let (tx, rx) = watch::channel(Arc::new(StoreSnapshot::default()));
        let args = StoreArguments {
            config,
            initial,
            snapshots: tx,
        };

        let (actor, handle) = Actor::spawn(None, StoreActor, args)
            .await
            .map_err(|e| EngineError::Actor(format!("failed to spawn store actor: {}", e)))?;

        let store = Self {
            actor,
            reader: StoreReader { snapshots: rx },
        };
        Ok((store, handle))
    }

    async fn request<T, F>(&self, build: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> StoreMessage,
    {
        match self.actor.call(build, None).await {
            Ok(CallResult::Success(value)) => Ok(value),
            Ok(CallResult::Timeout) => Err(EngineError::Actor("request timed out".to_string())),
            Ok(CallResult::SenderError) => Err(EngineError::Actor(
                "store dropped the request".to_string(),
            )),
            Err(e) => Err(EngineError::Actor(e.to_string())),
        }
    }

    /// Insert or refresh a pattern
    pub async fn upsert(&self, observation: Observation) -> Result<PatternId> {
        let observation = observation.validate()?;
        self.request(|reply| StoreMessage::Upsert(observation, reply))
            .await
    }

    pub async fn apply_feedback(&self, event: FeedbackEvent) -> Result<FeedbackOutcome> {
        self.request(|reply| StoreMessage::ApplyFeedback(event, reply))
            .await?
    }

    pub async fn mark_surfaced(&self, ids: Vec<PatternId>, at: DateTime<Utc>) -> Result<usize> {
        self.request(|reply| StoreMessage::MarkSurfaced(ids, at, reply))
            .await
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.request(|reply| StoreMessage::Sweep(now, reply)).await
    }

    pub async fn reset(&self) -> Result<usize> {
        self.request(StoreMessage::Reset).await
    }

    /// Wait until every previously sent mutation is applied
    pub async fn drain(&self) -> Result<u64> {
        self.request(StoreMessage::Drain).await
    }

    /// Stop the actor
    ///
    /// The stop signal overtakes queued messages; call [`PatternStore::drain`]
    /// first when pending mutations must be applied.
    pub fn stop(&self) {
        self.actor.stop(Some("engine shutdown".to_string()));
    }

    pub fn reader(&self) -> StoreReader {
        self.reader.clone()
    }

    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.reader.snapshot()
    }

    pub fn get(&self, id: &PatternId) -> Option<Arc<PatternRecord>> {
        self.snapshot().get(id).cloned()
    }
}
