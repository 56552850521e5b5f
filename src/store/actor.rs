//! Store Actor
//!
//! Single writer of the pattern store. Owns the authoritative records and
//! behavior aggregates; after every effective mutation it publishes an
//! immutable snapshot on a watch channel. Records are shared with
//! snapshots through `Arc` and copied on write, so publishing costs one
//! map clone and readers never wait for the writer.

use super::messages::StoreMessage;
use super::StoreSnapshot;
use crate::behavior::BehaviorAggregates;
use crate::config::{CountingMode, EngineConfig};
use crate::error::{EngineError, Result};
use crate::feedback::{FeedbackOutcome, FeedbackProcessor};
use crate::maintenance::cleanup::CleanupPass;
use crate::maintenance::decay::DecayPass;
use crate::maintenance::{RemovedPattern, SweepReport};
use crate::persistence::PersistedState;
use crate::types::{FeedbackEvent, Observation, PatternId, PatternRecord, UsageStats};
use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::watch;

/// Startup arguments of the store actor
pub struct StoreArguments {
    pub config: Arc<EngineConfig>,
    pub initial: PersistedState,
    pub snapshots: watch::Sender<Arc<StoreSnapshot>>,
}

/// Store actor state
pub struct StoreState {
    config: Arc<EngineConfig>,
    feedback: FeedbackProcessor,
    decay: DecayPass,
    cleanup: CleanupPass,

    /// Records keyed by insertion sequence, shared with published snapshots
    records: Arc<BTreeMap<u64, Arc<PatternRecord>>>,

    /// Pattern ID to sequence number
    index: Arc<HashMap<PatternId, u64>>,

    behavior: Arc<BehaviorAggregates>,
    next_seq: u64,
    version: u64,
    snapshots: watch::Sender<Arc<StoreSnapshot>>,
}

impl StoreState {
    pub fn new(args: StoreArguments) -> Self {
        let StoreArguments {
            config,
            initial,
            snapshots,
        } = args;

        let mut loaded = initial.records;
        loaded.sort_by(|a, b| {
            a.seq
                .cmp(&b.seq)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut records = BTreeMap::new();
        let mut index = HashMap::new();
        for (seq, mut record) in loaded.into_iter().enumerate() {
            let seq = seq as u64;
            record.seq = seq;
            record.confidence = config.confidence.clamp(record.confidence);
            index.insert(record.id.clone(), seq);
            records.insert(seq, Arc::new(record));
        }

        let mut state = Self {
            feedback: FeedbackProcessor::new(config.clone()),
            decay: DecayPass::new(&config),
            cleanup: CleanupPass::new(&config),
            config,
            next_seq: records.len() as u64,
            records: Arc::new(records),
            index: Arc::new(index),
            behavior: Arc::new(initial.behavior),
            version: 0,
            snapshots,
        };
        state.snapshots.send_replace(Arc::new(state.snapshot()));
        state
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            version: self.version,
            records: Arc::clone(&self.records),
            index: Arc::clone(&self.index),
            behavior: Arc::clone(&self.behavior),
        }
    }

    /// Bump the version and publish a new snapshot
    fn publish(&mut self) {
        self.version += 1;
        let snapshot = Arc::new(self.snapshot());
        self.snapshots.send_replace(snapshot);
    }

    fn record_mut(&mut self, id: &PatternId) -> Option<&mut PatternRecord> {
        let seq = *self.index.get(id)?;
        Arc::make_mut(&mut self.records)
            .get_mut(&seq)
            .map(Arc::make_mut)
    }

    /// Insert or refresh a pattern from a validated observation
    pub fn upsert(&mut self, observation: Observation) -> PatternId {
        let id = observation.pattern_id();
        let at = observation.observed_at.unwrap_or_else(Utc::now);
        let counting = self.config.counting;

        if let Some(record) = self.record_mut(&id) {
            if counting == CountingMode::OnObservation {
                record.usage.suggested_count += 1;
            }
            record.touch(at);
            tracing::trace!("Refreshed pattern {}", id.short());
        } else {
            let seq = self.next_seq;
            self.next_seq += 1;
            let record = PatternRecord {
                id: id.clone(),
                seq,
                kind: observation.kind,
                content: observation.content,
                language: observation.language,
                context: observation.context,
                confidence: self.config.confidence.initial_confidence,
                usage: UsageStats {
                    suggested_count: match counting {
                        CountingMode::OnObservation => 1,
                        CountingMode::OnSurface => 0,
                    },
                    accepted_count: 0,
                    rejected_count: 0,
                    last_used: at,
                },
                adaptation_history: Vec::new(),
                created_at: at,
                last_decayed_at: None,
            };
            tracing::debug!(
                "New {} pattern {} ({})",
                record.kind,
                id.short(),
                record.language
            );
            Arc::make_mut(&mut self.index).insert(id.clone(), seq);
            Arc::make_mut(&mut self.records).insert(seq, Arc::new(record));
        }

        self.publish();
        id
    }

    /// Apply a feedback event; unknown patterns are rejected
    pub fn apply_feedback(&mut self, event: FeedbackEvent) -> Result<FeedbackOutcome> {
        let processor = self.feedback.clone();
        let record = self
            .record_mut(&event.pattern_id)
            .ok_or_else(|| EngineError::InvalidFeedback(event.pattern_id.clone()))?;

        let outcome = processor.apply(record, event.action, event.timestamp);
        let policy = processor.policy_for(record);
        let (kind, language) = (record.kind, record.language.clone());

        Arc::make_mut(&mut self.behavior).record(
            kind,
            &language,
            event.action,
            &policy,
            event.timestamp,
        );
        self.publish();
        Ok(outcome)
    }

    /// Count surfaced suggestions; no-op unless counting on surface
    pub fn mark_surfaced(&mut self, ids: &[PatternId], at: DateTime<Utc>) -> usize {
        if self.config.counting != CountingMode::OnSurface {
            return 0;
        }

        let mut counted = 0;
        for id in ids {
            if let Some(record) = self.record_mut(id) {
                record.usage.suggested_count += 1;
                record.touch(at);
                counted += 1;
            }
        }
        if counted > 0 {
            self.publish();
        }
        counted
    }

    /// Decay idle patterns, then remove failed ones
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport {
            processed: self.records.len(),
            ..SweepReport::default()
        };

        let pending: Vec<(u64, f64)> = self
            .records
            .iter()
            .filter_map(|(seq, record)| self.decay.pending(record, now).map(|amount| (*seq, amount)))
            .collect();

        if !pending.is_empty() {
            let records = Arc::make_mut(&mut self.records);
            for (seq, amount) in pending {
                if let Some(record) = records.get_mut(&seq) {
                    let change = self.decay.apply(Arc::make_mut(record), amount, now);
                    report.decayed += 1;
                    if change.material {
                        report.decay_events += 1;
                    }
                }
            }
        }

        let doomed: Vec<u64> = self
            .records
            .iter()
            .filter(|(_, record)| self.cleanup.should_remove(record))
            .map(|(seq, _)| *seq)
            .collect();

        if !doomed.is_empty() {
            let records = Arc::make_mut(&mut self.records);
            let index = Arc::make_mut(&mut self.index);
            for seq in doomed {
                if let Some(record) = records.remove(&seq) {
                    let reason = self.cleanup.removal_reason(&record);
                    tracing::info!("Removing pattern {}: {}", record.id.short(), reason);
                    index.remove(&record.id);
                    report.removed.push(RemovedPattern {
                        id: record.id.clone(),
                        reason,
                    });
                }
            }
        }

        if report.decayed > 0 || !report.removed.is_empty() {
            self.publish();
        }
        report
    }

    /// Remove every pattern and behavior aggregate
    pub fn reset(&mut self) -> usize {
        let removed = self.records.len();
        self.records = Arc::default();
        self.index = Arc::default();
        self.behavior = Arc::default();
        self.next_seq = 0;
        self.publish();
        removed
    }
}

/// Store actor implementation
pub struct StoreActor;

#[ractor::async_trait]
impl Actor for StoreActor {
    type Msg = StoreMessage;
    type State = StoreState;
    type Arguments = StoreArguments;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> std::result::Result<Self::State, ActorProcessingErr> {
        let state = StoreState::new(args);
        tracing::info!("Pattern store starting with {} patterns", state.len());
        Ok(state)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> std::result::Result<(), ActorProcessingErr> {
        // A dropped reply port means the caller went away; the mutation stands
        match message {
            StoreMessage::Upsert(observation, reply) => {
                let _ = reply.send(state.upsert(observation));
            }
            StoreMessage::ApplyFeedback(event, reply) => {
                let outcome = state.apply_feedback(event);
                if let Err(e) = &outcome {
                    tracing::warn!("Feedback dropped: {}", e);
                }
                let _ = reply.send(outcome);
            }
            StoreMessage::MarkSurfaced(ids, at, reply) => {
                let _ = reply.send(state.mark_surfaced(&ids, at));
            }
            StoreMessage::Sweep(now, reply) => {
                let _ = reply.send(state.sweep(now));
            }
            StoreMessage::Reset(reply) => {
                let removed = state.reset();
                tracing::info!("Pattern store reset ({} patterns removed)", removed);
                let _ = reply.send(removed);
            }
            StoreMessage::Drain(reply) => {
                let _ = reply.send(state.version());
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> std::result::Result<(), ActorProcessingErr> {
        tracing::info!(
            "Pattern store stopped ({} patterns, version {})",
            state.len(),
            state.version()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeedbackAction, PatternContext, PatternKind};
    use chrono::Duration;

    fn state_with(config: EngineConfig, initial: PersistedState) -> (StoreState, watch::Receiver<Arc<StoreSnapshot>>) {
        let (tx, rx) = watch::channel(Arc::new(StoreSnapshot::default()));
        let state = StoreState::new(StoreArguments {
            config: Arc::new(config),
            initial,
            snapshots: tx,
        });
        (state, rx)
    }

    fn observation(content: &str) -> Observation {
        Observation::new(PatternKind::Syntax, content, "javascript")
            .with_context(PatternContext::new().with("domain", "ui"))
    }

    #[test]
    fn test_upsert_is_idempotent_on_identity() {
        let (mut state, rx) = state_with(EngineConfig::default(), PersistedState::default());

        let first = state.upsert(observation("arrow functions"));
        let second = state.upsert(observation("arrow functions"));
        assert_eq!(first, second);

        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(&first).unwrap().usage.suggested_count, 2);
        assert_eq!(snapshot.version(), 2);
    }

    #[test]
    fn test_snapshots_are_isolated() {
        let (mut state, rx) = state_with(EngineConfig::default(), PersistedState::default());
        let id = state.upsert(observation("const"));
        let before = rx.borrow().clone();

        state
            .apply_feedback(FeedbackEvent::new(id.clone(), FeedbackAction::Accept))
            .unwrap();

        assert_eq!(before.get(&id).unwrap().confidence, 0.5);
        assert!((rx.borrow().get(&id).unwrap().confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_updates_share_untouched_parts_with_previous_snapshot() {
        let (mut state, rx) = state_with(EngineConfig::default(), PersistedState::default());
        let id = state.upsert(observation("const"));
        state.upsert(observation("let"));
        let before = rx.borrow().clone();

        // Refreshing a known pattern leaves the index and behavior alone
        state.upsert(observation("const"));
        let refreshed = rx.borrow().clone();
        assert!(Arc::ptr_eq(&before.index, &refreshed.index));
        assert!(Arc::ptr_eq(&before.behavior, &refreshed.behavior));

        state
            .apply_feedback(FeedbackEvent::new(id.clone(), FeedbackAction::Reject))
            .unwrap();
        let after = rx.borrow().clone();
        assert!(Arc::ptr_eq(&refreshed.index, &after.index));
        assert!(!Arc::ptr_eq(&refreshed.behavior, &after.behavior));

        // Records nobody touched are the same allocation in every snapshot
        let other = before.iter().find(|r| r.id != id).unwrap();
        assert!(Arc::ptr_eq(other, after.get(&other.id).unwrap()));
        assert_eq!(refreshed.get(&id).unwrap().usage.rejected_count, 0);
    }

    #[test]
    fn test_unknown_feedback_is_rejected() {
        let (mut state, rx) = state_with(EngineConfig::default(), PersistedState::default());
        let id = observation("never stored").pattern_id();

        for action in [FeedbackAction::Accept, FeedbackAction::Reject, FeedbackAction::Ignore] {
            let result = state.apply_feedback(FeedbackEvent::new(id.clone(), action));
            assert!(matches!(result, Err(EngineError::InvalidFeedback(_))));
        }
        assert_eq!(rx.borrow().version(), 0);
        assert!(rx.borrow().behavior().is_empty());
    }

    #[test]
    fn test_surface_counting_mode() {
        let config = EngineConfig {
            counting: CountingMode::OnSurface,
            ..EngineConfig::default()
        };
        let (mut state, rx) = state_with(config, PersistedState::default());

        let id = state.upsert(observation("let"));
        state.upsert(observation("let"));
        assert_eq!(rx.borrow().get(&id).unwrap().usage.suggested_count, 0);

        let counted = state.mark_surfaced(&[id.clone(), observation("other").pattern_id()], Utc::now());
        assert_eq!(counted, 1);
        assert_eq!(rx.borrow().get(&id).unwrap().usage.suggested_count, 1);
    }

    #[test]
    fn test_mark_surfaced_ignored_when_counting_observations() {
        let (mut state, rx) = state_with(EngineConfig::default(), PersistedState::default());
        let id = state.upsert(observation("var"));
        assert_eq!(state.mark_surfaced(&[id.clone()], Utc::now()), 0);
        assert_eq!(rx.borrow().get(&id).unwrap().usage.suggested_count, 1);
    }

    #[test]
    fn test_sweep_without_changes_keeps_version() {
        let (mut state, rx) = state_with(EngineConfig::default(), PersistedState::default());
        state.upsert(observation("fresh"));
        let version = rx.borrow().version();

        let report = state.sweep(Utc::now());
        assert_eq!(report.processed, 1);
        assert_eq!(report.decayed, 0);
        assert_eq!(rx.borrow().version(), version);
    }

    #[test]
    fn test_sweep_decays_then_removes() {
        let now = Utc::now();
        let config = EngineConfig {
            decay_rate_per_day: 0.02,
            ..EngineConfig::default()
        };
        let (mut state, rx) = state_with(config, PersistedState::default());

        let stale = state.upsert(observation("stale").at(now - Duration::days(40)));
        for _ in 0..11 {
            state.upsert(observation("stale").at(now - Duration::days(40)));
        }
        let fresh = state.upsert(observation("fresh").at(now));

        let report = state.sweep(now);
        assert_eq!(report.decayed, 1);
        assert_eq!(report.decay_events, 1);
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.removed[0].id, stale);

        let snapshot = rx.borrow().clone();
        assert!(snapshot.get(&stale).is_none());
        assert!(snapshot.get(&fresh).is_some());
    }

    #[test]
    fn test_loaded_records_are_renumbered_and_clamped() {
        let now = Utc::now();
        let make = |content: &str, seq: u64, confidence: f64| {
            let obs = observation(content);
            PatternRecord {
                id: obs.pattern_id(),
                seq,
                kind: obs.kind,
                content: obs.content,
                language: obs.language,
                context: obs.context,
                confidence,
                usage: UsageStats::default(),
                adaptation_history: Vec::new(),
                created_at: now,
                last_decayed_at: None,
            }
        };
        let initial = PersistedState {
            records: vec![make("b", 7, 3.0), make("a", 2, -1.0)],
            behavior: BehaviorAggregates::default(),
        };
        let (mut state, rx) = state_with(EngineConfig::default(), initial);

        let snapshot = rx.borrow().clone();
        let order: Vec<(&str, u64, f64)> = snapshot
            .iter()
            .map(|p| (p.content.as_str(), p.seq, p.confidence))
            .collect();
        assert_eq!(order, vec![("a", 0, 0.1), ("b", 1, 1.0)]);

        state.upsert(observation("c"));
        assert_eq!(rx.borrow().iter().last().unwrap().seq, 2);
    }

    #[test]
    fn test_reset_clears_everything() {
        let (mut state, rx) = state_with(EngineConfig::default(), PersistedState::default());
        let id = state.upsert(observation("x"));
        state
            .apply_feedback(FeedbackEvent::new(id, FeedbackAction::Reject))
            .unwrap();

        assert_eq!(state.reset(), 1);
        assert!(rx.borrow().is_empty());
        assert!(rx.borrow().behavior().is_empty());
    }
}
