//! Feedback processing
//!
//! Applies accept/reject/ignore events to a stored pattern. Accepts and
//! rejects move the confidence by the domain's deltas (clamped), bump the
//! matching usage counter and append one `user_feedback` history entry.
//! Ignores leave the pattern untouched; they only feed behavior aggregates.

use crate::config::{EngineConfig, FeedbackPolicy};
use crate::types::{AdaptationReason, FeedbackAction, PatternId, PatternRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Result of applying one feedback event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackOutcome {
    pub pattern_id: PatternId,
    pub action: FeedbackAction,
    pub old_confidence: f64,
    pub new_confidence: f64,
    pub accepted_count: u64,
    pub rejected_count: u64,
}

impl FeedbackOutcome {
    pub fn delta(&self) -> f64 {
        self.new_confidence - self.old_confidence
    }
}

/// Feedback processor
#[derive(Debug, Clone)]
pub struct FeedbackProcessor {
    config: Arc<EngineConfig>,
}

impl FeedbackProcessor {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    /// Deltas in effect for a pattern
    pub fn policy_for(&self, record: &PatternRecord) -> FeedbackPolicy {
        self.config.feedback_policy(record.domain())
    }

    /// Apply `action` to `record`
    pub fn apply(
        &self,
        record: &mut PatternRecord,
        action: FeedbackAction,
        timestamp: DateTime<Utc>,
    ) -> FeedbackOutcome {
        let policy = self.policy_for(record);
        let bounds = &self.config.confidence;
        let old_confidence = record.confidence;

        let change = match action {
            FeedbackAction::Accept => {
                record.usage.accepted_count += 1;
                Some((old_confidence + policy.accept_delta, "accepted"))
            }
            FeedbackAction::Reject => {
                record.usage.rejected_count += 1;
                Some((old_confidence - policy.reject_delta, "rejected"))
            }
            FeedbackAction::Ignore => None,
        };

        if let Some((target, verb)) = change {
            let new_confidence = bounds.clamp(target);
            record.confidence = new_confidence;
            record.touch(timestamp);
            record.record_adaptation(
                timestamp,
                AdaptationReason::UserFeedback,
                old_confidence,
                new_confidence,
                format!("suggestion {} ({:+.2})", verb, new_confidence - old_confidence),
            );
            debug!(
                "Feedback {} on {}: {:.3} -> {:.3}",
                action,
                record.id.short(),
                old_confidence,
                new_confidence
            );
        }

        FeedbackOutcome {
            pattern_id: record.id.clone(),
            action,
            old_confidence,
            new_confidence: record.confidence,
            accepted_count: record.usage.accepted_count,
            rejected_count: record.usage.rejected_count,
        }
    }
}
