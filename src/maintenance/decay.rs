// Temporal Decay Pass
//
// Lowers the confidence of patterns that have not been used recently:
// - Only patterns idle longer than `min_idle_days` decay
// - Decay is linear: elapsed days * decay_rate_per_day, clamped to the floor
// - Elapsed days count from the later of last use and the last decay, so
//   repeated sweeps never charge the same idle period twice
//
// Changes larger than the materiality threshold earn a `temporal_change`
// entry in the pattern's adaptation history.

use crate::config::{ConfidenceBounds, EngineConfig};
use crate::types::{days_between, AdaptationReason, PatternRecord};
use chrono::{DateTime, Utc};

/// Decay amounts below this are skipped
const DECAY_EPSILON: f64 = 1e-6;

/// Confidence change applied to one pattern
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayChange {
    pub old_confidence: f64,
    pub new_confidence: f64,
    pub material: bool,
}

/// Decay pass settings
#[derive(Debug, Clone)]
pub struct DecayPass {
    rate_per_day: f64,
    min_idle_days: f64,
    materiality_threshold: f64,
    bounds: ConfidenceBounds,
}

impl DecayPass {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            rate_per_day: config.decay_rate_per_day,
            min_idle_days: config.maintenance.min_idle_days,
            materiality_threshold: config.maintenance.materiality_threshold,
            bounds: config.confidence,
        }
    }

    /// Amount the pattern would lose at `now`, if any
    pub fn pending(&self, pattern: &PatternRecord, now: DateTime<Utc>) -> Option<f64> {
        if pattern.days_since_last_use(now) <= self.min_idle_days {
            return None;
        }
        // Nothing left to lose
        if self.bounds.at_floor(pattern.confidence) {
            return None;
        }

        let since = match pattern.last_decayed_at {
            Some(decayed) if decayed > pattern.usage.last_used => decayed,
            _ => pattern.usage.last_used,
        };
        let amount = days_between(since, now) * self.rate_per_day;
        (amount >= DECAY_EPSILON).then_some(amount)
    }

    /// Subtract `amount` from the pattern's confidence
    pub fn apply(&self, pattern: &mut PatternRecord, amount: f64, now: DateTime<Utc>) -> DecayChange {
        let old_confidence = pattern.confidence;
        let new_confidence = self.bounds.clamp(old_confidence - amount);
        pattern.confidence = new_confidence;
        pattern.last_decayed_at = Some(now);

        let material = (old_confidence - new_confidence).abs() > self.materiality_threshold;
        if material {
            pattern.record_adaptation(
                now,
                AdaptationReason::TemporalChange,
                old_confidence,
                new_confidence,
                format!(
                    "decayed after {:.1} idle days",
                    pattern.days_since_last_use(now)
                ),
            );
        }

        DecayChange {
            old_confidence,
            new_confidence,
            material,
        }
    }
}
