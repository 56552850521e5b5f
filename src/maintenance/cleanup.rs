// Cleanup Pass
//
// Removes patterns that have demonstrably failed: confidence pinned at the
// floor while having been suggested more often than the cleanup threshold.
// Removal is the only deletion path in the engine.

use crate::config::{ConfidenceBounds, EngineConfig};
use crate::types::PatternRecord;

/// Cleanup pass settings
#[derive(Debug, Clone)]
pub struct CleanupPass {
    bounds: ConfidenceBounds,
    threshold: u64,
}

impl CleanupPass {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            bounds: config.confidence,
            threshold: config.maintenance.cleanup_threshold,
        }
    }

    /// Determine if a pattern should be removed
    ///
    /// Confidence is always clamped, so "below the floor" is checked as
    /// "at the floor".
    pub fn should_remove(&self, pattern: &PatternRecord) -> bool {
        self.bounds.at_floor(pattern.confidence) && pattern.usage.suggested_count > self.threshold
    }

    /// Removal reason for logging
    pub fn removal_reason(&self, pattern: &PatternRecord) -> String {
        format!(
            "confidence {:.2} at floor after {} suggestions ({} accepted, {} rejected)",
            pattern.confidence,
            pattern.usage.suggested_count,
            pattern.usage.accepted_count,
            pattern.usage.rejected_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Observation, PatternKind, UsageStats};
    use chrono::Utc;

    fn pattern(confidence: f64, suggested: u64) -> PatternRecord {
        let obs = Observation::new(PatternKind::Style, "tabs", "go");
        PatternRecord {
            id: obs.pattern_id(),
            seq: 0,
            kind: obs.kind,
            content: obs.content,
            language: obs.language,
            context: obs.context,
            confidence,
            usage: UsageStats {
                suggested_count: suggested,
                ..UsageStats::default()
            },
            adaptation_history: Vec::new(),
            created_at: Utc::now(),
            last_decayed_at: None,
        }
    }

    #[test]
    fn test_should_remove() {
        let cleanup = CleanupPass::new(&EngineConfig::default());

        assert!(cleanup.should_remove(&pattern(0.1, 15)));
        // Not suggested often enough to be judged
        assert!(!cleanup.should_remove(&pattern(0.1, 3)));
        assert!(!cleanup.should_remove(&pattern(0.1, 10)));
        // Above the floor
        assert!(!cleanup.should_remove(&pattern(0.4, 50)));
    }

    #[test]
    fn test_removal_reason() {
        let cleanup = CleanupPass::new(&EngineConfig::default());
        let reason = cleanup.removal_reason(&pattern(0.1, 15));
        assert!(reason.contains("15 suggestions"));
    }
}
