// Rank Pass
//
// Read-only: orders patterns by stored confidence for the maintenance log
// and the insights report. Ties break on insertion order.

use crate::store::StoreSnapshot;
use crate::types::{PatternId, PatternKind, PatternRecord};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One entry of a ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPattern {
    pub id: PatternId,
    pub kind: PatternKind,
    pub language: String,
    pub content: String,
    pub confidence: f64,
    pub suggested_count: u64,
    pub accepted_count: u64,
}

impl RankedPattern {
    fn from_record(pattern: &PatternRecord) -> Self {
        Self {
            id: pattern.id.clone(),
            kind: pattern.kind,
            language: pattern.language.clone(),
            content: pattern.content.clone(),
            confidence: pattern.confidence,
            suggested_count: pattern.usage.suggested_count,
            accepted_count: pattern.usage.accepted_count,
        }
    }
}

/// Descending confidence, then ascending insertion order
pub fn by_confidence(a: &PatternRecord, b: &PatternRecord) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.seq.cmp(&b.seq))
}

/// Top `n` patterns by stored confidence
pub fn top_patterns(snapshot: &StoreSnapshot, n: usize) -> Vec<RankedPattern> {
    let mut patterns: Vec<&PatternRecord> = snapshot.iter().map(|p| p.as_ref()).collect();
    patterns.sort_by(|a, b| by_confidence(a, b));
    patterns
        .into_iter()
        .take(n)
        .map(RankedPattern::from_record)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::BehaviorAggregates;
    use crate::types::{Observation, UsageStats};
    use chrono::Utc;

    fn pattern(content: &str, seq: u64, confidence: f64) -> PatternRecord {
        let obs = Observation::new(PatternKind::Syntax, content, "js");
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
            created_at: Utc::now(),
            last_decayed_at: None,
        }
    }

    #[test]
    fn test_top_patterns_order() {
        let snapshot = StoreSnapshot::from_records(
            vec![
                pattern("a", 0, 0.4),
                pattern("b", 1, 0.9),
                pattern("c", 2, 0.4),
                pattern("d", 3, 0.7),
            ],
            BehaviorAggregates::default(),
        );

        let top = top_patterns(&snapshot, 3);
        let contents: Vec<&str> = top.iter().map(|p| p.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "d", "a"]);
    }

    #[test]
    fn test_top_patterns_empty() {
        let snapshot = StoreSnapshot::from_records(Vec::new(), BehaviorAggregates::default());
        assert!(top_patterns(&snapshot, 5).is_empty());
    }
}
