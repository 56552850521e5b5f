//! Contextual relevance scoring
//!
//! Similarity between a pattern's recorded context and a query context,
//! computed as a weighted average over the attributes both contexts carry.
//! Contexts with no attribute in common score 0.0, never a neutral 0.5:
//! sparse queries must not inflate unrelated patterns.

use crate::config::RelevanceConfig;
use crate::types::PatternContext;
use std::collections::BTreeSet;

/// Contextual relevance scorer
#[derive(Debug, Clone, Default)]
pub struct RelevanceScorer {
    config: RelevanceConfig,
}

impl RelevanceScorer {
    pub fn new(config: RelevanceConfig) -> Self {
        Self { config }
    }

    /// Similarity in [0, 1]
    pub fn similarity(&self, a: &PatternContext, b: &PatternContext) -> f64 {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;

        for (key, left) in a.iter() {
            let Some(right) = b.get(key) else {
                continue;
            };
            let weight = self.weight(key);
            weighted += weight * attribute_match(left, right);
            total_weight += weight;
        }

        if total_weight <= 0.0 {
            return 0.0;
        }
        (weighted / total_weight).clamp(0.0, 1.0)
    }

    fn weight(&self, key: &str) -> f64 {
        self.config
            .attribute_weights
            .get(key)
            .copied()
            .unwrap_or(self.config.default_weight)
    }
}

/// 1.0 for a case-insensitive exact match, token Jaccard overlap otherwise
fn attribute_match(left: &str, right: &str) -> f64 {
    if left.eq_ignore_ascii_case(right) {
        return 1.0;
    }

    let left_tokens = tokens(left);
    let right_tokens = tokens(right);
    let union = left_tokens.union(&right_tokens).count();
    if union == 0 {
        return 0.0;
    }
    left_tokens.intersection(&right_tokens).count() as f64 / union as f64
}

fn tokens(value: &str) -> BTreeSet<String> {
    value
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}
