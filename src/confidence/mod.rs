//! Confidence model
//!
//! Pure scoring of a stored pattern against a query: the persisted baseline
//! confidence plus the weighted contribution of every enabled adaptation
//! strategy, clamped to the configured bounds. Nothing here mutates a
//! pattern; only feedback and maintenance persist confidence changes.

pub mod relevance;
pub mod strategy;

pub use relevance::RelevanceScorer;
pub use strategy::{StrategyConfig, StrategyInputs, StrategyKind, StrategyTable};

use crate::config::{ConfidenceBounds, EngineConfig};
use crate::types::{PatternContext, PatternRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Weighted term contributed by one strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StrategyContribution {
    pub strategy: StrategyKind,
    pub raw: f64,
    pub weight: f64,
    pub value: f64,
}

/// Explanation of an adjusted confidence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceBreakdown {
    pub base: f64,
    pub contributions: Vec<StrategyContribution>,
    pub unclamped: f64,
    pub adjusted: f64,
}

/// Confidence model shared by retrieval and insights
#[derive(Debug, Clone)]
pub struct ConfidenceModel {
    config: Arc<EngineConfig>,
    relevance: RelevanceScorer,
}

impl ConfidenceModel {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        let relevance = RelevanceScorer::new(config.relevance.clone());
        Self { config, relevance }
    }

    pub fn bounds(&self) -> &ConfidenceBounds {
        &self.config.confidence
    }

    pub fn relevance(&self) -> &RelevanceScorer {
        &self.relevance
    }

    /// Adjusted confidence of `pattern` for `query` at `now`
    pub fn adjusted_confidence(
        &self,
        pattern: &PatternRecord,
        query: &PatternContext,
        now: DateTime<Utc>,
    ) -> f64 {
        self.breakdown(pattern, query, now).adjusted
    }

    /// Adjusted confidence with the per-strategy terms that produced it
    pub fn breakdown(
        &self,
        pattern: &PatternRecord,
        query: &PatternContext,
        now: DateTime<Utc>,
    ) -> ConfidenceBreakdown {
        let table = self.config.strategies_for(pattern.domain());
        let mut inputs = StrategyInputs {
            acceptance_ratio: pattern.usage.acceptance_ratio(),
            days_idle: pattern.days_since_last_use(now),
            similarity: 0.0,
            decay_rate_per_day: self.config.decay_rate_per_day,
        };
        if table.context_relevance.enabled {
            inputs.similarity = self.relevance.similarity(&pattern.context, query);
        }

        let contributions: Vec<StrategyContribution> = table
            .enabled()
            .map(|(strategy, cfg)| {
                let raw = strategy.contribution(&inputs);
                StrategyContribution {
                    strategy,
                    raw,
                    weight: cfg.weight,
                    value: raw * cfg.weight,
                }
            })
            .collect();

        let unclamped = pattern.confidence + contributions.iter().map(|c| c.value).sum::<f64>();

        ConfidenceBreakdown {
            base: pattern.confidence,
            contributions,
            unclamped,
            adjusted: self.bounds().clamp(unclamped),
        }
    }
}
