//! Adaptation strategies
//!
//! A strategy is a named, weighted contribution to a pattern's adjusted
//! confidence. Strategies are configuration data: the confidence model
//! always applies every enabled strategy and sums the weighted terms.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Days over which the recency boost fades to zero
pub const RECENCY_WINDOW_DAYS: f64 = 30.0;

/// Largest penalty a single evaluation of temporal decay can apply
pub const MAX_DECAY_PENALTY: f64 = 0.5;

/// Named adaptation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    FrequencyBased,
    RecencyBoost,
    ContextRelevance,
    TemporalDecay,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::FrequencyBased => "frequency_based",
            StrategyKind::RecencyBoost => "recency_boost",
            StrategyKind::ContextRelevance => "context_relevance",
            StrategyKind::TemporalDecay => "temporal_decay",
        }
    }

    /// Unweighted contribution of this strategy
    pub fn contribution(&self, inputs: &StrategyInputs) -> f64 {
        match self {
            // Centered at a neutral 0.5 acceptance ratio
            StrategyKind::FrequencyBased => inputs.acceptance_ratio - 0.5,
            StrategyKind::RecencyBoost => (1.0 - inputs.days_idle / RECENCY_WINDOW_DAYS).max(0.0),
            StrategyKind::ContextRelevance => inputs.similarity,
            StrategyKind::TemporalDecay => {
                -(inputs.days_idle * inputs.decay_rate_per_day).min(MAX_DECAY_PENALTY)
            }
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Values a strategy reads from a pattern and a query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyInputs {
    pub acceptance_ratio: f64,
    pub days_idle: f64,
    pub similarity: f64,
    pub decay_rate_per_day: f64,
}

/// Enabled flag and weight of one strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub enabled: bool,
    pub weight: f64,
}

impl StrategyConfig {
    pub fn new(weight: f64) -> Self {
        Self {
            enabled: true,
            weight,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            weight: 0.0,
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::new(0.1)
    }
}

/// The full strategy table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyTable {
    pub frequency_based: StrategyConfig,
    pub recency_boost: StrategyConfig,
    pub context_relevance: StrategyConfig,
    pub temporal_decay: StrategyConfig,
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self {
            frequency_based: StrategyConfig::new(0.2),
            recency_boost: StrategyConfig::new(0.1),
            context_relevance: StrategyConfig::new(0.2),
            temporal_decay: StrategyConfig::new(0.1),
        }
    }
}

impl StrategyTable {
    /// Table with every strategy disabled (adjusted == persisted confidence)
    pub fn none() -> Self {
        Self {
            frequency_based: StrategyConfig::disabled(),
            recency_boost: StrategyConfig::disabled(),
            context_relevance: StrategyConfig::disabled(),
            temporal_decay: StrategyConfig::disabled(),
        }
    }

    pub fn entries(&self) -> [(StrategyKind, StrategyConfig); 4] {
        [
            (StrategyKind::FrequencyBased, self.frequency_based),
            (StrategyKind::RecencyBoost, self.recency_boost),
            (StrategyKind::ContextRelevance, self.context_relevance),
            (StrategyKind::TemporalDecay, self.temporal_decay),
        ]
    }

    pub fn enabled(&self) -> impl Iterator<Item = (StrategyKind, StrategyConfig)> {
        self.entries().into_iter().filter(|(_, s)| s.enabled)
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        for (kind, strategy) in self.entries() {
            if !strategy.weight.is_finite() || strategy.weight < 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "{}.{}: weight must be a non-negative number",
                    name, kind
                )));
            }
        }
        Ok(())
    }
}
