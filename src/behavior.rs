//! User behavior aggregates
//!
//! Coarse per-domain preference tracking, independent of pattern identity.
//! Every feedback event adds to the scores of its categories (pattern kind
//! and language); scores are plain additive accumulators and never decay.

use crate::config::FeedbackPolicy;
use crate::types::{Domain, FeedbackAction, PatternKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Accumulated preference for one category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferenceScore {
    pub score: f64,
    pub accepted: u64,
    pub rejected: u64,
    pub ignored: u64,
}

impl PreferenceScore {
    fn record(&mut self, action: FeedbackAction, policy: &FeedbackPolicy) {
        match action {
            FeedbackAction::Accept => {
                self.accepted += 1;
                self.score += policy.accept_delta;
            }
            FeedbackAction::Reject => {
                self.rejected += 1;
                self.score -= policy.reject_delta;
            }
            FeedbackAction::Ignore => self.ignored += 1,
        }
    }

    pub fn interactions(&self) -> u64 {
        self.accepted + self.rejected + self.ignored
    }

    /// Accepted share of all interactions
    pub fn acceptance_rate(&self) -> f64 {
        self.accepted as f64 / self.interactions().max(1) as f64
    }
}

/// Behavior aggregate of one domain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserBehaviorAggregate {
    pub totals: PreferenceScore,
    pub categories: BTreeMap<String, PreferenceScore>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserBehaviorAggregate {
    /// Category with the highest accumulated score
    pub fn preferred_category(&self) -> Option<(&str, &PreferenceScore)> {
        self.categories
            .iter()
            .max_by(|a, b| a.1.score.total_cmp(&b.1.score).then_with(|| b.0.cmp(a.0)))
            .map(|(k, v)| (k.as_str(), v))
    }
}

/// Behavior aggregates of every domain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorAggregates {
    pub domains: BTreeMap<Domain, UserBehaviorAggregate>,
}

impl BehaviorAggregates {
    pub fn record(
        &mut self,
        kind: PatternKind,
        language: &str,
        action: FeedbackAction,
        policy: &FeedbackPolicy,
        at: DateTime<Utc>,
    ) {
        let aggregate = self.domains.entry(kind.domain()).or_default();
        aggregate.totals.record(action, policy);
        for category in [format!("kind:{}", kind), format!("language:{}", language)] {
            aggregate
                .categories
                .entry(category)
                .or_default()
                .record(action, policy);
        }
        aggregate.updated_at = Some(match aggregate.updated_at {
            Some(prev) if prev > at => prev,
            _ => at,
        });
    }

    pub fn get(&self, domain: Domain) -> Option<&UserBehaviorAggregate> {
        self.domains.get(&domain)
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Read-only summary for dashboards
    pub fn summaries(&self) -> Vec<DomainBehaviorSummary> {
        self.domains
            .iter()
            .map(|(domain, aggregate)| DomainBehaviorSummary {
                domain: *domain,
                accepted: aggregate.totals.accepted,
                rejected: aggregate.totals.rejected,
                ignored: aggregate.totals.ignored,
                acceptance_rate: aggregate.totals.acceptance_rate(),
                preferred_category: aggregate.preferred_category().map(|(k, _)| k.to_string()),
            })
            .collect()
    }
}

/// Acceptance summary of one domain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainBehaviorSummary {
    pub domain: Domain,
    pub accepted: u64,
    pub rejected: u64,
    pub ignored: u64,
    pub acceptance_rate: f64,
    pub preferred_category: Option<String>,
}
