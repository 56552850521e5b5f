//! Aggregate insights
//!
//! Dashboard-style projections over a store snapshot, computed on demand
//! and never persisted: top patterns, acceptance summaries per kind, the
//! confidence distribution and per-domain behavior summaries.

use crate::behavior::DomainBehaviorSummary;
use crate::maintenance::ranking::{top_patterns, RankedPattern};
use crate::store::StoreSnapshot;
use crate::types::PatternKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Confidence above this counts as high
pub const HIGH_CONFIDENCE: f64 = 0.8;

/// Confidence below this counts as low
pub const LOW_CONFIDENCE: f64 = 0.5;

/// Pattern counts per confidence band
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfidenceDistribution {
    /// confidence > 0.8
    pub high: usize,
    /// 0.5 <= confidence <= 0.8
    pub medium: usize,
    /// confidence < 0.5
    pub low: usize,
}

/// Acceptance summary of one pattern kind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptanceSummary {
    pub kind: PatternKind,
    pub patterns: usize,
    pub suggested: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub acceptance_rate: f64,
}

/// Insight report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsightReport {
    pub generated_at: DateTime<Utc>,
    pub snapshot_version: u64,
    pub total_patterns: usize,
    pub top_patterns: Vec<RankedPattern>,
    pub acceptance_by_kind: Vec<AcceptanceSummary>,
    pub confidence_distribution: ConfidenceDistribution,
    pub behavior: Vec<DomainBehaviorSummary>,
}

/// Build the insight report of a snapshot
pub fn compute(snapshot: &StoreSnapshot, top_n: usize) -> InsightReport {
    let mut distribution = ConfidenceDistribution::default();
    let mut by_kind: BTreeMap<PatternKind, AcceptanceSummary> = BTreeMap::new();

    for pattern in snapshot.iter() {
        if pattern.confidence > HIGH_CONFIDENCE {
            distribution.high += 1;
        } else if pattern.confidence >= LOW_CONFIDENCE {
            distribution.medium += 1;
        } else {
            distribution.low += 1;
        }

        let summary = by_kind.entry(pattern.kind).or_insert_with(|| AcceptanceSummary {
            kind: pattern.kind,
            patterns: 0,
            suggested: 0,
            accepted: 0,
            rejected: 0,
            acceptance_rate: 0.0,
        });
        summary.patterns += 1;
        summary.suggested += pattern.usage.suggested_count;
        summary.accepted += pattern.usage.accepted_count;
        summary.rejected += pattern.usage.rejected_count;
    }

    let acceptance_by_kind = by_kind
        .into_values()
        .map(|mut summary| {
            summary.acceptance_rate = summary.accepted as f64 / summary.suggested.max(1) as f64;
            summary
        })
        .collect();

    InsightReport {
        generated_at: Utc::now(),
        snapshot_version: snapshot.version(),
        total_patterns: snapshot.len(),
        top_patterns: top_patterns(snapshot, top_n),
        acceptance_by_kind,
        confidence_distribution: distribution,
        behavior: snapshot.behavior().summaries(),
    }
}
