//! Suggestion retrieval
//!
//! Read-only ranking of stored patterns for a query. Runs against the
//! latest published snapshot, so it never waits on the store actor and
//! repeated identical queries over the same snapshot return identical
//! results.

use crate::confidence::ConfidenceModel;
use crate::store::{StoreReader, StoreSnapshot};
use crate::types::{PatternContext, PatternKind, PatternRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// A ranked suggestion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub pattern: Arc<PatternRecord>,

    /// Confidence adjusted for the query (what the ranking uses)
    pub adjusted_confidence: f64,
}

/// Suggestion query
#[derive(Debug, Clone)]
pub struct SuggestionQuery {
    pub language: String,
    pub context: PatternContext,
    pub min_confidence: f64,

    /// Restrict to these kinds (all kinds when empty)
    pub kinds: Vec<PatternKind>,

    pub limit: Option<usize>,

    /// Evaluation instant; defaults to the current time
    pub now: Option<DateTime<Utc>>,
}

impl SuggestionQuery {
    pub fn new(language: impl Into<String>, context: PatternContext, min_confidence: f64) -> Self {
        Self {
            language: language.into(),
            context,
            min_confidence,
            kinds: Vec::new(),
            limit: None,
            now: None,
        }
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = PatternKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    fn matches(&self, pattern: &PatternRecord) -> bool {
        pattern.language.eq_ignore_ascii_case(self.language.trim())
            && (self.kinds.is_empty() || self.kinds.contains(&pattern.kind))
    }
}

/// Suggestion retriever
#[derive(Debug, Clone)]
pub struct SuggestionRetriever {
    reader: StoreReader,
    model: Arc<ConfidenceModel>,
}

impl SuggestionRetriever {
    pub fn new(reader: StoreReader, model: Arc<ConfidenceModel>) -> Self {
        Self { reader, model }
    }

    /// Patterns for `language` whose adjusted confidence is at least
    /// `min_confidence`, best first
    pub fn get_suggestions(
        &self,
        language: &str,
        context: &PatternContext,
        min_confidence: f64,
    ) -> Vec<Suggestion> {
        self.query(&SuggestionQuery::new(language, context.clone(), min_confidence))
    }

    pub fn query(&self, query: &SuggestionQuery) -> Vec<Suggestion> {
        rank(&self.reader.snapshot(), &self.model, query)
    }
}

/// Rank a snapshot for a query
///
/// Order: descending adjusted confidence, then insertion order.
pub fn rank(snapshot: &StoreSnapshot, model: &ConfidenceModel, query: &SuggestionQuery) -> Vec<Suggestion> {
    let now = query.now.unwrap_or_else(Utc::now);
    let context = query.context.clone().normalized();

    let mut suggestions: Vec<Suggestion> = snapshot
        .iter()
        .filter(|pattern| query.matches(pattern))
        .filter_map(|pattern| {
            let adjusted_confidence = model.adjusted_confidence(pattern, &context, now);
            (adjusted_confidence >= query.min_confidence).then(|| Suggestion {
                pattern: Arc::clone(pattern),
                adjusted_confidence,
            })
        })
        .collect();

    suggestions.sort_by(|a, b| {
        b.adjusted_confidence
            .total_cmp(&a.adjusted_confidence)
            .then_with(|| a.pattern.seq.cmp(&b.pattern.seq))
    });

    if let Some(limit) = query.limit {
        suggestions.truncate(limit);
    }

    tracing::trace!(
        "Ranked {} suggestions for {} (snapshot version {})",
        suggestions.len(),
        query.language,
        snapshot.version()
    );
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::BehaviorAggregates;
    use crate::config::EngineConfig;
    use crate::confidence::StrategyTable;
    use crate::types::{Observation, UsageStats};

    fn pattern(content: &str, language: &str, confidence: f64, kind: PatternKind) -> PatternRecord {
        let obs = Observation::new(kind, content, language)
            .with_context(PatternContext::new().with("domain", "ui"));
        PatternRecord {
            id: obs.pattern_id(),
            seq: 0,
            kind,
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

    fn baseline_model() -> ConfidenceModel {
        let config = EngineConfig {
            strategies: StrategyTable::none(),
            ..EngineConfig::default()
        };
        ConfidenceModel::new(Arc::new(config))
    }

    fn snapshot() -> StoreSnapshot {
        StoreSnapshot::from_records(
            vec![
                pattern("a", "javascript", 0.25, PatternKind::Syntax),
                pattern("b", "javascript", 0.8, PatternKind::Syntax),
                pattern("c", "python", 0.9, PatternKind::Syntax),
                pattern("d", "javascript", 0.5, PatternKind::Test),
                pattern("e", "javascript", 0.8, PatternKind::Naming),
            ],
            BehaviorAggregates::default(),
        )
    }

    fn contents(suggestions: &[Suggestion]) -> Vec<&str> {
        suggestions.iter().map(|s| s.pattern.content.as_str()).collect()
    }

    #[test]
    fn test_filters_language_and_threshold() {
        let query = SuggestionQuery::new("JavaScript", PatternContext::new().with("domain", "ui"), 0.3);
        let result = rank(&snapshot(), &baseline_model(), &query);

        // Ties keep insertion order
        assert_eq!(contents(&result), vec!["b", "e", "d"]);
        assert!(result.iter().all(|s| s.adjusted_confidence >= 0.3));
    }

    #[test]
    fn test_kind_filter_and_limit() {
        let query = SuggestionQuery::new("javascript", PatternContext::new(), 0.0)
            .with_kinds([PatternKind::Syntax, PatternKind::Naming])
            .with_limit(2);
        let result = rank(&snapshot(), &baseline_model(), &query);
        assert_eq!(contents(&result), vec!["b", "e"]);
    }

    #[test]
    fn test_unknown_language_is_empty() {
        let query = SuggestionQuery::new("cobol", PatternContext::new(), 0.0);
        assert!(rank(&snapshot(), &baseline_model(), &query).is_empty());
    }

    #[test]
    fn test_identical_queries_identical_results() {
        let model = ConfidenceModel::new(Arc::new(EngineConfig::default()));
        let snapshot = snapshot();
        let now = Utc::now();
        let query = SuggestionQuery::new("javascript", PatternContext::new().with("domain", "ui"), 0.0).at(now);

        let first = rank(&snapshot, &model, &query);
        let second = rank(&snapshot, &model, &query);
        assert_eq!(first, second);
    }

    #[test]
    fn test_clamped_ties_keep_insertion_order() {
        let model = ConfidenceModel::new(Arc::new(EngineConfig::default()));
        let snapshot = StoreSnapshot::from_records(
            vec![
                pattern("first", "javascript", 0.9, PatternKind::Syntax),
                pattern("second", "javascript", 0.95, PatternKind::Syntax),
            ],
            BehaviorAggregates::default(),
        );
        let query = SuggestionQuery::new("javascript", PatternContext::new().with("domain", "ui"), 0.0)
            .at(Utc::now());

        let result = rank(&snapshot, &model, &query);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].adjusted_confidence, 1.0);
        assert_eq!(result[1].adjusted_confidence, 1.0);
        // Stored confidence plays no part once the adjusted values tie
        assert_eq!(contents(&result), vec!["first", "second"]);
        assert_eq!(result[0].pattern.seq, 0);
    }
}
