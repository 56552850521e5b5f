//! Core data types for the pattern confidence engine
//!
//! This module defines the fundamental data structures shared by the store,
//! the confidence model, the feedback processor and the maintenance jobs:
//! pattern identity, kinds and domains, context signatures, usage counters
//! and the append-only adaptation history.

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Content-addressed pattern identifier
///
/// Hex-encoded SHA-256 over a canonical, length-prefixed serialization of
/// (kind, content, language, context). Re-observing the same tuple always
/// yields the same ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(String);

impl PatternId {
    /// Derive the identifier for an identity tuple
    pub fn derive(
        kind: PatternKind,
        content: &str,
        language: &str,
        context: &PatternContext,
    ) -> Self {
        let mut hasher = Sha256::new();
        update_field(&mut hasher, kind.as_str().as_bytes());
        update_field(&mut hasher, content.as_bytes());
        update_field(&mut hasher, language.as_bytes());
        hasher.update((context.len() as u64).to_le_bytes());
        for (key, value) in context.iter() {
            update_field(&mut hasher, key.as_bytes());
            update_field(&mut hasher, value.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Parse a pattern ID from its hex form
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(EngineError::InvalidPatternId(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl std::fmt::Display for PatternId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PatternId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

/// Pattern category reported by the scanners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Syntax,
    Naming,
    Structure,
    Style,
    Refactor,
    Test,
    Doc,
    ErrorHandling,
}

impl PatternKind {
    pub const ALL: [PatternKind; 8] = [
        PatternKind::Syntax,
        PatternKind::Naming,
        PatternKind::Structure,
        PatternKind::Style,
        PatternKind::Refactor,
        PatternKind::Test,
        PatternKind::Doc,
        PatternKind::ErrorHandling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Syntax => "syntax",
            PatternKind::Naming => "naming",
            PatternKind::Structure => "structure",
            PatternKind::Style => "style",
            PatternKind::Refactor => "refactor",
            PatternKind::Test => "test",
            PatternKind::Doc => "doc",
            PatternKind::ErrorHandling => "error_handling",
        }
    }

    /// Domain whose policy governs patterns of this kind
    pub fn domain(&self) -> Domain {
        match self {
            PatternKind::Test => Domain::Testing,
            PatternKind::Refactor => Domain::Refactoring,
            PatternKind::Doc => Domain::Documentation,
            PatternKind::ErrorHandling => Domain::ErrorHandling,
            PatternKind::Syntax
            | PatternKind::Naming
            | PatternKind::Structure
            | PatternKind::Style => Domain::Personality,
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PatternKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        PatternKind::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| EngineError::MalformedObservation(format!("unknown pattern kind '{}'", s)))
    }
}

/// Suggestion domain (one per former per-domain analyzer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Testing,
    Refactoring,
    Documentation,
    ErrorHandling,
    Personality,
}

impl Domain {
    pub const ALL: [Domain; 5] = [
        Domain::Testing,
        Domain::Refactoring,
        Domain::Documentation,
        Domain::ErrorHandling,
        Domain::Personality,
    ];
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Domain::Testing => write!(f, "testing"),
            Domain::Refactoring => write!(f, "refactoring"),
            Domain::Documentation => write!(f, "documentation"),
            Domain::ErrorHandling => write!(f, "error_handling"),
            Domain::Personality => write!(f, "personality"),
        }
    }
}

/// Context signature: open key/value descriptor of where a pattern applies
///
/// Keys are lowercased and values trimmed so that equivalent contexts hash
/// to the same pattern identity. Empty values are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternContext(BTreeMap<String, String>);

impl PatternContext {
    pub const PROJECT_TYPE: &'static str = "project_type";
    pub const FILE_ROLE: &'static str = "file_role";
    pub const DOMAIN: &'static str = "domain";

    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl AsRef<str>, value: impl AsRef<str>) {
        let key = key.as_ref().trim().to_ascii_lowercase();
        let value = value.as_ref().trim();
        if key.is_empty() || value.is_empty() {
            return;
        }
        self.0.insert(key, value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Re-apply key/value normalization (used on deserialized input)
    pub fn normalized(self) -> Self {
        self.0
            .into_iter()
            .fold(PatternContext::new(), |ctx, (k, v)| ctx.with(k, v))
    }

    /// Parse `key=value` pairs as given on the command line
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut ctx = PatternContext::new();
        for pair in pairs {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                EngineError::MalformedObservation(format!("context entry '{}' is not key=value", pair))
            })?;
            ctx.insert(key, value);
        }
        Ok(ctx)
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for PatternContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(PatternContext::new(), |ctx, (k, v)| ctx.with(k, v))
    }
}

/// Usage counters of a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageStats {
    pub suggested_count: u64,
    pub accepted_count: u64,
    pub rejected_count: u64,
    pub last_used: DateTime<Utc>,
}

impl Default for UsageStats {
    fn default() -> Self {
        Self {
            suggested_count: 0,
            accepted_count: 0,
            rejected_count: 0,
            last_used: Utc::now(),
        }
    }
}

impl UsageStats {
    /// Accepted / suggested, with the denominator floored at 1
    pub fn acceptance_ratio(&self) -> f64 {
        self.accepted_count as f64 / self.suggested_count.max(1) as f64
    }
}

/// Why a pattern's confidence changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationReason {
    UserFeedback,
    TemporalChange,
}

impl std::fmt::Display for AdaptationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdaptationReason::UserFeedback => write!(f, "user_feedback"),
            AdaptationReason::TemporalChange => write!(f, "temporal_change"),
        }
    }
}

/// One entry of a pattern's adaptation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationEvent {
    pub timestamp: DateTime<Utc>,
    pub reason: AdaptationReason,
    pub old_confidence: f64,
    pub new_confidence: f64,
    #[serde(default)]
    pub description: String,
}

fn default_confidence() -> f64 {
    0.5
}

/// A learned pattern with its confidence and usage history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub id: PatternId,

    /// Insertion order, used as the ranking tie-break
    #[serde(default)]
    pub seq: u64,

    pub kind: PatternKind,
    pub content: String,
    pub language: String,

    #[serde(default)]
    pub context: PatternContext,

    #[serde(default = "default_confidence")]
    pub confidence: f64,

    #[serde(default)]
    pub usage: UsageStats,

    #[serde(default)]
    pub adaptation_history: Vec<AdaptationEvent>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Point up to which temporal decay has already been applied
    #[serde(default)]
    pub last_decayed_at: Option<DateTime<Utc>>,
}

impl PatternRecord {
    pub fn domain(&self) -> Domain {
        self.kind.domain()
    }

    /// Fractional days since the pattern was last used
    pub fn days_since_last_use(&self, now: DateTime<Utc>) -> f64 {
        days_between(self.usage.last_used, now)
    }

    /// Append an adaptation event
    ///
    /// Timestamps earlier than the last entry are raised to it so the
    /// history stays ordered even for late-arriving feedback.
    pub fn record_adaptation(
        &mut self,
        timestamp: DateTime<Utc>,
        reason: AdaptationReason,
        old_confidence: f64,
        new_confidence: f64,
        description: impl Into<String>,
    ) {
        let timestamp = match self.adaptation_history.last() {
            Some(last) if last.timestamp > timestamp => last.timestamp,
            _ => timestamp,
        };
        self.adaptation_history.push(AdaptationEvent {
            timestamp,
            reason,
            old_confidence,
            new_confidence,
            description: description.into(),
        });
    }

    /// Move `last_used` forward (never backward)
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.usage.last_used {
            self.usage.last_used = at;
        }
    }
}

/// Fractional days between two instants, floored at zero
pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let seconds = to.signed_duration_since(from).num_milliseconds() as f64 / 1000.0;
    (seconds / 86_400.0).max(0.0)
}

/// A pattern occurrence reported by a scanner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub kind: PatternKind,
    pub content: String,
    pub language: String,
    #[serde(default)]
    pub context: PatternContext,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl Observation {
    pub fn new(kind: PatternKind, content: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            language: language.into(),
            context: PatternContext::new(),
            observed_at: None,
        }
    }

    pub fn with_context(mut self, context: PatternContext) -> Self {
        self.context = context;
        self
    }

    pub fn at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = Some(observed_at);
        self
    }

    /// Check required fields and normalize language and context
    pub fn validate(self) -> Result<Self> {
        if self.content.trim().is_empty() {
            return Err(EngineError::MalformedObservation(
                "content is empty".to_string(),
            ));
        }
        let language = self.language.trim().to_ascii_lowercase();
        if language.is_empty() {
            return Err(EngineError::MalformedObservation(
                "language is empty".to_string(),
            ));
        }
        Ok(Self {
            language,
            context: self.context.normalized(),
            ..self
        })
    }

    pub fn pattern_id(&self) -> PatternId {
        PatternId::derive(self.kind, &self.content, &self.language, &self.context)
    }
}

/// User reaction to a surfaced suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Accept,
    Reject,
    Ignore,
}

impl std::fmt::Display for FeedbackAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedbackAction::Accept => write!(f, "accept"),
            FeedbackAction::Reject => write!(f, "reject"),
            FeedbackAction::Ignore => write!(f, "ignore"),
        }
    }
}

impl std::str::FromStr for FeedbackAction {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept" | "accepted" => Ok(FeedbackAction::Accept),
            "reject" | "rejected" => Ok(FeedbackAction::Reject),
            "ignore" | "ignored" => Ok(FeedbackAction::Ignore),
            other => Err(EngineError::Other(format!("unknown feedback action '{}'", other))),
        }
    }
}

/// Feedback event emitted by a UI surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub pattern_id: PatternId,
    pub action: FeedbackAction,
    #[serde(default)]
    pub context: PatternContext,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl FeedbackEvent {
    pub fn new(pattern_id: PatternId, action: FeedbackAction) -> Self {
        Self {
            pattern_id,
            action,
            context: PatternContext::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
