//! Engine configuration
//!
//! Static tunables loaded once at startup: confidence bounds, strategy
//! weights, decay rate, feedback deltas (global and per domain), the
//! maintenance schedule and the persistence backend.
//!
//! Configuration can be read from a TOML string/file directly, or layered
//! (file + `PATTERNWISE__*` environment variables) through the `config` crate.
//! Every section is defaulted so partial files are valid.

use crate::confidence::strategy::StrategyTable;
use crate::error::{EngineError, Result};
use crate::types::Domain;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for layered configuration
pub const ENV_PREFIX: &str = "PATTERNWISE";

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine instance name (namespaces the persisted blobs)
    pub instance: String,

    /// Confidence bounds and initial value
    pub confidence: ConfidenceBounds,

    /// Linear decay applied per idle day
    pub decay_rate_per_day: f64,

    /// Adaptation strategies applied by the confidence model
    pub strategies: StrategyTable,

    /// Contextual relevance attribute weights
    pub relevance: RelevanceConfig,

    /// Default feedback deltas
    pub feedback: FeedbackPolicy,

    /// Per-domain overrides
    pub domains: DomainPolicies,

    /// What increments `suggested_count`
    pub counting: CountingMode,

    /// Maintenance sweep schedule and thresholds
    pub maintenance: MaintenanceConfig,

    /// Durable storage backend and flush policy
    pub persistence: PersistenceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance: "default".to_string(),
            confidence: ConfidenceBounds::default(),
            decay_rate_per_day: 0.01,
            strategies: StrategyTable::default(),
            relevance: RelevanceConfig::default(),
            feedback: FeedbackPolicy::default(),
            domains: DomainPolicies::default(),
            counting: CountingMode::default(),
            maintenance: MaintenanceConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Confidence bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceBounds {
    pub min_confidence: f64,
    pub max_confidence: f64,
    pub initial_confidence: f64,
}

impl Default for ConfidenceBounds {
    fn default() -> Self {
        Self {
            min_confidence: 0.1,
            max_confidence: 1.0,
            initial_confidence: 0.5,
        }
    }
}

impl ConfidenceBounds {
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min_confidence;
        }
        value.clamp(self.min_confidence, self.max_confidence)
    }

    /// True when the value sits at (or under) the floor
    pub fn at_floor(&self, value: f64) -> bool {
        value <= self.min_confidence + 1e-9
    }
}

/// Accept/reject deltas
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackPolicy {
    pub accept_delta: f64,
    pub reject_delta: f64,
}

impl Default for FeedbackPolicy {
    fn default() -> Self {
        Self {
            accept_delta: 0.1,
            reject_delta: 0.1,
        }
    }
}

/// Overrides for one domain; unset fields fall back to the global values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainPolicy {
    pub accept_delta: Option<f64>,
    pub reject_delta: Option<f64>,
    pub strategies: Option<StrategyTable>,
}

/// Domain policy table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainPolicies {
    pub testing: DomainPolicy,
    pub refactoring: DomainPolicy,
    pub documentation: DomainPolicy,
    pub error_handling: DomainPolicy,
    pub personality: DomainPolicy,
}

impl Default for DomainPolicies {
    fn default() -> Self {
        Self {
            testing: DomainPolicy::default(),
            refactoring: DomainPolicy::default(),
            documentation: DomainPolicy::default(),
            // Risk-averse: a wrong error-handling fix costs more than a missed one
            error_handling: DomainPolicy {
                accept_delta: Some(0.1),
                reject_delta: Some(0.15),
                strategies: None,
            },
            personality: DomainPolicy::default(),
        }
    }
}

impl DomainPolicies {
    pub fn get(&self, domain: Domain) -> &DomainPolicy {
        match domain {
            Domain::Testing => &self.testing,
            Domain::Refactoring => &self.refactoring,
            Domain::Documentation => &self.documentation,
            Domain::ErrorHandling => &self.error_handling,
            Domain::Personality => &self.personality,
        }
    }

    pub fn get_mut(&mut self, domain: Domain) -> &mut DomainPolicy {
        match domain {
            Domain::Testing => &mut self.testing,
            Domain::Refactoring => &mut self.refactoring,
            Domain::Documentation => &mut self.documentation,
            Domain::ErrorHandling => &mut self.error_handling,
            Domain::Personality => &mut self.personality,
        }
    }
}

/// Attribute weights for contextual relevance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    /// Weight of attributes not listed in `attribute_weights`
    pub default_weight: f64,
    pub attribute_weights: BTreeMap<String, f64>,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            default_weight: 1.0,
            attribute_weights: BTreeMap::new(),
        }
    }
}

/// What counts as "suggested"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountingMode {
    /// Every observation of the pattern in code counts
    #[default]
    OnObservation,

    /// Only suggestions actually rendered to the user count
    OnSurface,
}

/// Maintenance sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,

    /// Delay before the first sweep after startup (in seconds)
    #[serde(with = "serde_duration")]
    pub startup_delay: Duration,

    /// Interval between sweeps (in seconds)
    #[serde(with = "serde_duration")]
    pub interval: Duration,

    /// Patterns idle for fewer days are not decayed
    pub min_idle_days: f64,

    /// Confidence change that earns a `temporal_change` history entry
    pub materiality_threshold: f64,

    /// Floor-level patterns suggested more often than this are removed
    pub cleanup_threshold: u64,

    /// Patterns logged by the rank pass
    pub top_n: usize,

    /// Sweep reports kept in memory
    pub history_size: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            startup_delay: Duration::from_secs(10),
            interval: Duration::from_secs(3600), // hourly
            min_idle_days: 1.0,
            materiality_threshold: 0.05,
            cleanup_threshold: 10,
            top_n: 10,
            history_size: 32,
        }
    }
}

/// Durable storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Memory,
    File,
    Sqlite,
}

impl std::str::FromStr for BackendKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "file" => Ok(BackendKind::File),
            "sqlite" => Ok(BackendKind::Sqlite),
            other => Err(EngineError::InvalidConfig(format!(
                "unknown persistence backend '{}'",
                other
            ))),
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub backend: BackendKind,

    /// Directory (file backend) or database file (sqlite backend)
    pub path: Option<PathBuf>,

    /// Timer-driven flush interval (in seconds)
    #[serde(with = "serde_duration")]
    pub flush_interval: Duration,

    /// Mutations that trigger an early flush
    pub flush_batch_size: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            path: None,
            flush_interval: Duration::from_secs(30),
            flush_batch_size: 50,
        }
    }
}

// Custom serde module for Duration (serialize/deserialize as seconds)
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Layered load: defaults, then the optional TOML file, then
    /// `PATTERNWISE__SECTION__KEY` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.to_path_buf())
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let toml_str =
            toml::to_string_pretty(self).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    /// Effective feedback deltas for a domain
    pub fn feedback_policy(&self, domain: Domain) -> FeedbackPolicy {
        let policy = self.domains.get(domain);
        FeedbackPolicy {
            accept_delta: policy.accept_delta.unwrap_or(self.feedback.accept_delta),
            reject_delta: policy.reject_delta.unwrap_or(self.feedback.reject_delta),
        }
    }

    /// Effective strategy table for a domain
    pub fn strategies_for(&self, domain: Domain) -> &StrategyTable {
        self.domains
            .get(domain)
            .strategies
            .as_ref()
            .unwrap_or(&self.strategies)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.instance.trim().is_empty() || self.instance.contains('/') {
            return Err(invalid("instance must be a non-empty name without '/'"));
        }

        let bounds = &self.confidence;
        if !(0.0..1.0).contains(&bounds.min_confidence) {
            return Err(invalid("confidence.min_confidence must be in [0, 1)"));
        }
        if bounds.max_confidence <= bounds.min_confidence || !bounds.max_confidence.is_finite() {
            return Err(invalid(
                "confidence.max_confidence must be greater than min_confidence",
            ));
        }
        if !(bounds.min_confidence..=bounds.max_confidence).contains(&bounds.initial_confidence) {
            return Err(invalid(
                "confidence.initial_confidence must lie within the bounds",
            ));
        }

        if !non_negative(self.decay_rate_per_day) {
            return Err(invalid("decay_rate_per_day must be a non-negative number"));
        }

        self.validate_feedback("feedback", &self.feedback)?;
        self.strategies.validate("strategies")?;
        for domain in Domain::ALL {
            self.validate_feedback(&format!("domains.{}", domain), &self.feedback_policy(domain))?;
            if let Some(table) = &self.domains.get(domain).strategies {
                table.validate(&format!("domains.{}.strategies", domain))?;
            }
        }

        if !non_negative(self.relevance.default_weight)
            || !self.relevance.attribute_weights.values().all(|w| non_negative(*w))
        {
            return Err(invalid("relevance weights must be non-negative numbers"));
        }

        let maintenance = &self.maintenance;
        if maintenance.interval < Duration::from_secs(1) {
            return Err(invalid("maintenance.interval must be at least 1 second"));
        }
        if !non_negative(maintenance.min_idle_days) || !non_negative(maintenance.materiality_threshold)
        {
            return Err(invalid(
                "maintenance thresholds must be non-negative numbers",
            ));
        }

        let persistence = &self.persistence;
        if persistence.flush_batch_size == 0 {
            return Err(invalid("persistence.flush_batch_size must be at least 1"));
        }
        if persistence.flush_interval < Duration::from_secs(1) {
            return Err(invalid("persistence.flush_interval must be at least 1 second"));
        }
        if persistence.backend != BackendKind::Memory && persistence.path.is_none() {
            return Err(invalid(
                "persistence.path is required for file and sqlite backends",
            ));
        }

        Ok(())
    }

    fn validate_feedback(&self, name: &str, policy: &FeedbackPolicy) -> Result<()> {
        if !non_negative(policy.accept_delta) || !non_negative(policy.reject_delta) {
            return Err(invalid(&format!(
                "{}: accept/reject deltas must be non-negative numbers",
                name
            )));
        }
        Ok(())
    }
}

fn non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

fn invalid(message: &str) -> EngineError {
    EngineError::InvalidConfig(message.to_string())
}
