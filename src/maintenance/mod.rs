//! Periodic maintenance
//!
//! Background sweeps over the pattern store, independent of user activity:
//!
//! - **Decay**: idle patterns lose confidence linearly
//! - **Cleanup**: floor-level patterns that kept being suggested are removed
//! - **Rank**: top patterns are logged (read-only)
//!
//! Decay and cleanup run inside the store actor as one mutation so readers
//! never observe a half-applied sweep.

pub mod cleanup;
pub mod decay;
pub mod ranking;
pub mod scheduler;

pub use cleanup::CleanupPass;
pub use decay::{DecayChange, DecayPass};
pub use ranking::{top_patterns, RankedPattern};
pub use scheduler::{MaintenanceReport, MaintenanceRun, MaintenanceScheduler, RunStatus};

use crate::types::PatternId;
use serde::{Deserialize, Serialize};

/// Pattern removed by the cleanup pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedPattern {
    pub id: PatternId,
    pub reason: String,
}

/// Outcome of the mutating half of a sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Patterns examined
    pub processed: usize,

    /// Patterns whose confidence was decayed
    pub decayed: usize,

    /// Decays large enough to be recorded in history
    pub decay_events: usize,

    pub removed: Vec<RemovedPattern>,
}

impl SweepReport {
    pub fn changes_made(&self) -> usize {
        self.decayed + self.removed.len()
    }
}
