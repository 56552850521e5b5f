// Maintenance Scheduler
//
// Runs the decay, cleanup and rank passes on a fixed interval, after an
// initial startup delay, until cancelled. Keeps a bounded in-memory
// history of sweep runs.

use super::ranking::{top_patterns, RankedPattern};
use super::SweepReport;
use crate::config::MaintenanceConfig;
use crate::error::Result;
use crate::store::PatternStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Report generated after a sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Logical time the sweep ran at
    pub swept_at: DateTime<Utc>,

    pub sweep: SweepReport,

    /// Top patterns after the sweep
    pub top: Vec<RankedPattern>,

    /// Duration of the sweep
    #[serde(with = "serde_duration_millis")]
    pub duration: Duration,
}

// Custom serde module for Duration (serialize/deserialize as milliseconds)
mod serde_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Sweep execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: RunStatus,
    pub report: Option<MaintenanceReport>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum RunStatus {
    Success,
    Failed,
}

/// Background maintenance scheduler
pub struct MaintenanceScheduler {
    store: PatternStore,
    config: MaintenanceConfig,
    history: Mutex<VecDeque<MaintenanceRun>>,
}

impl MaintenanceScheduler {
    pub fn new(store: PatternStore, config: MaintenanceConfig) -> Self {
        Self {
            store,
            config,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Run one sweep as of `now`
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        let started_at = Utc::now();
        let start = Instant::now();

        tracing::info!("Starting maintenance sweep");

        let result = self.store.sweep(now).await.map(|sweep| {
            let snapshot = self.store.snapshot();
            MaintenanceReport {
                swept_at: now,
                sweep,
                top: top_patterns(&snapshot, self.config.top_n),
                duration: start.elapsed(),
            }
        });

        let run = match &result {
            Ok(report) => {
                tracing::info!(
                    "Maintenance sweep complete: {} processed, {} decayed, {} removed, duration: {:?}",
                    report.sweep.processed,
                    report.sweep.decayed,
                    report.sweep.removed.len(),
                    report.duration
                );
                for (rank, pattern) in report.top.iter().enumerate() {
                    tracing::debug!(
                        "#{} {} [{} / {}] confidence {:.2}",
                        rank + 1,
                        pattern.id.short(),
                        pattern.kind,
                        pattern.language,
                        pattern.confidence
                    );
                }
                MaintenanceRun {
                    id: uuid::Uuid::new_v4().to_string(),
                    started_at,
                    completed_at: Utc::now(),
                    status: RunStatus::Success,
                    report: Some(report.clone()),
                    error_message: None,
                }
            }
            Err(e) => {
                tracing::error!("Maintenance sweep failed: {}", e);
                MaintenanceRun {
                    id: uuid::Uuid::new_v4().to_string(),
                    started_at,
                    completed_at: Utc::now(),
                    status: RunStatus::Failed,
                    report: None,
                    error_message: Some(e.to_string()),
                }
            }
        };
        self.push_history(run);

        result
    }

    /// Start the periodic loop; returns when `cancel` fires
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                "Starting maintenance scheduler (interval: {:?})",
                self.config.interval
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Maintenance scheduler stopped before first sweep");
                    return;
                }
                _ = sleep(self.config.startup_delay) => {}
            }

            let mut ticker = interval_at(
                tokio::time::Instant::now() + self.config.interval,
                self.config.interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                // Errors are logged and recorded in history by run_once
                let _ = self.run_once(Utc::now()).await;

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
            }

            tracing::info!("Stopping maintenance scheduler");
        })
    }

    /// Recent sweep runs, oldest first
    pub fn history(&self) -> Vec<MaintenanceRun> {
        self.lock_history().iter().cloned().collect()
    }

    fn push_history(&self, run: MaintenanceRun) {
        let limit = self.config.history_size.max(1);
        let mut history = self.lock_history();
        history.push_back(run);
        while history.len() > limit {
            history.pop_front();
        }
    }

    fn lock_history(&self) -> MutexGuard<'_, VecDeque<MaintenanceRun>> {
        match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::persistence::PersistedState;
    use crate::types::{Observation, PatternKind};

    async fn scheduler(config: MaintenanceConfig) -> (Arc<MaintenanceScheduler>, PatternStore) {
        let (store, _handle) = PatternStore::spawn(
            Arc::new(EngineConfig::default()),
            PersistedState::default(),
        )
        .await
        .unwrap();
        (
            Arc::new(MaintenanceScheduler::new(store.clone(), config)),
            store,
        )
    }

    #[tokio::test]
    async fn test_run_once_records_history() {
        let config = MaintenanceConfig {
            history_size: 2,
            ..MaintenanceConfig::default()
        };
        let (scheduler, store) = scheduler(config).await;
        store
            .upsert(Observation::new(PatternKind::Doc, "/// docs", "rust"))
            .await
            .unwrap();

        for _ in 0..3 {
            let report = scheduler.run_once(Utc::now()).await.unwrap();
            assert_eq!(report.sweep.processed, 1);
            assert_eq!(report.top.len(), 1);
        }

        let history = scheduler.history();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|run| run.status == RunStatus::Success));
    }

    #[tokio::test]
    async fn test_failed_sweep_is_recorded() {
        let (scheduler, store) = scheduler(MaintenanceConfig::default()).await;
        store.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(scheduler.run_once(Utc::now()).await.is_err());
        let history = scheduler.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_scheduler_runs_after_startup_delay() {
        let config = MaintenanceConfig {
            startup_delay: Duration::from_millis(10),
            interval: Duration::from_secs(3600),
            ..MaintenanceConfig::default()
        };
        let (scheduler, _store) = scheduler(config).await;
        let cancel = CancellationToken::new();
        let handle = scheduler.clone().start(cancel.clone());

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(scheduler.history().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_first_sweep() {
        let (scheduler, _store) = scheduler(MaintenanceConfig::default()).await;
        let cancel = CancellationToken::new();
        let handle = scheduler.clone().start(cancel.clone());

        cancel.cancel();
        handle.await.unwrap();
        assert!(scheduler.history().is_empty());
    }
}
