//! Detection of stalled execution loops.
//!
//! A RUNNING execution whose heartbeat is older than the stall threshold has lost
//! its worker (crash or restart). It is failed in place; batches already placed
//! stay placed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use strangle_core::config::ExecutionConfig;
use strangle_core::error::Result;

use crate::control::{ExecutionControl, ExecutionState};
use crate::store::ExecutionStore;

pub const STALE_HEARTBEAT_REASON: &str = "heartbeat stale";

pub struct StallMonitor {
    store: Arc<dyn ExecutionStore>,
    threshold: Duration,
}

impl StallMonitor {
    #[must_use]
    pub fn new(store: Arc<dyn ExecutionStore>, threshold: Duration) -> Self {
        Self { store, threshold }
    }

    /// Threshold of `stall_multiplier` pacing intervals, plus the longest gap a
    /// healthy loop can leave between heartbeats while one order call times out
    /// and backs off.
    #[must_use]
    pub fn from_config(store: Arc<dyn ExecutionStore>, config: &ExecutionConfig) -> Self {
        let pacing = Duration::from_millis(config.pacing_interval_ms);
        let in_flight = Duration::from_millis(
            config.order_timeout_ms + config.retry_backoff_ms * u64::from(config.max_retries),
        );
        Self::new(store, pacing * config.stall_multiplier + in_flight)
    }

    #[must_use]
    pub const fn threshold(&self) -> Duration {
        self.threshold
    }

    /// RUNNING executions whose heartbeat is older than the threshold.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn find_abandoned(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionControl>> {
        let threshold = chrono::Duration::from_std(self.threshold)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        let stale: Vec<_> = self
            .store
            .list_active()
            .await?
            .into_iter()
            .filter(|c| c.state == ExecutionState::Running && now - c.last_heartbeat > threshold)
            .collect();
        if !stale.is_empty() {
            warn!(count = stale.len(), threshold_ms = self.threshold.as_millis() as u64, "Stalled executions found");
        }
        Ok(stale)
    }

    /// Fails an abandoned execution with reason `heartbeat stale`.
    ///
    /// # Errors
    /// `InvalidTransition` if it finished in the meantime.
    pub async fn mark_abandoned(&self, id: Uuid, now: DateTime<Utc>) -> Result<ExecutionControl> {
        let control = self
            .store
            .finish(
                id,
                ExecutionState::Failed,
                Some(STALE_HEARTBEAT_REASON.to_string()),
                now,
            )
            .await?;
        info!(
            execution = %id,
            batches_completed = control.batches_completed,
            batches_total = control.batches_total,
            "Execution marked abandoned"
        );
        Ok(control)
    }

    /// Finds and fails every abandoned execution, returning the updated records.
    ///
    /// # Errors
    /// Propagates store failures other than a race with a finishing loop.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionControl>> {
        let mut marked = Vec::new();
        for control in self.find_abandoned(now).await? {
            match self.mark_abandoned(control.id, now).await {
                Ok(updated) => marked.push(updated),
                Err(strangle_core::StrangleError::InvalidTransition(reason)) => {
                    info!(execution = %control.id, %reason, "Execution finished before sweep");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(marked)
    }
}
