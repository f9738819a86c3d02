//! Batch execution controller.
//!
//! `start_execution` splits an approved suggestion into capped batches and runs
//! them on a background task. The task re-reads the control record at every
//! batch boundary; a cancel request is honoured there, so at most the batch in
//! flight completes after it. Progress and heartbeat are persisted before each
//! pacing sleep. Placed batches are never rolled back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use strangle_core::config::ExecutionConfig;
use strangle_core::error::{Result, StrangleError};
use strangle_core::suggestion::{SuggestionStatus, TradeSuggestion};
use strangle_core::traits::OrderGateway;
use strangle_core::types::{BatchFill, OrderLeg};

use crate::batching::plan_batches;
use crate::control::{BatchProgress, ExecutionControl, ExecutionState};
use crate::store::ExecutionStore;

/// Timing and retry knobs for one execution loop.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionPolicy {
    pub max_lots_per_batch: u32,
    pub pacing: Duration,
    pub order_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl From<&ExecutionConfig> for ExecutionPolicy {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            max_lots_per_batch: config.max_lots_per_batch,
            pacing: Duration::from_millis(config.pacing_interval_ms),
            order_timeout: Duration::from_millis(config.order_timeout_ms),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

pub struct ExecutionController {
    store: Arc<dyn ExecutionStore>,
    gateway: Arc<dyn OrderGateway>,
    policy: ExecutionPolicy,
    /// Completion signal per execution started by this controller.
    finished: Mutex<HashMap<Uuid, watch::Receiver<bool>>>,
}

impl ExecutionController {
    #[must_use]
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        gateway: Arc<dyn OrderGateway>,
        policy: ExecutionPolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            policy,
            finished: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn ExecutionStore> {
        Arc::clone(&self.store)
    }

    /// Creates the control record and spawns the execution loop.
    ///
    /// # Errors
    /// `InvalidTransition` unless the suggestion is approved and has lots, or if it
    /// already has an execution.
    pub async fn start_execution(&self, suggestion: &TradeSuggestion) -> Result<Uuid> {
        if suggestion.status != SuggestionStatus::Approved {
            return Err(StrangleError::invalid_transition(format!(
                "suggestion {} is {}, not APPROVED",
                suggestion.id, suggestion.status
            )));
        }
        if suggestion.is_expired(Utc::now()) {
            return Err(StrangleError::invalid_transition(format!(
                "suggestion {} expired at {}",
                suggestion.id, suggestion.expires_at
            )));
        }
        let batches = plan_batches(suggestion.lots, self.policy.max_lots_per_batch);
        if batches.is_empty() {
            return Err(StrangleError::invalid_transition(format!(
                "suggestion {} has no lots to place",
                suggestion.id
            )));
        }

        let control = ExecutionControl::new(
            suggestion.id,
            batches.len() as u32,
            suggestion.lots,
            Utc::now(),
        );
        self.store.create(&control).await?;
        let id = control.id;

        info!(
            execution = %id,
            suggestion = %suggestion.id,
            lots = suggestion.lots,
            batches = batches.len(),
            "Execution started"
        );

        let run = ExecutionRun {
            id,
            store: Arc::clone(&self.store),
            gateway: Arc::clone(&self.gateway),
            policy: self.policy,
            legs: suggestion.order_legs(),
            batches,
        };
        let (done_tx, done_rx) = watch::channel(false);
        tokio::spawn(async move {
            if let Err(e) = run.run().await {
                error!(execution = %id, error = %e, "Execution loop aborted");
            }
            let _ = done_tx.send(true);
        });
        let mut finished = self.finished.lock();
        finished.retain(|_, done| still_running(done));
        finished.insert(id, done_rx);
        Ok(id)
    }

    /// Executions whose completion signal this controller still holds. Entries are
    /// dropped once waited on, or at the next start after their loop exits.
    #[must_use]
    pub fn tracked_executions(&self) -> usize {
        self.finished.lock().len()
    }

    /// Requests cancellation. Honoured at the next batch boundary.
    ///
    /// # Errors
    /// `NotFound` for an unknown id, `InvalidTransition` if already terminal.
    pub async fn cancel_execution(&self, id: Uuid, reason: &str) -> Result<ExecutionControl> {
        let control = self.store.request_cancel(id, reason, Utc::now()).await?;
        info!(
            execution = %id,
            reason,
            batches_completed = control.batches_completed,
            batches_total = control.batches_total,
            "Cancel requested"
        );
        Ok(control)
    }

    /// # Errors
    /// `NotFound` for an unknown id.
    pub async fn get_execution_status(&self, id: Uuid) -> Result<ExecutionControl> {
        self.store.get(id).await
    }

    /// Waits for this process's loop for `id` to exit and returns the final record.
    /// Safe to drop and call again, e.g. from a `select!` arm.
    ///
    /// # Errors
    /// `NotFound` for an unknown id.
    pub async fn wait(&self, id: Uuid) -> Result<ExecutionControl> {
        let done = self.finished.lock().get(&id).cloned();
        if let Some(mut done) = done {
            // sender dropped unsignalled: the loop panicked
            if done.wait_for(|finished| *finished).await.is_err() {
                error!(execution = %id, "Execution task ended without finishing");
            }
            self.finished.lock().remove(&id);
        }
        self.store.get(id).await
    }
}

fn still_running(done: &watch::Receiver<bool>) -> bool {
    !*done.borrow() && done.has_changed().is_ok()
}

/// State owned by one background execution loop.
struct ExecutionRun {
    id: Uuid,
    store: Arc<dyn ExecutionStore>,
    gateway: Arc<dyn OrderGateway>,
    policy: ExecutionPolicy,
    legs: Vec<OrderLeg>,
    batches: Vec<u32>,
}

impl ExecutionRun {
    async fn run(self) -> Result<()> {
        self.store.mark_running(self.id, Utc::now()).await?;

        let total = self.batches.len();
        let mut lots_filled = 0u32;

        for (index, &lots) in self.batches.iter().enumerate() {
            // checkpoint: cancel is only observed here
            let control = self.store.get(self.id).await?;
            if control.cancelled {
                let done = self
                    .store
                    .finish(self.id, ExecutionState::Cancelled, None, Utc::now())
                    .await?;
                info!(
                    execution = %self.id,
                    batches_completed = done.batches_completed,
                    batches_total = done.batches_total,
                    "Execution cancelled"
                );
                return Ok(());
            }

            let fill = match self.place_with_retry(index as u32, lots).await {
                Ok(fill) => fill,
                Err(e) => {
                    let done = self
                        .store
                        .finish(
                            self.id,
                            ExecutionState::Failed,
                            Some(e.to_string()),
                            Utc::now(),
                        )
                        .await?;
                    warn!(
                        execution = %self.id,
                        batch = index,
                        batches_completed = done.batches_completed,
                        error = %e,
                        "Execution failed, remaining batches halted"
                    );
                    return Ok(());
                }
            };

            lots_filled += fill.lots;
            let progress = BatchProgress {
                batches_completed: index as u32 + 1,
                lots_filled,
                broker_order_ids: fill.broker_order_ids,
                at: Utc::now(),
            };
            if let Err(e) = self.store.record_progress(self.id, &progress).await {
                // the batch is live at the broker; keep its ids even if the record moved on
                error!(
                    execution = %self.id,
                    batch = index + 1,
                    lots,
                    broker_order_ids = ?progress.broker_order_ids,
                    error = %e,
                    "Batch placed but progress not recorded"
                );
                if let Err(append) = self
                    .store
                    .append_order_ids(self.id, &progress.broker_order_ids)
                    .await
                {
                    error!(execution = %self.id, error = %append, "Could not store placed order ids");
                }
                return Err(e);
            }
            info!(
                execution = %self.id,
                batch = index + 1,
                total,
                lots,
                lots_filled,
                "Batch placed"
            );

            if index + 1 < total {
                tokio::time::sleep(self.policy.pacing).await;
            }
        }

        let done = self
            .store
            .finish(self.id, ExecutionState::Completed, None, Utc::now())
            .await?;
        info!(
            execution = %self.id,
            state = %done.state,
            lots_filled = done.lots_filled,
            "Execution finished"
        );
        Ok(())
    }

    async fn place_with_retry(&self, batch: u32, lots: u32) -> Result<BatchFill> {
        let attempts = self.policy.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            self.store.heartbeat(self.id, Utc::now()).await?;
            let result = tokio::time::timeout(
                self.policy.order_timeout,
                self.gateway.place_order_batch(&self.legs, lots),
            )
            .await
            .unwrap_or_else(|_| {
                Err(StrangleError::Timeout {
                    operation: format!("place batch {batch}"),
                    millis: self.policy.order_timeout.as_millis() as u64,
                })
            });

            match result {
                Ok(fill) => return Ok(fill),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        execution = %self.id,
                        batch,
                        attempt,
                        error = %e,
                        "Batch attempt failed, retrying"
                    );
                    last_error = e.to_string();
                    tokio::time::sleep(self.policy.retry_backoff * attempt).await;
                }
                Err(e) => {
                    last_error = e.to_string();
                    return Err(StrangleError::BatchExecution {
                        batch,
                        attempts: attempt,
                        reason: last_error,
                    });
                }
            }
        }

        Err(StrangleError::BatchExecution {
            batch,
            attempts,
            reason: last_error,
        })
    }
}
