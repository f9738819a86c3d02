//! Persistence seam for execution control records.
//!
//! Every mutation is scoped to the fields its writer owns. The execution loop
//! never rewrites `cancelled`, and a cancel request never rewrites progress.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use strangle_core::error::{Result, StrangleError};

use crate::control::{BatchProgress, ExecutionControl, ExecutionState};

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Inserts a new record.
    ///
    /// # Errors
    /// `InvalidTransition` if the suggestion already has an execution.
    async fn create(&self, control: &ExecutionControl) -> Result<()>;

    /// # Errors
    /// `NotFound` for an unknown id.
    async fn get(&self, id: Uuid) -> Result<ExecutionControl>;

    async fn find_by_suggestion(&self, suggestion_id: Uuid) -> Result<Option<ExecutionControl>>;

    /// Records that aren't terminal yet.
    async fn list_active(&self) -> Result<Vec<ExecutionControl>>;

    /// `CREATED -> RUNNING`.
    async fn mark_running(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Writes batch progress and refreshes the heartbeat.
    async fn record_progress(&self, id: Uuid, progress: &BatchProgress) -> Result<()>;

    async fn heartbeat(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Appends broker order ids without touching state or progress. Used for orders
    /// placed after the record went terminal, so they stay reconcilable.
    ///
    /// # Errors
    /// `NotFound` for an unknown id.
    async fn append_order_ids(&self, id: Uuid, broker_order_ids: &[String]) -> Result<()>;

    /// Sets the cancel flag on a live execution.
    ///
    /// # Errors
    /// `InvalidTransition` once the execution is terminal.
    async fn request_cancel(&self, id: Uuid, reason: &str, at: DateTime<Utc>)
        -> Result<ExecutionControl>;

    /// Moves a live execution to a terminal state, resolving COMPLETED to CANCELLED
    /// when the cancel flag is set.
    ///
    /// # Errors
    /// `InvalidTransition` if the execution is already terminal.
    async fn finish(
        &self,
        id: Uuid,
        state: ExecutionState,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<ExecutionControl>;
}

/// Process-local store.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    records: RwLock<HashMap<Uuid, ExecutionControl>>,
}

impl InMemoryExecutionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn update<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut ExecutionControl) -> Result<T>,
    ) -> Result<T> {
        let mut records = self.records.write();
        let control = records
            .get_mut(&id)
            .ok_or_else(|| StrangleError::not_found(format!("execution {id}")))?;
        f(control)
    }
}

fn require_live(control: &ExecutionControl, op: &str) -> Result<()> {
    if control.is_terminal() {
        return Err(StrangleError::invalid_transition(format!(
            "cannot {op} execution {} in {}",
            control.id, control.state
        )));
    }
    Ok(())
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, control: &ExecutionControl) -> Result<()> {
        let mut records = self.records.write();
        if records
            .values()
            .any(|c| c.suggestion_id == control.suggestion_id)
        {
            return Err(StrangleError::invalid_transition(format!(
                "suggestion {} already has an execution",
                control.suggestion_id
            )));
        }
        records.insert(control.id, control.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<ExecutionControl> {
        self.records
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| StrangleError::not_found(format!("execution {id}")))
    }

    async fn find_by_suggestion(&self, suggestion_id: Uuid) -> Result<Option<ExecutionControl>> {
        Ok(self
            .records
            .read()
            .values()
            .find(|c| c.suggestion_id == suggestion_id)
            .cloned())
    }

    async fn list_active(&self) -> Result<Vec<ExecutionControl>> {
        let mut active: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|c| !c.is_terminal())
            .cloned()
            .collect();
        active.sort_by_key(|c| c.created_at);
        Ok(active)
    }

    async fn mark_running(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.update(id, |c| {
            if c.state != ExecutionState::Created {
                return Err(StrangleError::invalid_transition(format!(
                    "cannot start execution {id} in {}",
                    c.state
                )));
            }
            c.state = ExecutionState::Running;
            c.started_at = Some(at);
            c.last_heartbeat = at;
            Ok(())
        })
    }

    async fn record_progress(&self, id: Uuid, progress: &BatchProgress) -> Result<()> {
        self.update(id, |c| {
            require_live(c, "record progress on")?;
            if progress.batches_completed > c.batches_total {
                return Err(StrangleError::invalid_transition(format!(
                    "batch {} beyond total {}",
                    progress.batches_completed, c.batches_total
                )));
            }
            c.batches_completed = progress.batches_completed;
            c.lots_filled = progress.lots_filled;
            c.broker_order_ids
                .extend(progress.broker_order_ids.iter().cloned());
            c.last_heartbeat = progress.at;
            Ok(())
        })
    }

    async fn heartbeat(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.update(id, |c| {
            c.last_heartbeat = at;
            Ok(())
        })
    }

    async fn append_order_ids(&self, id: Uuid, broker_order_ids: &[String]) -> Result<()> {
        self.update(id, |c| {
            c.broker_order_ids.extend(broker_order_ids.iter().cloned());
            Ok(())
        })
    }

    async fn request_cancel(
        &self,
        id: Uuid,
        reason: &str,
        _at: DateTime<Utc>,
    ) -> Result<ExecutionControl> {
        self.update(id, |c| {
            require_live(c, "cancel")?;
            if !c.cancelled {
                c.cancelled = true;
                c.cancel_reason = Some(reason.to_string());
            }
            Ok(c.clone())
        })
    }

    async fn finish(
        &self,
        id: Uuid,
        state: ExecutionState,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<ExecutionControl> {
        self.update(id, |c| {
            require_live(c, "finish")?;
            let resolved = c.resolve_terminal(state);
            c.state = resolved;
            if resolved == ExecutionState::Failed {
                c.failure_reason = reason;
            }
            c.finished_at = Some(at);
            c.last_heartbeat = at;
            Ok(c.clone())
        })
    }
}
