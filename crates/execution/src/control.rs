//! Execution control record.
//!
//! One record per approved suggestion. The execution loop writes progress and
//! heartbeats; a cancel request sets `cancelled`. Both go through the store as
//! field-scoped updates so neither overwrites the other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `CREATED -> RUNNING -> {COMPLETED | CANCELLED | FAILED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Created,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl ExecutionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(Self::Created),
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "CANCELLED" => Some(Self::Cancelled),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionControl {
    pub id: Uuid,
    pub suggestion_id: Uuid,
    pub state: ExecutionState,
    pub cancelled: bool,
    pub cancel_reason: Option<String>,
    pub batches_completed: u32,
    pub batches_total: u32,
    pub lots_total: u32,
    pub lots_filled: u32,
    pub broker_order_ids: Vec<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_heartbeat: DateTime<Utc>,
}

impl ExecutionControl {
    #[must_use]
    pub fn new(suggestion_id: Uuid, batches_total: u32, lots_total: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            suggestion_id,
            state: ExecutionState::Created,
            cancelled: false,
            cancel_reason: None,
            batches_completed: 0,
            batches_total,
            lots_total,
            lots_filled: 0,
            broker_order_ids: Vec::new(),
            failure_reason: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            last_heartbeat: now,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Placed but not all batches, e.g. after a cancel or failure.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        self.batches_completed > 0 && self.batches_completed < self.batches_total
    }

    /// State a terminal request resolves to. A completion requested after a
    /// cancel was observed resolves to CANCELLED.
    #[must_use]
    pub fn resolve_terminal(&self, requested: ExecutionState) -> ExecutionState {
        if requested == ExecutionState::Completed && self.cancelled {
            ExecutionState::Cancelled
        } else {
            requested
        }
    }
}

/// Progress written after each placed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    pub batches_completed: u32,
    pub lots_filled: u32,
    pub broker_order_ids: Vec<String>,
    pub at: DateTime<Utc>,
}
