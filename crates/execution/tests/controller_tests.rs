//! Batch execution controller tests.
//!
//! Tests cover:
//! - Batching, pacing and completion of an approved suggestion
//! - Cancellation between batches and while a batch is in flight
//! - Retry of transient broker failures and halting on exhausted retries
//! - Per-order timeouts
//! - Lifecycle guards (unapproved, duplicate start, cancel after completion)
//!
//! All tests run on a paused tokio clock so pacing and timeouts are deterministic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use tokio::time::Instant;

use strangle_core::config::ExecutionConfig;
use strangle_core::error::{Result, StrangleError};
use strangle_core::proposal::StrikeProposal;
use strangle_core::suggestion::{ExitRule, NewSuggestion, TradeSuggestion};
use strangle_core::traits::OrderGateway;
use strangle_core::types::{BatchFill, OrderLeg};
use strangle_execution::{
    ExecutionController, ExecutionPolicy, ExecutionState, ExecutionStore, InMemoryExecutionStore,
};

// =============================================================================
// Helpers
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Step {
    Fill,
    Reject,
    Refuse,
    Delay(Duration),
}

/// Gateway that plays back a script, then fills every remaining call.
#[derive(Default)]
struct ScriptedGateway {
    script: Mutex<VecDeque<Step>>,
    fallback: Option<Step>,
    calls: AtomicU32,
}

impl ScriptedGateway {
    fn with_script(steps: &[Step]) -> Self {
        Self {
            script: Mutex::new(steps.iter().copied().collect()),
            ..Self::default()
        }
    }

    fn always(step: Step) -> Self {
        Self {
            fallback: Some(step),
            ..Self::default()
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderGateway for ScriptedGateway {
    async fn place_order_batch(&self, legs: &[OrderLeg], lot_count: u32) -> Result<BatchFill> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .pop_front()
            .or(self.fallback)
            .unwrap_or(Step::Fill);
        match step {
            Step::Fill => {}
            Step::Reject => return Err(StrangleError::broker("order rejected")),
            Step::Refuse => {
                return Err(StrangleError::margin_insufficient(dec!(0), dec!(192000)))
            }
            Step::Delay(d) => tokio::time::sleep(d).await,
        }
        Ok(BatchFill {
            broker_order_ids: legs
                .iter()
                .map(|leg| format!("ORD-{n}-{}", leg.side))
                .collect(),
            lots: lot_count,
            filled_at: Utc::now(),
        })
    }
}

fn approved(lots: u32) -> TradeSuggestion {
    let now = Utc::now();
    let mut s = TradeSuggestion::new(
        NewSuggestion {
            account_id: "primary".to_string(),
            symbol: "NIFTY".to_string(),
            expiry: now + ChronoDuration::days(6),
            lot_size: 75,
            proposal: StrikeProposal::new(dec!(26450), dec!(25450), 0.12, -0.11, now),
            call_premium: dec!(21.35),
            put_premium: dec!(19.80),
            lots,
            margin_per_lot: dec!(192000),
            exit_rule: ExitRule::default(),
            stages: Vec::new(),
            warnings: Vec::new(),
        },
        now,
        ChronoDuration::minutes(15),
    );
    s.approve(now).unwrap();
    s
}

fn policy() -> ExecutionPolicy {
    ExecutionPolicy::from(&ExecutionConfig::default())
}

fn controller(gateway: Arc<ScriptedGateway>) -> ExecutionController {
    controller_with(gateway, policy())
}

fn controller_with(gateway: Arc<ScriptedGateway>, policy: ExecutionPolicy) -> ExecutionController {
    ExecutionController::new(Arc::new(InMemoryExecutionStore::new()), gateway, policy)
}

// =============================================================================
// Completion
// =============================================================================

#[tokio::test(start_paused = true)]
async fn hundred_lots_run_as_five_paced_batches() {
    let gateway = Arc::new(ScriptedGateway::default());
    let controller = controller(gateway.clone());
    let started = Instant::now();

    let id = controller.start_execution(&approved(100)).await.unwrap();
    let done = controller.wait(id).await.unwrap();

    assert_eq!(done.state, ExecutionState::Completed);
    assert_eq!(done.batches_total, 5);
    assert_eq!(done.batches_completed, 5);
    assert_eq!(done.lots_total, 100);
    assert_eq!(done.lots_filled, 100);
    assert_eq!(done.broker_order_ids.len(), 10);
    assert!(!done.cancelled);
    assert!(done.finished_at.is_some());
    assert_eq!(gateway.calls(), 5);
    // four pacing gaps between five batches
    assert!(started.elapsed() >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn status_reflects_progress_mid_run() {
    let gateway = Arc::new(ScriptedGateway::default());
    let controller = controller(gateway);

    let id = controller.start_execution(&approved(100)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2_500)).await;

    let status = controller.get_execution_status(id).await.unwrap();
    assert_eq!(status.state, ExecutionState::Running);
    assert_eq!(status.batches_completed, 3);
    assert_eq!(status.lots_filled, 72);

    controller.wait(id).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn interrupted_wait_can_be_resumed() {
    let controller = controller(Arc::new(ScriptedGateway::default()));
    let id = controller.start_execution(&approved(100)).await.unwrap();

    let early = tokio::time::timeout(Duration::from_millis(1_500), controller.wait(id)).await;
    assert!(early.is_err());

    let done = controller.wait(id).await.unwrap();
    assert_eq!(done.state, ExecutionState::Completed);
    assert_eq!(done.batches_completed, 5);
}

#[tokio::test(start_paused = true)]
async fn finished_executions_are_released() {
    let controller = controller(Arc::new(ScriptedGateway::default()));

    let first = controller.start_execution(&approved(10)).await.unwrap();
    assert_eq!(controller.tracked_executions(), 1);
    // never waited on; its loop exits on its own
    tokio::time::sleep(Duration::from_secs(5)).await;

    let second = controller.start_execution(&approved(10)).await.unwrap();
    assert_eq!(controller.tracked_executions(), 1);

    controller.wait(second).await.unwrap();
    assert_eq!(controller.tracked_executions(), 0);

    // waiting again falls through to the store
    let done = controller.wait(first).await.unwrap();
    assert_eq!(done.state, ExecutionState::Completed);
    assert_eq!(controller.wait(second).await.unwrap().state, ExecutionState::Completed);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn cancel_between_batches_stops_at_next_boundary() {
    let gateway = Arc::new(ScriptedGateway::default());
    let controller = controller(gateway.clone());

    let id = controller.start_execution(&approved(100)).await.unwrap();
    // batches at t=0s and t=1s are placed; loop is pacing toward t=2s
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let requested = controller.cancel_execution(id, "user abort").await.unwrap();
    assert!(requested.cancelled);

    let done = controller.wait(id).await.unwrap();
    assert_eq!(done.state, ExecutionState::Cancelled);
    assert_eq!(done.batches_completed, 2);
    assert_eq!(done.lots_filled, 48);
    assert_eq!(done.cancel_reason.as_deref(), Some("user abort"));
    assert!(done.is_partial());
    assert_eq!(gateway.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn in_flight_batch_completes_before_cancel_is_observed() {
    let gateway = Arc::new(ScriptedGateway::always(Step::Delay(Duration::from_millis(500))));
    let controller = controller(gateway.clone());

    let id = controller.start_execution(&approved(100)).await.unwrap();
    // batch 1: 0.0-0.5s, pacing to 1.5s, batch 2 in flight 1.5-2.0s
    tokio::time::sleep(Duration::from_millis(1_700)).await;
    controller.cancel_execution(id, "user abort").await.unwrap();

    let done = controller.wait(id).await.unwrap();
    assert_eq!(done.state, ExecutionState::Cancelled);
    assert_eq!(done.batches_completed, 2);
    assert_eq!(gateway.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn orders_placed_after_record_failed_are_kept() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let gateway = Arc::new(ScriptedGateway::always(Step::Delay(Duration::from_millis(500))));
    let controller = ExecutionController::new(store.clone(), gateway.clone(), policy());

    let id = controller.start_execution(&approved(100)).await.unwrap();
    // batch 2 in flight when a stall monitor fails the record
    tokio::time::sleep(Duration::from_millis(1_700)).await;
    store
        .finish(id, ExecutionState::Failed, Some("stalled".to_string()), Utc::now())
        .await
        .unwrap();

    let done = controller.wait(id).await.unwrap();
    assert_eq!(done.state, ExecutionState::Failed);
    assert_eq!(done.batches_completed, 1);
    assert_eq!(done.lots_filled, 24);
    assert_eq!(done.broker_order_ids.len(), 4);
    assert!(done.broker_order_ids.iter().any(|o| o.starts_with("ORD-1-")));
    assert_eq!(gateway.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_last_batch_never_reports_completed() {
    let gateway = Arc::new(ScriptedGateway::always(Step::Delay(Duration::from_millis(500))));
    let controller = controller(gateway);

    let id = controller.start_execution(&approved(20)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    controller.cancel_execution(id, "late").await.unwrap();

    let done = controller.wait(id).await.unwrap();
    assert_eq!(done.state, ExecutionState::Cancelled);
    assert_eq!(done.batches_completed, 1);
    assert_eq!(done.lots_filled, 20);
}

#[tokio::test(start_paused = true)]
async fn cancel_after_completion_is_rejected() {
    let controller = controller(Arc::new(ScriptedGateway::default()));
    let id = controller.start_execution(&approved(10)).await.unwrap();
    controller.wait(id).await.unwrap();

    let err = controller.cancel_execution(id, "too late").await.unwrap_err();
    assert!(matches!(err, StrangleError::InvalidTransition(_)));
    let status = controller.get_execution_status(id).await.unwrap();
    assert_eq!(status.state, ExecutionState::Completed);
    assert!(!status.cancelled);
}

// =============================================================================
// Retries and timeouts
// =============================================================================

#[tokio::test(start_paused = true)]
async fn transient_rejections_are_retried() {
    let gateway = Arc::new(ScriptedGateway::with_script(&[Step::Reject, Step::Reject]));
    let controller = controller(gateway.clone());

    let id = controller.start_execution(&approved(30)).await.unwrap();
    let done = controller.wait(id).await.unwrap();

    assert_eq!(done.state, ExecutionState::Completed);
    assert_eq!(done.batches_completed, 2);
    assert_eq!(done.lots_filled, 30);
    assert_eq!(gateway.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_and_halt_remaining_batches() {
    // first batch fills, second is rejected on every attempt
    let gateway = Arc::new(ScriptedGateway::with_script(&[
        Step::Fill,
        Step::Reject,
        Step::Reject,
        Step::Reject,
        Step::Reject,
    ]));
    let controller = controller(gateway.clone());

    let id = controller.start_execution(&approved(72)).await.unwrap();
    let done = controller.wait(id).await.unwrap();

    assert_eq!(done.state, ExecutionState::Failed);
    assert_eq!(done.batches_completed, 1);
    assert_eq!(done.lots_filled, 24);
    let reason = done.failure_reason.unwrap();
    assert!(reason.contains("batch 1"), "{reason}");
    assert!(reason.contains("4 attempts"), "{reason}");
    // 1 fill + 4 attempts, third batch never sent
    assert_eq!(gateway.calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn non_retryable_error_fails_on_first_attempt() {
    let gateway = Arc::new(ScriptedGateway::always(Step::Refuse));
    let controller = controller(gateway.clone());

    let id = controller.start_execution(&approved(10)).await.unwrap();
    let done = controller.wait(id).await.unwrap();

    assert_eq!(done.state, ExecutionState::Failed);
    assert_eq!(done.batches_completed, 0);
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_broker_times_out() {
    let gateway = Arc::new(ScriptedGateway::always(Step::Delay(Duration::from_secs(30))));
    let policy = ExecutionPolicy {
        max_retries: 1,
        ..policy()
    };
    let controller = controller_with(gateway.clone(), policy);
    let started = Instant::now();

    let id = controller.start_execution(&approved(10)).await.unwrap();
    let done = controller.wait(id).await.unwrap();

    assert_eq!(done.state, ExecutionState::Failed);
    assert!(done.failure_reason.unwrap().contains("timeout"));
    assert_eq!(gateway.calls(), 2);
    // two 5s timeouts plus one backoff
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(started.elapsed() < Duration::from_secs(30));
}

// =============================================================================
// Lifecycle guards
// =============================================================================

#[tokio::test(start_paused = true)]
async fn pending_suggestion_cannot_start() {
    let controller = controller(Arc::new(ScriptedGateway::default()));
    let now = Utc::now();
    let mut s = approved(10);
    s.status = strangle_core::SuggestionStatus::Pending;
    s.updated_at = now;

    let err = controller.start_execution(&s).await.unwrap_err();
    assert!(matches!(err, StrangleError::InvalidTransition(_)));
}

#[tokio::test(start_paused = true)]
async fn expired_approval_cannot_start() {
    let gateway = Arc::new(ScriptedGateway::default());
    let controller = controller(gateway.clone());
    let mut s = approved(10);
    s.expires_at = Utc::now() - ChronoDuration::minutes(1);

    let err = controller.start_execution(&s).await.unwrap_err();
    assert!(matches!(err, StrangleError::InvalidTransition(_)));
    assert_eq!(gateway.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn one_execution_per_suggestion() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let controller = ExecutionController::new(
        store.clone(),
        Arc::new(ScriptedGateway::default()),
        policy(),
    );
    let s = approved(48);

    let id = controller.start_execution(&s).await.unwrap();
    let err = controller.start_execution(&s).await.unwrap_err();
    assert!(matches!(err, StrangleError::InvalidTransition(_)));

    controller.wait(id).await.unwrap();
    let record = store.find_by_suggestion(s.id).await.unwrap().unwrap();
    assert_eq!(record.id, id);
}

#[tokio::test(start_paused = true)]
async fn unknown_execution_is_not_found() {
    let controller = controller(Arc::new(ScriptedGateway::default()));
    let err = controller
        .get_execution_status(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, StrangleError::NotFound(_)));
}
