//! `execute`, `status`, `cancel` and `monitor`: batch execution of approved suggestions.
//!
//! Execution state lives in the database, so `cancel` and `monitor` work from a
//! separate process while `execute` runs in the foreground.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Args;
use strangle_core::suggestion::SuggestionStatus;
use strangle_execution::{
    ExecutionControl, ExecutionController, ExecutionPolicy, ExecutionStore, StallMonitor,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::AppContext;

#[derive(Args, Debug, Clone)]
pub struct ExecuteArgs {
    /// Approved suggestion id
    pub id: Uuid,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Execution id
    pub id: Uuid,
    /// Print the record as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CancelArgs {
    /// Execution id
    pub id: Uuid,
    #[arg(long, default_value = "cancelled by user")]
    pub reason: String,
}

#[derive(Args, Debug, Clone)]
pub struct MonitorArgs {
    /// Report stalled executions without failing them
    #[arg(long)]
    pub dry_run: bool,
}

/// Runs an approved suggestion's batches in the foreground. Ctrl-C requests a
/// cancel, which takes effect at the next batch boundary.
///
/// # Errors
/// Returns an error if the suggestion isn't approved, already has an execution,
/// or its broker can't be reached.
pub async fn run_execute(ctx: &AppContext, args: &ExecuteArgs) -> Result<ExecutionControl> {
    let repo = ctx.db.suggestions();
    let mut suggestion = repo
        .get(args.id)
        .await
        .with_context(|| format!("Suggestion {}", args.id))?;
    if suggestion.expire_if_stale(Utc::now()) {
        repo.update(&suggestion).await?;
        bail!(
            "Suggestion {} expired at {}; request a fresh suggestion",
            suggestion.id,
            suggestion.expires_at
        );
    }
    if suggestion.status != SuggestionStatus::Approved {
        bail!(
            "Suggestion {} is {}; approve it before executing",
            suggestion.id,
            suggestion.status
        );
    }

    let clients = ctx.broker(&suggestion.account_id).await?;
    let controller = ExecutionController::new(
        Arc::new(ctx.db.executions()),
        clients.orders,
        ExecutionPolicy::from(&ctx.config.execution),
    );

    let execution_id = controller.start_execution(&suggestion).await?;
    suggestion.mark_executed(Utc::now())?;
    repo.update(&suggestion).await?;
    println!("Execution {execution_id} started for suggestion {}", suggestion.id);

    let done = tokio::select! {
        done = controller.wait(execution_id) => done?,
        _ = tokio::signal::ctrl_c() => {
            warn!(execution = %execution_id, "Interrupt received, cancelling");
            controller.cancel_execution(execution_id, "interrupted").await?;
            controller.wait(execution_id).await?
        }
    };

    print_execution(&done);
    Ok(done)
}

/// # Errors
/// Returns an error for an unknown execution id.
pub async fn run_status(ctx: &AppContext, args: &StatusArgs) -> Result<ExecutionControl> {
    let control = ctx.db.executions().get(args.id).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&control)?);
    } else {
        print_execution(&control);
    }
    Ok(control)
}

/// # Errors
/// Returns an error for an unknown or already finished execution.
pub async fn run_cancel(ctx: &AppContext, args: &CancelArgs) -> Result<ExecutionControl> {
    let control = ctx
        .db
        .executions()
        .request_cancel(args.id, &args.reason, Utc::now())
        .await?;
    info!(execution = %args.id, "Cancel requested");
    println!(
        "Cancel requested for {} after {}/{} batches; it stops at the next batch boundary",
        control.id, control.batches_completed, control.batches_total
    );
    Ok(control)
}

/// Lists running executions and fails those whose heartbeat went stale.
///
/// # Errors
/// Returns an error on a storage failure.
pub async fn run_monitor(ctx: &AppContext, args: &MonitorArgs) -> Result<Vec<ExecutionControl>> {
    let store: Arc<dyn ExecutionStore> = Arc::new(ctx.db.executions());
    let monitor = StallMonitor::from_config(store.clone(), &ctx.config.execution);
    let now = Utc::now();

    let active = store.list_active().await?;
    println!(
        "{} active execution(s), stall threshold {}ms",
        active.len(),
        monitor.threshold().as_millis()
    );
    for c in &active {
        let age = (now - c.last_heartbeat).num_milliseconds();
        println!(
            "  {}  {:<9} {}/{} batches  heartbeat {age}ms ago{}",
            c.id,
            c.state.as_str(),
            c.batches_completed,
            c.batches_total,
            if c.cancelled { "  (cancel requested)" } else { "" }
        );
    }

    let abandoned = if args.dry_run {
        monitor.find_abandoned(now).await?
    } else {
        monitor.sweep(now).await?
    };
    for c in &abandoned {
        let action = if args.dry_run { "stalled" } else { "marked FAILED" };
        println!(
            "  {} {action}: {}/{} batches placed, {} lots",
            c.id, c.batches_completed, c.batches_total, c.lots_filled
        );
    }
    Ok(abandoned)
}

fn print_execution(c: &ExecutionControl) {
    println!("Execution {}", c.id);
    println!("  Suggestion:  {}", c.suggestion_id);
    println!("  State:       {}", c.state);
    println!("  Batches:     {}/{}", c.batches_completed, c.batches_total);
    println!("  Lots:        {}/{}", c.lots_filled, c.lots_total);
    if c.cancelled {
        println!(
            "  Cancelled:   {}",
            c.cancel_reason.as_deref().unwrap_or("yes")
        );
    }
    if let Some(reason) = &c.failure_reason {
        println!("  Failure:     {reason}");
    }
    if !c.broker_order_ids.is_empty() {
        println!("  Orders:      {}", c.broker_order_ids.join(", "));
    }
    if c.is_partial() {
        println!("  Partially executed; placed batches remain open");
    }
}
