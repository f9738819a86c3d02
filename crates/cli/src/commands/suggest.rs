//! `suggest`: runs the strangle pipeline for an account and stores the result.

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use strangle_core::suggestion::TradeSuggestion;
use strangle_signals::{HistoryWindow, ValidationReport};
use strangle_strategy::{PipelineOutcome, StranglePipeline};
use tracing::info;

use crate::context::AppContext;

#[derive(Args, Debug, Clone)]
pub struct SuggestArgs {
    /// Account to size against
    #[arg(long, default_value = "primary")]
    pub account: String,
}

/// Runs the suggest command. Returns the stored suggestion, or `None` on a no-trade day.
///
/// # Errors
/// Returns an error on any fatal pipeline failure or if storing fails.
pub async fn run_suggest(ctx: &AppContext, args: &SuggestArgs) -> Result<Option<TradeSuggestion>> {
    let pipeline = StranglePipeline::new(ctx.config.clone())?;
    let clients = ctx.broker(&args.account).await?;
    let mut window = HistoryWindow::new();

    match pipeline
        .run(&clients, &args.account, &mut window, Utc::now())
        .await?
    {
        PipelineOutcome::NoTrade(report) => {
            print_report(&report);
            println!("\nNo trade today.");
            Ok(None)
        }
        PipelineOutcome::Suggestion(suggestion) => {
            ctx.db.suggestions().insert(&suggestion).await?;
            info!(id = %suggestion.id, "Suggestion stored");
            print_suggestion(&suggestion);
            Ok(Some(*suggestion))
        }
    }
}

pub fn print_report(report: &ValidationReport) {
    println!("Market conditions: {}", report.verdict());
    for check in report.checks() {
        let reading = check
            .reading
            .map_or_else(|| "-".to_string(), |r| format!("{r:.2}"));
        println!(
            "  {:<16} {:<8} {:>8}  {}",
            check.kind.name(),
            check.status.to_string(),
            reading,
            check.reason
        );
    }
}

pub fn print_suggestion(s: &TradeSuggestion) {
    println!("Suggestion {}", s.id);
    println!("  Status:        {}", s.status);
    println!("  Account:       {}", s.account_id);
    println!(
        "  Expiry:        {} {}",
        s.symbol,
        s.expiry.format("%Y-%m-%d")
    );
    println!(
        "  Call:          {} CE @ {} (delta {:.3})",
        s.proposal.call_strike, s.call_premium, s.proposal.call_delta
    );
    println!(
        "  Put:           {} PE @ {} (delta {:.3})",
        s.proposal.put_strike, s.put_premium, s.proposal.put_delta
    );
    println!("  Lots:          {} x {}", s.lots, s.lot_size);
    println!("  Margin:        {}", s.margin_required);
    println!("  Premium:       {}", s.total_premium);
    if let Some(sl) = s.stop_loss {
        println!("  Stop loss:     {sl}");
    }
    if let Some(target) = s.target {
        println!("  Target:        {target}");
    }
    for stage in &s.stages {
        let trigger = stage
            .trigger_move_pct
            .map_or_else(|| "entry".to_string(), |t| format!("{t}% adverse"));
        println!("  Stage {}:       {} lots ({trigger})", stage.stage, stage.lots);
    }
    for warning in &s.warnings {
        println!("  Warning:       {warning}");
    }
    println!("  Expires:       {}", s.expires_at.format("%H:%M:%S UTC"));
}
