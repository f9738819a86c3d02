//! `approve`, `reject`, `edit` and `list`: user review of pending suggestions.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use rust_decimal::Decimal;
use strangle_core::suggestion::{SuggestionEdit, SuggestionStatus, TradeSuggestion};
use strangle_strategy::StranglePipeline;
use tracing::warn;
use uuid::Uuid;

use super::suggest::print_suggestion;
use crate::context::AppContext;

#[derive(Args, Debug, Clone)]
pub struct ApproveArgs {
    /// Suggestion id
    pub id: Uuid,
}

#[derive(Args, Debug, Clone)]
pub struct RejectArgs {
    /// Suggestion id
    pub id: Uuid,
    #[arg(long, default_value = "rejected by user")]
    pub reason: String,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    /// Suggestion id
    pub id: Uuid,
    #[arg(long)]
    pub lots: Option<u32>,
    #[arg(long)]
    pub call_strike: Option<Decimal>,
    #[arg(long)]
    pub put_strike: Option<Decimal>,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Only suggestions in this status (PENDING, APPROVED, ...)
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long, default_value_t = 20)]
    pub limit: u32,
}

/// Loads a suggestion, persisting an expiry if its window has passed.
async fn load_current(ctx: &AppContext, id: Uuid) -> Result<TradeSuggestion> {
    let mut s = ctx
        .db
        .suggestions()
        .get(id)
        .await
        .with_context(|| format!("Suggestion {id}"))?;
    if s.expire_if_stale(Utc::now()) {
        ctx.db.suggestions().update(&s).await?;
    }
    Ok(s)
}

/// # Errors
/// Returns an error unless the suggestion is pending, inside its window and has lots.
pub async fn run_approve(ctx: &AppContext, args: &ApproveArgs) -> Result<TradeSuggestion> {
    let mut s = load_current(ctx, args.id).await?;
    s.approve(Utc::now())?;
    ctx.db.suggestions().update(&s).await?;
    println!("Approved {} ({} lots)", s.id, s.lots);
    Ok(s)
}

/// # Errors
/// Returns an error if the suggestion is already terminal.
pub async fn run_reject(ctx: &AppContext, args: &RejectArgs) -> Result<TradeSuggestion> {
    let mut s = load_current(ctx, args.id).await?;
    s.reject(args.reason.clone(), Utc::now())?;
    ctx.db.suggestions().update(&s).await?;
    println!("Rejected {}: {}", s.id, args.reason);
    Ok(s)
}

/// Applies an edit against the account's current quote and ladder.
///
/// # Errors
/// Returns an error if the suggestion isn't pending, an edited strike is unsafe
/// or missing from the ladder, or the market data can't be fetched.
pub async fn run_edit(ctx: &AppContext, args: &EditArgs) -> Result<TradeSuggestion> {
    let mut s = load_current(ctx, args.id).await?;
    let pipeline = StranglePipeline::new(ctx.config.clone())?;
    let clients = ctx.broker(&s.account_id).await?;
    let quote = clients.market_data.quote_snapshot(&s.symbol).await?;
    let ladder = clients
        .market_data
        .strike_ladder(&s.symbol, s.expiry)
        .await?;

    let edit = SuggestionEdit {
        lots: args.lots,
        call_strike: args.call_strike,
        put_strike: args.put_strike,
    };
    pipeline.edit_suggestion(&mut s, &edit, &quote, &ladder, Utc::now())?;
    ctx.db.suggestions().update(&s).await?;
    print_suggestion(&s);
    Ok(s)
}

/// # Errors
/// Returns an error for an unknown status name or a storage failure.
pub async fn run_list(ctx: &AppContext, args: &ListArgs) -> Result<Vec<TradeSuggestion>> {
    let repo = ctx.db.suggestions();
    let expired = repo.expire_stale(Utc::now()).await?;
    if !expired.is_empty() {
        warn!(count = expired.len(), "Expired stale suggestions");
    }

    let suggestions = match &args.status {
        Some(name) => {
            let status = SuggestionStatus::parse(&name.to_uppercase())
                .with_context(|| format!("Unknown status '{name}'"))?;
            repo.list_by_status(status).await?
        }
        None => repo.list_recent(args.limit).await?,
    };

    println!(
        "{:<36}  {:<9} {:>8} {:>8} {:>5} {:>14}",
        "ID", "STATUS", "CALL", "PUT", "LOTS", "MARGIN"
    );
    for s in &suggestions {
        println!(
            "{:<36}  {:<9} {:>8} {:>8} {:>5} {:>14}",
            s.id,
            s.status.as_str(),
            s.proposal.call_strike.to_string(),
            s.proposal.put_strike.to_string(),
            s.lots,
            s.margin_required.to_string()
        );
    }
    Ok(suggestions)
}
