//! End-to-end strike pipeline.
//!
//! quote -> history + market-condition gate -> technical bias -> strike walk ->
//! psychological pre-check -> chain lookup -> psychological final check ->
//! sizing -> pending [`TradeSuggestion`].
//!
//! Everything after the data fetch is synchronous and deterministic for a given
//! snapshot. A FAIL from the gate, a missing spot or ladder, or an unsafe strike
//! aborts before any suggestion exists.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use strangle_core::config::AppConfig;
use strangle_core::error::{Result, StrangleError};
use strangle_core::proposal::{ProposalStage, StrikeProposal};
use strangle_core::suggestion::{NewSuggestion, SuggestionEdit, TradeSuggestion};
use strangle_core::traits::BrokerClients;
use strangle_core::types::{DailyBar, MarginState, OptionSide, QuoteSnapshot, StrikeLadder};
use strangle_signals::history::{HistoricalAnalyzer, HistoryWindow, MovementAnalysis};
use strangle_signals::market_conditions::{CheckStatus, MarketConditionValidator, ValidationReport};
use strangle_signals::technical::{DeltaMultipliers, TechnicalAdjuster};

use crate::chain_lookup::{quote_legs, snap_to_chain, ChainQuote};
use crate::pricing::{ChainPricer, IvSolver};
use crate::psych_levels::PsychLevelGuard;
use crate::sizing::{PositionSizer, SizingPlan};
use crate::strike_selection::{borrowed_vol_warning, StrikeSelector};

/// Gate verdict plus the history analysis behind it.
#[derive(Debug, Clone)]
pub struct MarketAssessment {
    pub report: ValidationReport,
    pub analysis: MovementAnalysis,
}

/// Final strikes with the chain rows they will be traded at.
#[derive(Debug, Clone)]
pub struct ProposalOutcome {
    pub proposal: StrikeProposal,
    pub legs: ChainQuote,
    pub multipliers: DeltaMultipliers,
    pub warnings: Vec<String>,
}

impl ProposalOutcome {
    /// Call + put premium per unit.
    #[must_use]
    pub fn combined_premium(&self) -> Decimal {
        self.legs.call.call_ltp + self.legs.put.put_ltp
    }
}

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// The gate failed; nothing was proposed.
    NoTrade(ValidationReport),
    Suggestion(Box<TradeSuggestion>),
}

pub struct StranglePipeline {
    config: AppConfig,
    analyzer: HistoricalAnalyzer,
    validator: MarketConditionValidator,
    adjuster: TechnicalAdjuster,
    guard: PsychLevelGuard,
    selector: StrikeSelector,
    sizer: PositionSizer,
    solver: IvSolver,
}

impl StranglePipeline {
    /// # Errors
    /// `Configuration` if the config does not validate.
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            analyzer: HistoricalAnalyzer::new(config.history.clone()),
            validator: MarketConditionValidator::new(config.validator.clone()),
            adjuster: TechnicalAdjuster::new(config.technical.clone()),
            guard: PsychLevelGuard::new(&config.psych_levels, config.instrument.strike_increment),
            selector: StrikeSelector::new(config.selection.clone(), config.instrument.lot_size),
            sizer: PositionSizer::new(&config.sizing)?,
            solver: IvSolver::new(&config.pricing),
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub const fn guard(&self) -> &PsychLevelGuard {
        &self.guard
    }

    /// Runs the history analysis and the market-condition gate.
    ///
    /// # Errors
    /// `DataUnavailable` if spot is not positive or the ladder is empty.
    pub fn assess(
        &self,
        quote: &QuoteSnapshot,
        ladder: &StrikeLadder,
        bars: &[DailyBar],
    ) -> Result<MarketAssessment> {
        if quote.spot <= Decimal::ZERO {
            return Err(StrangleError::data_unavailable(format!(
                "spot {} for {}",
                quote.spot, quote.symbol
            )));
        }
        if ladder.is_empty() {
            return Err(StrangleError::data_unavailable(format!(
                "strike ladder for {} expiring {}",
                quote.symbol, ladder.expiry
            )));
        }
        let analysis = self
            .analyzer
            .analyze(bars, quote.spot, quote.timestamp.date_naive());
        let report = self.validator.evaluate(quote, &analysis);
        Ok(MarketAssessment { report, analysis })
    }

    /// Market-condition verdict for a snapshot.
    ///
    /// # Errors
    /// See [`assess`](Self::assess).
    pub fn evaluate(
        &self,
        quote: &QuoteSnapshot,
        ladder: &StrikeLadder,
        bars: &[DailyBar],
    ) -> Result<ValidationReport> {
        self.assess(quote, ladder, bars).map(|a| a.report)
    }

    /// Selects, guards and chain-checks both strikes.
    ///
    /// # Errors
    /// `NoSafeStrikeAvailable` if the final psychological check cannot place a leg on
    /// the chain; `DataUnavailable` or `NumericConvergence` from pricing.
    pub fn propose_strikes(
        &self,
        quote: &QuoteSnapshot,
        ladder: &StrikeLadder,
        analysis: &MovementAnalysis,
    ) -> Result<ProposalOutcome> {
        let spot = quote.spot;
        let multipliers = self.adjuster.adjust_from(spot, analysis);
        let pricer = ChainPricer::new(self.solver.clone(), quote, ladder.expiry)?;

        let selection = self.selector.select(ladder, &pricer, spot, &multipliers)?;
        let mut proposal = selection.proposal;
        let mut warnings = selection.warnings;

        self.guard
            .apply(&mut proposal, ProposalStage::PsychPreLookup, spot)?;
        snap_to_chain(&mut proposal, ladder)?;
        self.guard.apply_on_chain(&mut proposal, ladder, spot)?;

        let legs = quote_legs(&proposal, ladder)?;
        let call = pricer.leg(&legs.call, OptionSide::Call, Some(selection.call_iv))?;
        let put = pricer.leg(&legs.put, OptionSide::Put, Some(selection.put_iv))?;
        for (side, strike, greeks) in [
            (OptionSide::Call, proposal.call_strike, &call),
            (OptionSide::Put, proposal.put_strike, &put),
        ] {
            let msg = borrowed_vol_warning(side, strike, greeks.implied_vol);
            if greeks.is_borrowed_vol() && !warnings.contains(&msg) {
                warn!("{msg}");
                warnings.push(msg);
            }
        }
        proposal.set_deltas(call.delta, put.delta);

        let net = proposal.net_delta_per_lot(self.config.instrument.lot_size);
        if net.abs() > self.config.selection.max_net_delta
            && !warnings.iter().any(|w| w.starts_with("net delta"))
        {
            let msg = format!(
                "net delta {net:.2} per lot outside ±{:.2} after level displacement",
                self.config.selection.max_net_delta
            );
            warn!("{msg}");
            warnings.push(msg);
        }

        info!(
            call_strike = %proposal.call_strike,
            put_strike = %proposal.put_strike,
            call_delta = proposal.call_delta,
            put_delta = proposal.put_delta,
            adjustments = proposal.audit.len(),
            "Strike proposal finalized"
        );
        Ok(ProposalOutcome {
            proposal,
            legs,
            multipliers,
            warnings,
        })
    }

    /// Sizes a finalized proposal against the account's margin.
    #[must_use]
    pub fn size_position(&self, outcome: &ProposalOutcome, margin: &MarginState) -> SizingPlan {
        self.sizer.size_position(margin, outcome.combined_premium())
    }

    /// Runs every stage on a fixed snapshot.
    ///
    /// # Errors
    /// Any fatal stage error; a gate FAIL is an `Ok(NoTrade)`, not an error.
    #[instrument(skip_all, fields(account = %account_id, symbol = %quote.symbol))]
    pub fn run_on_snapshot(
        &self,
        account_id: &str,
        quote: &QuoteSnapshot,
        ladder: &StrikeLadder,
        bars: &[DailyBar],
        margin: &MarginState,
        now: DateTime<Utc>,
    ) -> Result<PipelineOutcome> {
        let assessment = self.assess(quote, ladder, bars)?;
        if !assessment.report.is_tradeable() {
            info!(failed = assessment.report.failures().count(), "No-trade day");
            return Ok(PipelineOutcome::NoTrade(assessment.report));
        }

        let outcome = self.propose_strikes(quote, ladder, &assessment.analysis)?;
        let plan = self.size_position(&outcome, margin);

        let mut warnings: Vec<String> = assessment
            .report
            .checks()
            .iter()
            .filter(|c| c.status == CheckStatus::Warn)
            .map(|c| format!("{}: {}", c.kind.name(), c.reason))
            .collect();
        warnings.extend(outcome.warnings.iter().cloned());
        if plan.margin_shortfall {
            warnings.push(format!(
                "margin {} cannot fund one lot at {} per lot",
                margin.available_margin, margin.margin_per_lot
            ));
        }

        let suggestion = TradeSuggestion::new(
            NewSuggestion {
                account_id: account_id.to_string(),
                symbol: quote.symbol.clone(),
                expiry: ladder.expiry,
                lot_size: self.config.instrument.lot_size,
                call_premium: outcome.legs.call.call_ltp,
                put_premium: outcome.legs.put.put_ltp,
                proposal: outcome.proposal,
                lots: plan.recommended_lots,
                margin_per_lot: margin.margin_per_lot,
                exit_rule: plan.exit_rule,
                stages: plan.stages,
                warnings,
            },
            now,
            Duration::minutes(self.config.suggestion.ttl_minutes),
        );
        info!(
            id = %suggestion.id,
            lots = suggestion.lots,
            total_premium = %suggestion.total_premium,
            "Trade suggestion created"
        );
        Ok(PipelineOutcome::Suggestion(Box::new(suggestion)))
    }

    /// Fetches a snapshot through the account's collaborators and runs the pipeline.
    ///
    /// # Errors
    /// Quote, ladder or margin fetch failures, plus everything
    /// [`run_on_snapshot`](Self::run_on_snapshot) can return. A failed history fetch
    /// only degrades the checks that need it.
    pub async fn run(
        &self,
        clients: &BrokerClients,
        account_id: &str,
        window: &mut HistoryWindow,
        now: DateTime<Utc>,
    ) -> Result<PipelineOutcome> {
        let symbol = self.config.instrument.symbol.as_str();
        let quote = clients.market_data.quote_snapshot(symbol).await?;
        let expiry = self.config.instrument.expiry_for(now.date_naive());
        let ladder = clients.market_data.strike_ladder(symbol, expiry).await?;
        window
            .ensure_fresh(clients.market_data.as_ref(), symbol, &self.config.history, now)
            .await;
        let margin = clients.margin.margin_state(account_id, symbol).await?;
        self.run_on_snapshot(account_id, &quote, &ladder, window.bars(), &margin, now)
    }

    /// Applies a user edit after checking edited strikes against the level guard.
    ///
    /// When a strike moves, both legs are repriced against `quote` so the stored
    /// deltas describe the edited strikes. The suggestion is left untouched on error.
    ///
    /// # Errors
    /// `NoSafeStrikeAvailable` for an edited strike inside a danger zone,
    /// `DataUnavailable` or `NumericConvergence` from repricing, plus anything
    /// [`TradeSuggestion::apply_edit`] rejects.
    pub fn edit_suggestion(
        &self,
        suggestion: &mut TradeSuggestion,
        edit: &SuggestionEdit,
        quote: &QuoteSnapshot,
        ladder: &StrikeLadder,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for (side, strike) in [
            (OptionSide::Call, edit.call_strike),
            (OptionSide::Put, edit.put_strike),
        ] {
            if let Some(strike) = strike {
                if let Some(hit) = self.guard.classify(strike) {
                    warn!(%side, %strike, tier = %hit.tier, level = %hit.level, "Edit rejected, unsafe strike");
                    return Err(StrangleError::no_safe_strike(side, strike));
                }
            }
        }

        let mut edited = suggestion.clone();
        edited.apply_edit(edit, ladder, now)?;
        if edited.proposal.same_strikes(&suggestion.proposal) {
            *suggestion = edited;
            return Ok(());
        }

        let pricer = ChainPricer::new(self.solver.clone(), quote, ladder.expiry)?;
        let legs = quote_legs(&edited.proposal, ladder)?;
        let call = pricer.leg(&legs.call, OptionSide::Call, None)?;
        let put = pricer.leg(&legs.put, OptionSide::Put, None)?;
        for (side, strike, greeks) in [
            (OptionSide::Call, edited.proposal.call_strike, &call),
            (OptionSide::Put, edited.proposal.put_strike, &put),
        ] {
            if greeks.is_borrowed_vol() {
                warn!("{}", borrowed_vol_warning(side, strike, greeks.implied_vol));
            }
        }
        edited.proposal.set_deltas(call.delta, put.delta);
        info!(
            id = %edited.id,
            call_strike = %edited.proposal.call_strike,
            put_strike = %edited.proposal.put_strike,
            call_delta = edited.proposal.call_delta,
            put_delta = edited.proposal.put_delta,
            "Edited strikes repriced"
        );
        *suggestion = edited;
        Ok(())
    }
}
