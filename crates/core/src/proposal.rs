//! Strike proposal and its audit trail.
//!
//! The proposal is mutated in place as it moves through the pipeline. Every
//! strike change goes through [`StrikeProposal::move_strike`], which records the
//! before/after values and emits a tracing event. Audit entries are stamped with
//! the proposal's `as_of` time, so identical snapshots give identical proposals.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::OptionSide;

/// Pipeline stage that changed a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStage {
    Selection,
    Rebalance,
    PsychPreLookup,
    ChainLookup,
    PsychFinal,
    ManualEdit,
}

impl std::fmt::Display for ProposalStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Selection => "selection",
            Self::Rebalance => "rebalance",
            Self::PsychPreLookup => "psych_pre_lookup",
            Self::ChainLookup => "chain_lookup",
            Self::PsychFinal => "psych_final",
            Self::ManualEdit => "manual_edit",
        };
        f.write_str(s)
    }
}

/// One recorded strike change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalAdjustment {
    pub stage: ProposalStage,
    pub side: OptionSide,
    pub before: Decimal,
    pub after: Decimal,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeProposal {
    pub call_strike: Decimal,
    pub put_strike: Decimal,
    pub call_delta: f64,
    pub put_delta: f64,
    pub net_delta: f64,
    /// Market time of the inputs behind the current strikes.
    pub as_of: DateTime<Utc>,
    #[serde(default)]
    pub audit: Vec<ProposalAdjustment>,
}

impl StrikeProposal {
    #[must_use]
    pub fn new(
        call_strike: Decimal,
        put_strike: Decimal,
        call_delta: f64,
        put_delta: f64,
        as_of: DateTime<Utc>,
    ) -> Self {
        Self {
            call_strike,
            put_strike,
            call_delta,
            put_delta,
            net_delta: call_delta + put_delta,
            as_of,
            audit: Vec::new(),
        }
    }

    #[must_use]
    pub fn strike(&self, side: OptionSide) -> Decimal {
        match side {
            OptionSide::Call => self.call_strike,
            OptionSide::Put => self.put_strike,
        }
    }

    /// Moves one leg and records the change. A no-op move is not recorded.
    pub fn move_strike(
        &mut self,
        stage: ProposalStage,
        side: OptionSide,
        after: Decimal,
        reason: impl Into<String>,
    ) {
        let before = self.strike(side);
        if before == after {
            return;
        }
        let reason = reason.into();
        info!(
            %stage,
            %side,
            before = %before,
            after = %after,
            reason = %reason,
            "Strike proposal adjusted"
        );
        match side {
            OptionSide::Call => self.call_strike = after,
            OptionSide::Put => self.put_strike = after,
        }
        self.audit.push(ProposalAdjustment {
            stage,
            side,
            before,
            after,
            reason,
            at: self.as_of,
        });
    }

    /// Moves the proposal's clock forward, e.g. before a user edit against a newer ladder.
    pub fn advance_to(&mut self, at: DateTime<Utc>) {
        if at > self.as_of {
            self.as_of = at;
        }
    }

    /// Replaces both deltas and recomputes the net.
    pub fn set_deltas(&mut self, call_delta: f64, put_delta: f64) {
        self.call_delta = call_delta;
        self.put_delta = put_delta;
        self.net_delta = call_delta + put_delta;
    }

    /// Net delta scaled to one lot.
    #[must_use]
    pub fn net_delta_per_lot(&self, lot_size: u32) -> f64 {
        self.net_delta * f64::from(lot_size)
    }

    /// True when both legs sit on the same strikes as `other`.
    #[must_use]
    pub fn same_strikes(&self, other: &Self) -> bool {
        self.call_strike == other.call_strike && self.put_strike == other.put_strike
    }
}
