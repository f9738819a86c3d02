//! Trade suggestion record and its lifecycle.
//!
//! A suggestion is created once per pipeline run and only changes through the
//! methods here. Dependent money fields are always re-derived from ladder
//! premiums, lot size and margin-per-lot; callers never supply them directly.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, StrangleError};
use crate::proposal::{ProposalStage, StrikeProposal};
use crate::types::{OrderAction, OptionSide, OrderLeg, StrikeLadder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestionStatus {
    Pending,
    Approved,
    Executed,
    Rejected,
    Expired,
}

impl SuggestionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Executed => "EXECUTED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "APPROVED" => Some(Self::Approved),
            "EXECUTED" => Some(Self::Executed),
            "REJECTED" => Some(Self::Rejected),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional exit levels, expressed as % of the combined premium collected.
///
/// An unset percentage yields no level at all; nothing is synthesised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitRule {
    pub stop_loss_pct: Option<Decimal>,
    pub target_pct: Option<Decimal>,
}

impl ExitRule {
    /// Combined-premium level at which the short strangle is stopped out.
    #[must_use]
    pub fn stop_loss_level(&self, combined_premium: Decimal) -> Option<Decimal> {
        self.stop_loss_pct
            .map(|pct| (combined_premium * (Decimal::ONE + pct / Decimal::ONE_HUNDRED)).round_dp(2))
    }

    /// Combined-premium level at which profit is booked.
    #[must_use]
    pub fn target_level(&self, combined_premium: Decimal) -> Option<Decimal> {
        self.target_pct
            .map(|pct| (combined_premium * (Decimal::ONE - pct / Decimal::ONE_HUNDRED)).round_dp(2))
    }
}

/// One tranche of the averaging plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tranche {
    /// 1-based stage number.
    pub stage: u32,
    pub lots: u32,
    /// Adverse underlying move (%) that triggers this tranche; `None` for the initial entry.
    pub trigger_move_pct: Option<Decimal>,
    pub margin_used: Decimal,
}

/// Fields a user may change on a pending suggestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestionEdit {
    pub lots: Option<u32>,
    pub call_strike: Option<Decimal>,
    pub put_strike: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSuggestion {
    pub id: Uuid,
    pub account_id: String,
    pub symbol: String,
    pub expiry: DateTime<Utc>,
    pub lot_size: u32,
    pub proposal: StrikeProposal,
    pub call_premium: Decimal,
    pub put_premium: Decimal,
    pub lots: u32,
    pub margin_per_lot: Decimal,
    pub margin_required: Decimal,
    pub total_premium: Decimal,
    pub exit_rule: ExitRule,
    pub stop_loss: Option<Decimal>,
    pub target: Option<Decimal>,
    pub stages: Vec<Tranche>,
    pub warnings: Vec<String>,
    pub status: SuggestionStatus,
    pub status_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inputs for a freshly built suggestion.
#[derive(Debug, Clone)]
pub struct NewSuggestion {
    pub account_id: String,
    pub symbol: String,
    pub expiry: DateTime<Utc>,
    pub lot_size: u32,
    pub proposal: StrikeProposal,
    pub call_premium: Decimal,
    pub put_premium: Decimal,
    pub lots: u32,
    pub margin_per_lot: Decimal,
    pub exit_rule: ExitRule,
    pub stages: Vec<Tranche>,
    pub warnings: Vec<String>,
}

impl TradeSuggestion {
    /// Creates a pending suggestion that expires `ttl` after `now`.
    #[must_use]
    pub fn new(input: NewSuggestion, now: DateTime<Utc>, ttl: Duration) -> Self {
        let mut suggestion = Self {
            id: Uuid::new_v4(),
            account_id: input.account_id,
            symbol: input.symbol,
            expiry: input.expiry,
            lot_size: input.lot_size,
            proposal: input.proposal,
            call_premium: input.call_premium,
            put_premium: input.put_premium,
            lots: input.lots,
            margin_per_lot: input.margin_per_lot,
            margin_required: Decimal::ZERO,
            total_premium: Decimal::ZERO,
            exit_rule: input.exit_rule,
            stop_loss: None,
            target: None,
            stages: input.stages,
            warnings: input.warnings,
            status: SuggestionStatus::Pending,
            status_reason: None,
            created_at: now,
            expires_at: now + ttl,
            updated_at: now,
        };
        suggestion.rederive();
        suggestion
    }

    /// Combined premium per unit (call + put).
    #[must_use]
    pub fn combined_premium(&self) -> Decimal {
        self.call_premium + self.put_premium
    }

    /// Recomputes margin, total premium and exit levels from the primary fields.
    fn rederive(&mut self) {
        let lots = Decimal::from(self.lots);
        self.margin_required = self.margin_per_lot * lots;
        self.total_premium = self.combined_premium() * lots * Decimal::from(self.lot_size);
        let combined = self.combined_premium();
        self.stop_loss = self.exit_rule.stop_loss_level(combined);
        self.target = self.exit_rule.target_level(combined);
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Expires a pending or approved suggestion whose window has passed. Returns true
    /// if it changed. An approved suggestion carries premiums from its snapshot, so it
    /// must not be executed after the window either.
    pub fn expire_if_stale(&mut self, now: DateTime<Utc>) -> bool {
        if matches!(
            self.status,
            SuggestionStatus::Pending | SuggestionStatus::Approved
        ) && self.is_expired(now)
        {
            let reason = match self.status {
                SuggestionStatus::Approved => "execution window elapsed",
                _ => "approval window elapsed",
            };
            self.status = SuggestionStatus::Expired;
            self.status_reason = Some(reason.to_string());
            self.updated_at = now;
            info!(id = %self.id, "Suggestion expired");
            return true;
        }
        false
    }

    /// Approves a pending suggestion.
    ///
    /// # Errors
    /// `InvalidTransition` unless the suggestion is pending and inside its window.
    pub fn approve(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.expire_if_stale(now) {
            return Err(StrangleError::invalid_transition(format!(
                "suggestion {} expired at {}",
                self.id, self.expires_at
            )));
        }
        self.require(SuggestionStatus::Pending, "approve")?;
        if self.lots == 0 {
            return Err(StrangleError::margin_insufficient(
                Decimal::ZERO,
                self.margin_per_lot,
            ));
        }
        self.status = SuggestionStatus::Approved;
        self.updated_at = now;
        info!(id = %self.id, lots = self.lots, "Suggestion approved");
        Ok(())
    }

    /// Rejects a pending or approved suggestion.
    ///
    /// # Errors
    /// `InvalidTransition` from any terminal state.
    pub fn reject(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        if !matches!(
            self.status,
            SuggestionStatus::Pending | SuggestionStatus::Approved
        ) {
            return Err(StrangleError::invalid_transition(format!(
                "cannot reject suggestion in {}",
                self.status
            )));
        }
        self.status = SuggestionStatus::Rejected;
        self.status_reason = Some(reason.into());
        self.updated_at = now;
        Ok(())
    }

    /// Marks an approved suggestion as sent for execution.
    ///
    /// # Errors
    /// `InvalidTransition` unless approved and inside its window.
    pub fn mark_executed(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_executable(now)?;
        self.status = SuggestionStatus::Executed;
        self.updated_at = now;
        Ok(())
    }

    /// Applies a parameter edit to a pending suggestion.
    ///
    /// Strike changes take premiums from `ladder`; margin and total premium are re-derived.
    /// Strike safety (psychological levels) is the caller's responsibility.
    ///
    /// # Errors
    /// `InvalidTransition` unless pending; `DataUnavailable` if an edited strike is not on the ladder.
    pub fn apply_edit(
        &mut self,
        edit: &SuggestionEdit,
        ladder: &StrikeLadder,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.expire_if_stale(now) {
            return Err(StrangleError::invalid_transition(format!(
                "suggestion {} expired",
                self.id
            )));
        }
        self.require(SuggestionStatus::Pending, "edit")?;

        let mut moves = Vec::with_capacity(2);
        for (side, strike) in [
            (OptionSide::Call, edit.call_strike),
            (OptionSide::Put, edit.put_strike),
        ] {
            let Some(strike) = strike else { continue };
            let entry = ladder.get(strike).ok_or_else(|| {
                StrangleError::data_unavailable(format!("{side} {strike} not on chain"))
            })?;
            moves.push((side, strike, entry.premium(side)));
        }

        if !moves.is_empty() {
            self.proposal.advance_to(now);
        }
        for (side, strike, premium) in moves {
            self.proposal
                .move_strike(ProposalStage::ManualEdit, side, strike, "user edit");
            match side {
                OptionSide::Call => self.call_premium = premium,
                OptionSide::Put => self.put_premium = premium,
            }
        }
        if let Some(lots) = edit.lots {
            self.lots = lots;
        }
        self.rederive();
        self.updated_at = now;
        Ok(())
    }

    /// Short call and short put legs at the suggested premiums.
    #[must_use]
    pub fn order_legs(&self) -> Vec<OrderLeg> {
        [
            (OptionSide::Call, self.proposal.call_strike, self.call_premium),
            (OptionSide::Put, self.proposal.put_strike, self.put_premium),
        ]
        .into_iter()
        .map(|(side, strike, premium)| OrderLeg {
            symbol: self.symbol.clone(),
            expiry: self.expiry,
            strike,
            side,
            action: OrderAction::Sell,
            limit_price: Some(premium),
        })
        .collect()
    }

    /// Expires a stale suggestion, then checks it is approved.
    ///
    /// # Errors
    /// `InvalidTransition` if it just expired or is not approved.
    pub fn ensure_executable(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.expire_if_stale(now) {
            return Err(StrangleError::invalid_transition(format!(
                "suggestion {} expired at {}",
                self.id, self.expires_at
            )));
        }
        self.require(SuggestionStatus::Approved, "execute")
    }

    fn require(&self, expected: SuggestionStatus, op: &str) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(StrangleError::invalid_transition(format!(
                "cannot {op} suggestion {} in {} (expected {expected})",
                self.id, self.status
            )))
        }
    }
}
