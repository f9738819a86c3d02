//! Psychological (round-number) level guard.
//!
//! Strikes sitting on or near round numbers attract open interest and pinning,
//! so a short leg there is displaced further out of the money. The guard is
//! idempotent and runs twice: on the raw proposal, and again after the chain
//! lookup, which can snap a leg back onto a round number.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use strangle_core::config::{LevelTier, PsychLevelConfig};
use strangle_core::error::{Result, StrangleError};
use strangle_core::proposal::{ProposalStage, StrikeProposal};
use strangle_core::types::{OptionSide, StrikeLadder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelTierKind {
    Major,
    Intermediate,
    Minor,
}

impl std::fmt::Display for LevelTierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Major => write!(f, "major"),
            Self::Intermediate => write!(f, "intermediate"),
            Self::Minor => write!(f, "minor"),
        }
    }
}

/// A round number a strike sits too close to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelHit {
    pub tier: LevelTierKind,
    pub level: Decimal,
    pub distance: Decimal,
}

/// One displacement step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardAdjustment {
    pub side: OptionSide,
    pub from: Decimal,
    pub to: Decimal,
    pub hit: LevelHit,
}

impl GuardAdjustment {
    fn reason(&self) -> String {
        format!(
            "{} level {} within {} pts",
            self.hit.tier, self.hit.level, self.hit.distance
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardOutcome {
    pub call_strike: Decimal,
    pub put_strike: Decimal,
    pub adjustments: Vec<GuardAdjustment>,
}

#[derive(Debug, Clone)]
pub struct PsychLevelGuard {
    tiers: [(LevelTierKind, LevelTier); 3],
    increment: Decimal,
    max_steps: u32,
}

impl PsychLevelGuard {
    #[must_use]
    pub fn new(config: &PsychLevelConfig, strike_increment: u32) -> Self {
        Self {
            tiers: [
                (LevelTierKind::Major, config.major),
                (LevelTierKind::Intermediate, config.intermediate),
                (LevelTierKind::Minor, config.minor),
            ],
            increment: Decimal::from(strike_increment),
            max_steps: config.max_displacement_steps,
        }
    }

    /// First (highest) tier whose danger zone contains `strike`.
    #[must_use]
    pub fn classify(&self, strike: Decimal) -> Option<LevelHit> {
        self.tiers.iter().find_map(|(kind, tier)| {
            if tier.multiple == 0 {
                return None;
            }
            let multiple = Decimal::from(tier.multiple);
            let level = (strike / multiple).round() * multiple;
            let distance = (strike - level).abs();
            (distance < Decimal::from(tier.danger_radius)).then_some(LevelHit {
                tier: *kind,
                level,
                distance,
            })
        })
    }

    #[must_use]
    pub fn is_safe(&self, strike: Decimal) -> bool {
        self.classify(strike).is_none()
    }

    /// Displaces each unsafe leg outward one increment at a time until it clears every zone.
    ///
    /// # Errors
    /// `NoSafeStrikeAvailable` if a leg is still unsafe after the displacement limit.
    pub fn check(
        &self,
        call_strike: Decimal,
        put_strike: Decimal,
        spot: Decimal,
    ) -> Result<GuardOutcome> {
        let mut adjustments = Vec::new();
        let call = self.displace(OptionSide::Call, call_strike, spot, &mut adjustments, |_| true)?;
        let put = self.displace(OptionSide::Put, put_strike, spot, &mut adjustments, |_| true)?;
        Ok(GuardOutcome {
            call_strike: call,
            put_strike: put,
            adjustments,
        })
    }

    /// Applies [`check`](Self::check) to a proposal, recording every move under `stage`.
    ///
    /// # Errors
    /// See [`check`](Self::check).
    pub fn apply(
        &self,
        proposal: &mut StrikeProposal,
        stage: ProposalStage,
        spot: Decimal,
    ) -> Result<Vec<GuardAdjustment>> {
        let outcome = self.check(proposal.call_strike, proposal.put_strike, spot)?;
        record(proposal, stage, &outcome.adjustments);
        Ok(outcome.adjustments)
    }

    /// Final check after chain substitution. Every displaced strike must exist on `ladder`.
    ///
    /// # Errors
    /// `NoSafeStrikeAvailable` if a displacement lands on a strike the chain does not list.
    pub fn apply_on_chain(
        &self,
        proposal: &mut StrikeProposal,
        ladder: &StrikeLadder,
        spot: Decimal,
    ) -> Result<Vec<GuardAdjustment>> {
        let mut adjustments = Vec::new();
        let on_chain = |strike: Decimal| ladder.get(strike).is_some();
        let call = self.displace(
            OptionSide::Call,
            proposal.call_strike,
            spot,
            &mut adjustments,
            on_chain,
        )?;
        let put = self.displace(
            OptionSide::Put,
            proposal.put_strike,
            spot,
            &mut adjustments,
            on_chain,
        )?;
        debug_assert!(self.is_safe(call) && self.is_safe(put));
        record(proposal, ProposalStage::PsychFinal, &adjustments);
        Ok(adjustments)
    }

    fn displace(
        &self,
        side: OptionSide,
        mut strike: Decimal,
        spot: Decimal,
        adjustments: &mut Vec<GuardAdjustment>,
        available: impl Fn(Decimal) -> bool,
    ) -> Result<Decimal> {
        let step = self.increment * Decimal::from(side.otm_direction());
        let mut steps = 0;
        while let Some(hit) = self.classify(strike) {
            if steps >= self.max_steps {
                warn!(%side, %strike, steps, "Displacement limit reached");
                return Err(StrangleError::no_safe_strike(side, strike));
            }
            let next = strike + step;
            if !available(next) {
                warn!(%side, from = %strike, to = %next, "Displaced strike missing from chain");
                return Err(StrangleError::no_safe_strike(side, next));
            }
            let adjustment = GuardAdjustment {
                side,
                from: strike,
                to: next,
                hit,
            };
            info!(
                %side,
                from = %strike,
                to = %next,
                tier = %hit.tier,
                level = %hit.level,
                otm_distance = %(next - spot).abs(),
                "Strike displaced off psychological level"
            );
            adjustments.push(adjustment);
            strike = next;
            steps += 1;
        }
        Ok(strike)
    }
}

fn record(proposal: &mut StrikeProposal, stage: ProposalStage, adjustments: &[GuardAdjustment]) {
    for adj in adjustments {
        proposal.move_strike(stage, adj.side, adj.to, adj.reason());
    }
}
