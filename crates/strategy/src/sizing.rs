//! Margin-constrained position sizing.
//!
//! `max_lots = floor(available / per_lot)` and
//! `recommended = floor(max_lots * utilization_fraction)`. Averaging tranches
//! apply the same rule to whatever margin the earlier tranches leave behind.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use strangle_core::config::SizingConfig;
use strangle_core::error::{Result, StrangleError};
use strangle_core::suggestion::{ExitRule, Tranche};
use strangle_core::types::MarginState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingPlan {
    pub max_lots: u32,
    /// Lots for the initial tranche.
    pub recommended_lots: u32,
    pub utilization_fraction: Decimal,
    /// Margin blocked by the initial tranche.
    pub margin_used: Decimal,
    /// Initial tranche first, then the averaging tranches.
    pub stages: Vec<Tranche>,
    pub exit_rule: ExitRule,
    /// Unset unless a stop-loss was configured.
    pub stop_loss: Option<Decimal>,
    /// Unset unless a target was configured.
    pub target: Option<Decimal>,
    /// True when the account cannot fund a single lot at the utilization in force.
    pub margin_shortfall: bool,
}

impl SizingPlan {
    /// Lots across every tranche.
    #[must_use]
    pub fn total_planned_lots(&self) -> u32 {
        self.stages.iter().map(|t| t.lots).sum()
    }

    /// Fails when the plan cannot place a single lot.
    ///
    /// # Errors
    /// `MarginInsufficient` on a shortfall.
    pub fn require_lots(&self, margin: &MarginState) -> Result<u32> {
        if self.margin_shortfall {
            return Err(StrangleError::margin_insufficient(
                margin.available_margin,
                margin.margin_per_lot,
            ));
        }
        Ok(self.recommended_lots)
    }
}

pub struct PositionSizer {
    utilization: Decimal,
    triggers: Vec<Decimal>,
    exit_rule: ExitRule,
}

impl PositionSizer {
    /// # Errors
    /// `Configuration` if a fraction or percentage is not representable.
    pub fn new(config: &SizingConfig) -> Result<Self> {
        let utilization = Decimal::from_f64(config.utilization_fraction).ok_or_else(|| {
            StrangleError::configuration(format!(
                "utilization_fraction {} not representable",
                config.utilization_fraction
            ))
        })?;
        let to_decimal = |v: f64| {
            Decimal::from_f64(v)
                .map(|d| d.round_dp(4))
                .ok_or_else(|| StrangleError::configuration(format!("{v} not representable")))
        };
        let triggers = config
            .averaging_triggers_pct
            .iter()
            .take(2)
            .map(|v| to_decimal(*v))
            .collect::<Result<Vec<_>>>()?;
        let exit_rule = ExitRule {
            stop_loss_pct: config.stop_loss_pct.map(to_decimal).transpose()?,
            target_pct: config.target_pct.map(to_decimal).transpose()?,
        };
        Ok(Self {
            utilization: utilization.round_dp(6),
            triggers,
            exit_rule,
        })
    }

    #[must_use]
    pub const fn utilization(&self) -> Decimal {
        self.utilization
    }

    /// Margin-limited lot count for `available`.
    #[must_use]
    pub fn max_lots(available: Decimal, per_lot: Decimal) -> u32 {
        if per_lot <= Decimal::ZERO || available <= Decimal::ZERO {
            return 0;
        }
        (available / per_lot).floor().to_u32().unwrap_or(u32::MAX)
    }

    /// `floor(max_lots * utilization)`.
    #[must_use]
    pub fn recommended_lots(&self, max_lots: u32) -> u32 {
        (Decimal::from(max_lots) * self.utilization)
            .floor()
            .to_u32()
            .unwrap_or(0)
    }

    /// Sizes the position and its averaging plan.
    ///
    /// `combined_premium` is the per-unit call + put premium used for the exit levels.
    #[must_use]
    pub fn size_position(&self, margin: &MarginState, combined_premium: Decimal) -> SizingPlan {
        let per_lot = margin.margin_per_lot;
        let max_lots = Self::max_lots(margin.available_margin, per_lot);
        let recommended = self.recommended_lots(max_lots);
        let margin_used = per_lot * Decimal::from(recommended);

        let mut stages = vec![Tranche {
            stage: 1,
            lots: recommended,
            trigger_move_pct: None,
            margin_used,
        }];

        let mut remaining = margin.available_margin - margin_used;
        for (i, trigger) in self.triggers.iter().enumerate() {
            let lots = self.recommended_lots(Self::max_lots(remaining, per_lot));
            if lots == 0 {
                break;
            }
            let used = per_lot * Decimal::from(lots);
            remaining -= used;
            stages.push(Tranche {
                stage: i as u32 + 2,
                lots,
                trigger_move_pct: Some(*trigger),
                margin_used: used,
            });
        }

        let margin_shortfall = recommended == 0;
        if margin_shortfall {
            warn!(
                available = %margin.available_margin,
                per_lot = %per_lot,
                "Insufficient margin for a single lot"
            );
        }

        let plan = SizingPlan {
            max_lots,
            recommended_lots: recommended,
            utilization_fraction: self.utilization,
            margin_used,
            stages,
            exit_rule: self.exit_rule,
            stop_loss: self.exit_rule.stop_loss_level(combined_premium),
            target: self.exit_rule.target_level(combined_premium),
            margin_shortfall,
        };
        info!(
            max_lots,
            recommended_lots = recommended,
            tranches = plan.stages.len(),
            margin_used = %margin_used,
            "Position sized"
        );
        plan
    }
}
