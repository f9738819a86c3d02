//! Technical bias for strike selection.
//!
//! Produces a (call, put) multiplier pair. A multiplier above 1.0 pushes that
//! leg further out of the money: the strike selector divides the target delta
//! band by it. Resistance close above spot widens the call, support close below
//! widens the put, and the trend widens whichever leg it is running towards.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use strangle_core::config::TechnicalConfig;

use crate::history::{MovementAnalysis, Trend};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaMultipliers {
    pub call: f64,
    pub put: f64,
    /// Signals that contributed, for the audit log.
    pub reasons: Vec<String>,
}

impl DeltaMultipliers {
    /// No bias.
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            call: 1.0,
            put: 1.0,
            reasons: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_neutral(&self) -> bool {
        (self.call - 1.0).abs() < f64::EPSILON && (self.put - 1.0).abs() < f64::EPSILON
    }
}

impl Default for DeltaMultipliers {
    fn default() -> Self {
        Self::neutral()
    }
}

pub struct TechnicalAdjuster {
    config: TechnicalConfig,
}

impl TechnicalAdjuster {
    #[must_use]
    pub const fn new(config: TechnicalConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn adjust(
        &self,
        spot: Decimal,
        support: Option<Decimal>,
        resistance: Option<Decimal>,
        trend: Trend,
    ) -> DeltaMultipliers {
        let mut call = 1.0;
        let mut put = 1.0;
        let mut reasons = Vec::new();

        if let Some(r) = resistance {
            if let Some(dist) = distance_pct(r - spot, spot) {
                if (0.0..=self.config.proximity_pct).contains(&dist) {
                    call += self.config.level_widening;
                    reasons.push(format!("resistance {r} within {dist:.2}% above spot"));
                }
            }
        }
        if let Some(s) = support {
            if let Some(dist) = distance_pct(spot - s, spot) {
                if (0.0..=self.config.proximity_pct).contains(&dist) {
                    put += self.config.level_widening;
                    reasons.push(format!("support {s} within {dist:.2}% below spot"));
                }
            }
        }
        match trend {
            Trend::Uptrend => {
                call += self.config.trend_widening;
                reasons.push("uptrend widens call".to_string());
            }
            Trend::Downtrend => {
                put += self.config.trend_widening;
                reasons.push("downtrend widens put".to_string());
            }
            Trend::Range => {}
        }

        let lo = 1.0 - self.config.max_adjustment;
        let hi = 1.0 + self.config.max_adjustment;
        let multipliers = DeltaMultipliers {
            call: call.clamp(lo, hi),
            put: put.clamp(lo, hi),
            reasons,
        };
        debug!(
            call = multipliers.call,
            put = multipliers.put,
            signals = multipliers.reasons.len(),
            "Technical multipliers"
        );
        multipliers
    }

    /// Convenience over a full movement analysis.
    #[must_use]
    pub fn adjust_from(&self, spot: Decimal, analysis: &MovementAnalysis) -> DeltaMultipliers {
        self.adjust(spot, analysis.support, analysis.resistance, analysis.trend)
    }
}

fn distance_pct(diff: Decimal, spot: Decimal) -> Option<f64> {
    if spot.is_zero() {
        return None;
    }
    (diff / spot * Decimal::ONE_HUNDRED).to_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn adjuster() -> TechnicalAdjuster {
        TechnicalAdjuster::new(TechnicalConfig::default())
    }

    #[test]
    fn no_signals_is_neutral() {
        let m = adjuster().adjust(dec!(26000), Some(dec!(24000)), Some(dec!(28000)), Trend::Range);
        assert!(m.is_neutral());
        assert!(m.reasons.is_empty());
    }

    #[test]
    fn resistance_nearby_widens_call_only() {
        let m = adjuster().adjust(dec!(26000), None, Some(dec!(26150)), Trend::Range);
        assert!((m.call - 1.15).abs() < 1e-12);
        assert!((m.put - 1.0).abs() < 1e-12);
    }

    #[test]
    fn support_nearby_widens_put_only() {
        let m = adjuster().adjust(dec!(26000), Some(dec!(25900)), None, Trend::Range);
        assert!((m.put - 1.15).abs() < 1e-12);
        assert!((m.call - 1.0).abs() < 1e-12);
    }

    #[test]
    fn stacked_signals_are_clamped() {
        // resistance near plus uptrend would be 1.25
        let m = adjuster().adjust(dec!(26000), None, Some(dec!(26100)), Trend::Uptrend);
        assert!((m.call - 1.20).abs() < 1e-12);
        assert_eq!(m.reasons.len(), 2);
    }

    #[test]
    fn broken_level_is_ignored() {
        // spot already through resistance
        let m = adjuster().adjust(dec!(26000), None, Some(dec!(25950)), Trend::Range);
        assert!(m.is_neutral());
    }

    #[test]
    fn downtrend_widens_put() {
        let m = adjuster().adjust(dec!(26000), None, None, Trend::Downtrend);
        assert!((m.put - 1.10).abs() < 1e-12);
        assert!((m.call - 1.0).abs() < 1e-12);
    }
}
