//! Market condition gate.
//!
//! Six independent checks grade today's conditions. Any FAIL makes the day a
//! no-trade day, whatever the strike economics look like. A check whose input
//! is missing is reported as SKIPPED, never as PASS.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use strangle_core::config::{Thresholds, ValidatorConfig};
use strangle_core::types::QuoteSnapshot;

use crate::history::MovementAnalysis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Skipped,
    Pass,
    Warn,
    Fail,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skipped => write!(f, "SKIPPED"),
            Self::Pass => write!(f, "PASS"),
            Self::Warn => write!(f, "WARN"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Gap,
    IntradayRange,
    ThreeDayMove,
    FiveDayMove,
    VolatilityIndex,
    AtrRegime,
}

impl CheckKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gap => "gap_vs_previous_close",
            Self::IntradayRange => "intraday_range",
            Self::ThreeDayMove => "three_day_move",
            Self::FiveDayMove => "five_day_move",
            Self::VolatilityIndex => "volatility_index",
            Self::AtrRegime => "atr_regime",
        }
    }
}

/// Outcome of one check with the reading and the thresholds it was graded against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub kind: CheckKind,
    pub status: CheckStatus,
    pub reading: Option<f64>,
    pub warn_threshold: f64,
    /// `None` for WARN-only checks.
    pub fail_threshold: Option<f64>,
    pub reason: String,
}

/// Ordered check results for one evaluation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    checks: Vec<CheckResult>,
    pub evaluated_at: DateTime<Utc>,
}

impl ValidationReport {
    #[must_use]
    pub fn checks(&self) -> &[CheckResult] {
        &self.checks
    }

    /// FAIL if any check failed, else WARN if any warned, else PASS.
    #[must_use]
    pub fn verdict(&self) -> CheckStatus {
        let worst = self
            .checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(CheckStatus::Pass);
        worst.max(CheckStatus::Pass)
    }

    #[must_use]
    pub fn is_tradeable(&self) -> bool {
        self.verdict() != CheckStatus::Fail
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| c.status == CheckStatus::Fail)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| c.status == CheckStatus::Skipped)
    }

    #[must_use]
    pub fn get(&self, kind: CheckKind) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.kind == kind)
    }

    /// One line per check, for logs and the CLI.
    #[must_use]
    pub fn summary(&self) -> String {
        self.checks
            .iter()
            .map(|c| format!("[{}] {}: {}", c.status, c.kind.name(), c.reason))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct MarketConditionValidator {
    config: ValidatorConfig,
}

impl MarketConditionValidator {
    #[must_use]
    pub const fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Runs all six checks.
    #[must_use]
    pub fn evaluate(&self, quote: &QuoteSnapshot, analysis: &MovementAnalysis) -> ValidationReport {
        let previous_close = quote.previous_close.or(analysis.last_close);

        let gap = previous_close.and_then(|pc| abs_pct(quote.open - pc, pc));
        let range_base = previous_close.unwrap_or(quote.open);
        let range = abs_pct(quote.high - quote.low, range_base);
        let vix = quote.volatility_index.and_then(|v| v.to_f64());

        let checks = vec![
            graded(CheckKind::Gap, gap, self.config.gap_pct, "%", "no previous close"),
            graded(
                CheckKind::IntradayRange,
                range,
                self.config.intraday_range_pct,
                "%",
                "no intraday OHLC",
            ),
            graded(
                CheckKind::ThreeDayMove,
                analysis.move_3d_pct.map(f64::abs),
                self.config.move_3d_pct,
                "%",
                "fewer than 3 sessions of history",
            ),
            graded(
                CheckKind::FiveDayMove,
                analysis.move_5d_pct.map(f64::abs),
                self.config.move_5d_pct,
                "%",
                "fewer than 5 sessions of history",
            ),
            graded(
                CheckKind::VolatilityIndex,
                vix,
                self.config.volatility_index,
                "",
                "no volatility index level",
            ),
            self.atr_regime(analysis.atr_pct),
        ];

        let report = ValidationReport {
            checks,
            evaluated_at: quote.timestamp,
        };

        for check in report.checks() {
            match check.status {
                CheckStatus::Skipped => {
                    warn!(check = check.kind.name(), reason = %check.reason, "Check skipped");
                }
                CheckStatus::Warn | CheckStatus::Fail => {
                    warn!(
                        check = check.kind.name(),
                        status = %check.status,
                        reading = ?check.reading,
                        "Market condition flagged"
                    );
                }
                CheckStatus::Pass => {}
            }
        }
        if report.is_tradeable() {
            info!(verdict = %report.verdict(), "Market conditions evaluated");
        } else {
            warn!(
                failed = report.failures().count(),
                "Market conditions FAIL, no-trade day"
            );
        }
        report
    }

    fn atr_regime(&self, atr_pct: Option<f64>) -> CheckResult {
        let warn_at = self.config.atr_warn_pct;
        let (status, reason) = match atr_pct {
            None => (CheckStatus::Skipped, "insufficient history for ATR".to_string()),
            Some(v) if v > warn_at => (
                CheckStatus::Warn,
                format!("ATR {v:.2}% of spot above {warn_at:.2}%, high-volatility regime"),
            ),
            Some(v) => (CheckStatus::Pass, format!("ATR {v:.2}% of spot")),
        };
        CheckResult {
            kind: CheckKind::AtrRegime,
            status,
            reading: atr_pct,
            warn_threshold: warn_at,
            fail_threshold: None,
            reason,
        }
    }
}

/// Grades a reading: above `fail` fails, above `warn` warns, otherwise passes.
#[must_use]
pub fn grade(reading: f64, thresholds: Thresholds) -> CheckStatus {
    if reading > thresholds.fail {
        CheckStatus::Fail
    } else if reading > thresholds.warn {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    }
}

fn graded(
    kind: CheckKind,
    reading: Option<f64>,
    thresholds: Thresholds,
    unit: &str,
    missing: &str,
) -> CheckResult {
    let (status, reason) = match reading {
        None => (CheckStatus::Skipped, missing.to_string()),
        Some(v) => {
            let status = grade(v, thresholds);
            let reason = match status {
                CheckStatus::Fail => format!("{v:.2}{unit} above fail {:.2}{unit}", thresholds.fail),
                CheckStatus::Warn => format!("{v:.2}{unit} above warn {:.2}{unit}", thresholds.warn),
                _ => format!("{v:.2}{unit} within limits"),
            };
            (status, reason)
        }
    };
    CheckResult {
        kind,
        status,
        reading,
        warn_threshold: thresholds.warn,
        fail_threshold: Some(thresholds.fail),
        reason,
    }
}

fn abs_pct(diff: Decimal, base: Decimal) -> Option<f64> {
    if base.is_zero() {
        return None;
    }
    (diff.abs() / base * Decimal::ONE_HUNDRED).to_f64()
}
