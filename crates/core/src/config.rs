use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrangleError};

/// Utilization fraction applied to the margin-limited lot count when sizing.
///
/// Configurable through `sizing.utilization_fraction`; this is the value in force
/// when nothing overrides it.
pub const DEFAULT_UTILIZATION_FRACTION: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub instrument: InstrumentConfig,
    pub accounts: Vec<AccountConfig>,
    pub pricing: PricingConfig,
    pub history: HistoryConfig,
    pub validator: ValidatorConfig,
    pub technical: TechnicalConfig,
    pub psych_levels: PsychLevelConfig,
    pub selection: SelectionConfig,
    pub sizing: SizingConfig,
    pub suggestion: SuggestionConfig,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://strangle.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

/// The traded underlying and its contract conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    pub symbol: String,
    pub lot_size: u32,
    /// Distance between adjacent strikes on the ladder.
    pub strike_increment: u32,
    /// Fixed expiry date (YYYY-MM-DD). Unset means the next weekly expiry.
    pub expiry: Option<NaiveDate>,
    /// Weekday of the weekly expiry.
    pub expiry_weekday: Weekday,
    /// Exchange close on expiry day, UTC.
    pub expiry_time_utc: NaiveTime,
}

impl InstrumentConfig {
    /// Expiry in force on `today`: the configured date, else the next weekly expiry
    /// on or after `today`.
    #[must_use]
    pub fn expiry_for(&self, today: NaiveDate) -> DateTime<Utc> {
        let date = self.expiry.unwrap_or_else(|| {
            let ahead = (7 + self.expiry_weekday.num_days_from_monday()
                - today.weekday().num_days_from_monday())
                % 7;
            today + Duration::days(i64::from(ahead))
        });
        date.and_time(self.expiry_time_utc).and_utc()
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            symbol: "NIFTY".to_string(),
            lot_size: 75,
            strike_increment: 50,
            expiry: None,
            expiry_weekday: Weekday::Tue,
            // 15:30 IST
            expiry_time_utc: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default(),
        }
    }
}

/// Which broker implementation serves an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    #[default]
    Paper,
    Replay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    #[serde(default)]
    pub broker: BrokerKind,
    /// Snapshot file for the replay broker.
    #[serde(default)]
    pub replay_file: Option<String>,
    /// Paper broker starting margin (rupees).
    #[serde(default = "default_paper_margin")]
    pub paper_margin: f64,
    /// Paper broker margin requirement per lot.
    #[serde(default = "default_paper_margin_per_lot")]
    pub paper_margin_per_lot: f64,
}

fn default_paper_margin() -> f64 {
    5_000_000.0
}

fn default_paper_margin_per_lot() -> f64 {
    192_000.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Annualised risk-free rate, e.g. 0.065 = 6.5%.
    pub risk_free_rate: f64,
    pub iv_max_iterations: u32,
    pub iv_tolerance: f64,
    /// Seed used when neither the volatility index nor a neighbouring strike is available.
    pub default_volatility: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.065,
            iv_max_iterations: 100,
            iv_tolerance: 1e-6,
            default_volatility: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Calendar days requested from the data provider on refresh, and kept in the window.
    pub lookback_days: u32,
    /// Minimum number of sessions the rolling window must hold.
    pub min_sessions: usize,
    /// Sessions used for support/resistance.
    pub level_lookback: usize,
    pub atr_period: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            lookback_days: 400,
            min_sessions: 250,
            level_lookback: 20,
            atr_period: 14,
        }
    }
}

/// WARN/FAIL pair for a single validator check, in percent (or index points for VIX).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Thresholds {
    pub warn: f64,
    pub fail: f64,
}

impl Thresholds {
    #[must_use]
    pub const fn new(warn: f64, fail: f64) -> Self {
        Self { warn, fail }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub gap_pct: Thresholds,
    pub intraday_range_pct: Thresholds,
    pub move_3d_pct: Thresholds,
    pub move_5d_pct: Thresholds,
    pub volatility_index: Thresholds,
    /// ATR as % of spot above which the regime check warns. Never fails.
    pub atr_warn_pct: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            gap_pct: Thresholds::new(0.5, 1.0),
            intraday_range_pct: Thresholds::new(1.5, 2.0),
            move_3d_pct: Thresholds::new(2.0, 3.0),
            move_5d_pct: Thresholds::new(3.5, 4.5),
            volatility_index: Thresholds::new(20.0, 25.0),
            atr_warn_pct: 1.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnicalConfig {
    /// A level within this % of spot counts as "near".
    pub proximity_pct: f64,
    /// Widening applied to a leg whose level is near.
    pub level_widening: f64,
    /// Widening applied to the leg the trend points at.
    pub trend_widening: f64,
    /// Absolute bound on any multiplier's deviation from 1.0.
    pub max_adjustment: f64,
}

impl Default for TechnicalConfig {
    fn default() -> Self {
        Self {
            proximity_pct: 1.0,
            level_widening: 0.15,
            trend_widening: 0.10,
            max_adjustment: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LevelTier {
    pub multiple: u32,
    pub danger_radius: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PsychLevelConfig {
    pub major: LevelTier,
    pub intermediate: LevelTier,
    pub minor: LevelTier,
    pub max_displacement_steps: u32,
}

impl Default for PsychLevelConfig {
    fn default() -> Self {
        Self {
            major: LevelTier {
                multiple: 1000,
                danger_radius: 50,
            },
            intermediate: LevelTier {
                multiple: 500,
                danger_radius: 50,
            },
            minor: LevelTier {
                multiple: 100,
                danger_radius: 25,
            },
            max_displacement_steps: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Absolute delta band for the short call; the put uses the mirrored band.
    pub target_delta_low: f64,
    pub target_delta_high: f64,
    /// Upper bound on ladder steps walked from ATM per leg.
    pub max_walk_steps: u32,
    /// Acceptable |call_delta + put_delta| x lot size.
    pub max_net_delta: f64,
    pub max_rebalance_steps: u32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            target_delta_low: 0.30,
            target_delta_high: 0.35,
            max_walk_steps: 60,
            max_net_delta: 3.75,
            max_rebalance_steps: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    pub utilization_fraction: f64,
    /// Adverse underlying moves (%) that trigger the additional averaging tranches.
    pub averaging_triggers_pct: Vec<f64>,
    /// Optional stop-loss as % of collected premium. Absent means no stop-loss is produced.
    pub stop_loss_pct: Option<f64>,
    /// Optional profit target as % of collected premium.
    pub target_pct: Option<f64>,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            utilization_fraction: DEFAULT_UTILIZATION_FRACTION,
            averaging_triggers_pct: vec![1.0, 2.0],
            stop_loss_pct: None,
            target_pct: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionConfig {
    pub ttl_minutes: i64,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self { ttl_minutes: 15 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Broker-imposed maximum lots per order call.
    pub max_lots_per_batch: u32,
    pub pacing_interval_ms: u64,
    pub order_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Heartbeats older than this many pacing intervals mark an execution abandoned.
    pub stall_multiplier: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_lots_per_batch: 24,
            pacing_interval_ms: 1_000,
            order_timeout_ms: 5_000,
            max_retries: 3,
            retry_backoff_ms: 250,
            stall_multiplier: 3,
        }
    }
}

impl AppConfig {
    /// Looks up an account by id.
    #[must_use]
    pub fn account(&self, id: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.id == id)
    }

    /// Rejects configurations the engine cannot run safely with.
    ///
    /// # Errors
    /// Returns `StrangleError::Configuration` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.instrument.lot_size == 0 {
            return Err(StrangleError::configuration("instrument.lot_size must be positive"));
        }
        if self.instrument.strike_increment == 0 {
            return Err(StrangleError::configuration(
                "instrument.strike_increment must be positive",
            ));
        }
        let util = self.sizing.utilization_fraction;
        if !(util > 0.0 && util <= 1.0) {
            return Err(StrangleError::configuration(format!(
                "sizing.utilization_fraction must be in (0, 1], got {util}"
            )));
        }
        let sel = &self.selection;
        if !(sel.target_delta_low > 0.0
            && sel.target_delta_low < sel.target_delta_high
            && sel.target_delta_high < 1.0)
        {
            return Err(StrangleError::configuration(format!(
                "selection delta band [{}, {}] is not a valid band",
                sel.target_delta_low, sel.target_delta_high
            )));
        }
        let v = &self.validator;
        for (name, t) in [
            ("gap_pct", v.gap_pct),
            ("intraday_range_pct", v.intraday_range_pct),
            ("move_3d_pct", v.move_3d_pct),
            ("move_5d_pct", v.move_5d_pct),
            ("volatility_index", v.volatility_index),
        ] {
            if t.warn > t.fail {
                return Err(StrangleError::configuration(format!(
                    "validator.{name}: warn {} above fail {}",
                    t.warn, t.fail
                )));
            }
        }
        if self.execution.max_lots_per_batch == 0 {
            return Err(StrangleError::configuration(
                "execution.max_lots_per_batch must be positive",
            ));
        }
        if self.technical.max_adjustment < 0.0 || self.technical.max_adjustment >= 1.0 {
            return Err(StrangleError::configuration(
                "technical.max_adjustment must be in [0, 1)",
            ));
        }
        Ok(())
    }
}
