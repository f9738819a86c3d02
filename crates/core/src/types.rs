//! Market data and order types shared across the workspace.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Option leg side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionSide {
    Call,
    Put,
}

impl OptionSide {
    /// Direction in which this leg moves further out of the money (+1 for calls, -1 for puts).
    #[must_use]
    pub const fn otm_direction(self) -> i64 {
        match self {
            Self::Call => 1,
            Self::Put => -1,
        }
    }
}

impl std::fmt::Display for OptionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CE"),
            Self::Put => write!(f, "PE"),
        }
    }
}

/// Point-in-time view of the underlying. Immutable once captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub symbol: String,
    pub spot: Decimal,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    /// Previous session close, when the feed supplies it.
    #[serde(default)]
    pub previous_close: Option<Decimal>,
    /// Volatility index level (e.g. India VIX), in index points.
    #[serde(default)]
    pub volatility_index: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// One daily OHLC session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// A single strike row of the option chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderEntry {
    pub strike: Decimal,
    pub call_ltp: Decimal,
    pub put_ltp: Decimal,
    #[serde(default)]
    pub call_oi: u64,
    #[serde(default)]
    pub put_oi: u64,
}

impl LadderEntry {
    /// Last traded price for the given side.
    #[must_use]
    pub fn premium(&self, side: OptionSide) -> Decimal {
        match side {
            OptionSide::Call => self.call_ltp,
            OptionSide::Put => self.put_ltp,
        }
    }

    /// Open interest for the given side.
    #[must_use]
    pub fn open_interest(&self, side: OptionSide) -> u64 {
        match side {
            OptionSide::Call => self.call_oi,
            OptionSide::Put => self.put_oi,
        }
    }
}

/// Ordered strikes for one expiry. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeLadder {
    pub expiry: DateTime<Utc>,
    entries: Vec<LadderEntry>,
}

impl StrikeLadder {
    /// Builds a ladder, sorting by strike and dropping duplicate strikes (first wins).
    #[must_use]
    pub fn new(expiry: DateTime<Utc>, mut entries: Vec<LadderEntry>) -> Self {
        entries.sort_by(|a, b| a.strike.cmp(&b.strike));
        entries.dedup_by(|b, a| a.strike == b.strike);
        Self { expiry, entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[LadderEntry] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact strike lookup.
    #[must_use]
    pub fn get(&self, strike: Decimal) -> Option<&LadderEntry> {
        self.entries
            .binary_search_by(|e| e.strike.cmp(&strike))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Strike nearest to `spot`; ties resolve to the lower strike.
    #[must_use]
    pub fn atm_strike(&self, spot: Decimal) -> Option<Decimal> {
        self.entries
            .iter()
            .min_by(|a, b| {
                (a.strike - spot)
                    .abs()
                    .cmp(&(b.strike - spot).abs())
                    .then(a.strike.cmp(&b.strike))
            })
            .map(|e| e.strike)
    }

    /// Available strike nearest to `strike`; ties resolve further out of the money for `side`.
    #[must_use]
    pub fn nearest(&self, strike: Decimal, side: OptionSide) -> Option<&LadderEntry> {
        self.entries.iter().min_by(|a, b| {
            let by_distance = (a.strike - strike).abs().cmp(&(b.strike - strike).abs());
            let further_otm = match side {
                OptionSide::Call => b.strike.cmp(&a.strike),
                OptionSide::Put => a.strike.cmp(&b.strike),
            };
            by_distance.then(further_otm)
        })
    }
}

/// Margin figures for one account and instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarginState {
    pub available_margin: Decimal,
    pub margin_per_lot: Decimal,
}

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderAction {
    Buy,
    Sell,
}

/// One leg of a batch order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLeg {
    pub symbol: String,
    pub expiry: DateTime<Utc>,
    pub strike: Decimal,
    pub side: OptionSide,
    pub action: OrderAction,
    /// Limit price per unit; `None` places at market.
    pub limit_price: Option<Decimal>,
}

impl OrderLeg {
    /// Human-readable leg description (e.g. "SELL NIFTY 27050CE").
    #[must_use]
    pub fn display_name(&self) -> String {
        let action = match self.action {
            OrderAction::Buy => "BUY",
            OrderAction::Sell => "SELL",
        };
        format!("{action} {} {}{}", self.symbol, self.strike, self.side)
    }
}

/// Broker acknowledgement for one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFill {
    pub broker_order_ids: Vec<String>,
    pub lots: u32,
    pub filled_at: DateTime<Utc>,
}
