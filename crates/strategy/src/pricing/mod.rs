//! Option pricing engine.

pub mod black_scholes;
pub mod implied_vol;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use strangle_core::error::{Result, StrangleError};
use strangle_core::types::{LadderEntry, OptionSide, QuoteSnapshot};

pub use black_scholes::{greeks, normal_cdf, Greeks};
pub use implied_vol::{IvSolver, IvSource, IV_CEILING, IV_FLOOR};

const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

/// Year fraction from `now` to `expiry`, floored at zero.
#[must_use]
pub fn time_to_expiry_years(now: DateTime<Utc>, expiry: DateTime<Utc>) -> f64 {
    let seconds = (expiry - now).num_seconds().max(0);
    seconds as f64 / SECONDS_PER_YEAR
}

/// Greeks for one leg at its solved volatility. Derived on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GreeksResult {
    pub side: OptionSide,
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub implied_vol: f64,
    /// Where `implied_vol` came from when the solver could not converge directly.
    pub iv_source: IvSource,
}

impl GreeksResult {
    #[must_use]
    pub fn from_greeks(
        g: &Greeks,
        side: OptionSide,
        implied_vol: f64,
        iv_source: IvSource,
    ) -> Self {
        Self {
            side,
            delta: g.delta(side),
            gamma: g.gamma,
            theta: g.theta(side),
            vega: g.vega,
            implied_vol,
            iv_source,
        }
    }

    /// True when the volatility was borrowed from the neighbouring strike.
    #[must_use]
    pub fn is_borrowed_vol(&self) -> bool {
        self.iv_source == IvSource::PreviousStrike
    }
}

/// Prices ladder entries against one quote and expiry.
#[derive(Debug, Clone)]
pub struct ChainPricer {
    solver: IvSolver,
    spot: f64,
    time_to_expiry: f64,
    volatility_index: Option<f64>,
    as_of: DateTime<Utc>,
}

impl ChainPricer {
    /// # Errors
    /// `DataUnavailable` if spot is not a positive number.
    pub fn new(
        solver: IvSolver,
        quote: &QuoteSnapshot,
        expiry: DateTime<Utc>,
    ) -> Result<Self> {
        let spot = quote
            .spot
            .to_f64()
            .filter(|s| *s > 0.0)
            .ok_or_else(|| StrangleError::data_unavailable(format!("invalid spot {}", quote.spot)))?;
        Ok(Self {
            solver,
            spot,
            time_to_expiry: time_to_expiry_years(quote.timestamp, expiry),
            volatility_index: quote.volatility_index.and_then(|v| v.to_f64()),
            as_of: quote.timestamp,
        })
    }

    #[must_use]
    pub const fn spot(&self) -> f64 {
        self.spot
    }

    #[must_use]
    pub const fn time_to_expiry(&self) -> f64 {
        self.time_to_expiry
    }

    /// Timestamp of the quote the pricer was built from.
    #[must_use]
    pub const fn as_of(&self) -> DateTime<Utc> {
        self.as_of
    }

    /// Solves the leg's volatility from its last traded price and returns its Greeks.
    ///
    /// `previous` is the volatility solved at the neighbouring strike, used when the
    /// solver cannot converge.
    ///
    /// # Errors
    /// `NumericConvergence` when the solver and every fallback fail.
    pub fn leg(
        &self,
        entry: &LadderEntry,
        side: OptionSide,
        previous: Option<f64>,
    ) -> Result<GreeksResult> {
        let strike = decimal_to_f64(entry.strike)?;
        let premium = decimal_to_f64(entry.premium(side))?;
        let (vol, source) = self.solver.solve_with_fallback(
            premium,
            self.spot,
            strike,
            self.time_to_expiry,
            side,
            self.volatility_index,
            previous,
        )?;
        let g = greeks(self.spot, strike, self.time_to_expiry, vol, self.solver.rate());
        Ok(GreeksResult::from_greeks(&g, side, vol, source))
    }
}

fn decimal_to_f64(value: Decimal) -> Result<f64> {
    value
        .to_f64()
        .ok_or_else(|| StrangleError::data_unavailable(format!("{value} not representable")))
}
