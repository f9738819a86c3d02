//! Newton-Raphson implied volatility with a seeded fallback chain.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use strangle_core::config::PricingConfig;
use strangle_core::error::{Result, StrangleError};
use strangle_core::types::OptionSide;

use super::black_scholes::{greeks, intrinsic_value, MIN_TIME_TO_EXPIRY};

/// Volatility returned when the premium carries no time value.
pub const IV_FLOOR: f64 = 0.001;
/// Upper clamp for the Newton iterate.
pub const IV_CEILING: f64 = 5.0;

const MIN_VEGA: f64 = 1e-8;

/// Where a solved volatility came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IvSource {
    /// Converged from the configured default seed.
    Solved,
    /// Converged after re-seeding from the volatility index.
    VolatilityIndexSeed,
    /// Solver failed; the neighbouring strike's volatility was reused.
    PreviousStrike,
    /// Degenerate input, boundary value returned.
    Boundary,
}

#[derive(Debug, Clone)]
pub struct IvSolver {
    rate: f64,
    max_iterations: u32,
    tolerance: f64,
    default_seed: f64,
}

impl IvSolver {
    #[must_use]
    pub fn new(config: &PricingConfig) -> Self {
        Self {
            rate: config.risk_free_rate,
            max_iterations: config.iv_max_iterations,
            tolerance: config.iv_tolerance,
            default_seed: config.default_volatility,
        }
    }

    #[must_use]
    pub const fn rate(&self) -> f64 {
        self.rate
    }

    /// Solves for the volatility that reprices `observed_price`.
    ///
    /// # Errors
    /// `NumericConvergence` if the iterate does not settle within the iteration budget.
    pub fn implied_volatility(
        &self,
        observed_price: f64,
        spot: f64,
        strike: f64,
        time_to_expiry: f64,
        side: OptionSide,
        initial_guess: f64,
    ) -> Result<f64> {
        if let Some(boundary) =
            self.boundary(observed_price, spot, strike, time_to_expiry, side)
        {
            return Ok(boundary);
        }

        let mut vol = initial_guess.clamp(IV_FLOOR, IV_CEILING);
        for iteration in 0..self.max_iterations {
            let g = greeks(spot, strike, time_to_expiry, vol, self.rate);
            let diff = g.price(side) - observed_price;
            if diff.abs() < self.tolerance {
                debug!(strike, %side, vol, iteration, "IV converged");
                return Ok(vol);
            }
            if g.vega < MIN_VEGA {
                break;
            }
            vol = (vol - diff / g.vega).clamp(IV_FLOOR, IV_CEILING);
        }
        Err(StrangleError::NumericConvergence {
            iterations: self.max_iterations,
            last_estimate: vol,
        })
    }

    /// Solves with the fallback chain: default seed, then the volatility-index seed,
    /// then the previous strike's solved volatility as-is.
    ///
    /// # Errors
    /// `NumericConvergence` when every seed fails and there is no previous strike.
    pub fn solve_with_fallback(
        &self,
        observed_price: f64,
        spot: f64,
        strike: f64,
        time_to_expiry: f64,
        side: OptionSide,
        volatility_index: Option<f64>,
        previous: Option<f64>,
    ) -> Result<(f64, IvSource)> {
        if let Some(boundary) =
            self.boundary(observed_price, spot, strike, time_to_expiry, side)
        {
            return Ok((boundary, IvSource::Boundary));
        }

        let first = match self.implied_volatility(
            observed_price,
            spot,
            strike,
            time_to_expiry,
            side,
            self.default_seed,
        ) {
            Ok(vol) => return Ok((vol, IvSource::Solved)),
            Err(e) => e,
        };

        // index points to annualised fraction
        if let Some(seed) = volatility_index.map(|v| v / 100.0).filter(|v| *v > 0.0) {
            if let Ok(vol) =
                self.implied_volatility(observed_price, spot, strike, time_to_expiry, side, seed)
            {
                return Ok((vol, IvSource::VolatilityIndexSeed));
            }
        }

        match previous {
            Some(vol) => {
                warn!(strike, %side, vol, "IV solver failed; reusing neighbouring strike volatility");
                Ok((vol, IvSource::PreviousStrike))
            }
            None => Err(first),
        }
    }

    /// Boundary value for inputs Newton cannot work with.
    fn boundary(
        &self,
        observed_price: f64,
        spot: f64,
        strike: f64,
        time_to_expiry: f64,
        side: OptionSide,
    ) -> Option<f64> {
        if time_to_expiry < MIN_TIME_TO_EXPIRY {
            return Some(IV_FLOOR);
        }
        let intrinsic = intrinsic_value(spot, strike, time_to_expiry, self.rate, side);
        if observed_price <= intrinsic {
            return Some(IV_FLOOR);
        }
        let upper = match side {
            OptionSide::Call => spot,
            OptionSide::Put => strike * (-self.rate * time_to_expiry).exp(),
        };
        if observed_price >= upper {
            return Some(IV_CEILING);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEEK: f64 = 7.0 / 365.0;

    fn solver() -> IvSolver {
        IvSolver::new(&PricingConfig::default())
    }

    fn solver_with_budget(iterations: u32) -> IvSolver {
        IvSolver::new(&PricingConfig {
            iv_max_iterations: iterations,
            iv_tolerance: 1e-12,
            ..PricingConfig::default()
        })
    }

    #[test]
    fn recovers_pricing_volatility() {
        let s = solver();
        for (strike, side) in [
            (26_500.0, OptionSide::Call),
            (25_500.0, OptionSide::Put),
            (26_000.0, OptionSide::Call),
        ] {
            let price = greeks(25_958.0, strike, WEEK, 0.14, s.rate()).price(side);
            let vol = s
                .implied_volatility(price, 25_958.0, strike, WEEK, side, 0.3)
                .unwrap();
            assert!((vol - 0.14).abs() < 1e-4, "{strike} {side}: {vol}");
        }
    }

    #[test]
    fn premium_at_intrinsic_returns_floor() {
        let vol = solver()
            .implied_volatility(0.0, 25_958.0, 27_000.0, WEEK, OptionSide::Call, 0.2)
            .unwrap();
        assert_eq!(vol, IV_FLOOR);
    }

    #[test]
    fn expired_returns_floor() {
        let vol = solver()
            .implied_volatility(12.0, 25_958.0, 26_000.0, 0.0, OptionSide::Put, 0.2)
            .unwrap();
        assert_eq!(vol, IV_FLOOR);
    }

    #[test]
    fn exhausted_budget_is_a_convergence_error() {
        let s = solver_with_budget(1);
        let price = greeks(25_958.0, 26_500.0, WEEK, 0.2, s.rate()).call_price;
        let err = s
            .implied_volatility(price, 25_958.0, 26_500.0, WEEK, OptionSide::Call, 3.0)
            .unwrap_err();
        assert!(matches!(err, StrangleError::NumericConvergence { iterations: 1, .. }));
    }

    #[test]
    fn falls_back_to_previous_strike() {
        let s = solver_with_budget(1);
        let price = greeks(25_958.0, 26_500.0, WEEK, 0.2, s.rate()).call_price;
        let (vol, source) = s
            .solve_with_fallback(
                price,
                25_958.0,
                26_500.0,
                WEEK,
                OptionSide::Call,
                Some(13.5),
                Some(0.18),
            )
            .unwrap();
        assert_eq!(source, IvSource::PreviousStrike);
        assert_eq!(vol, 0.18);
    }

    #[test]
    fn no_fallback_propagates() {
        let s = solver_with_budget(1);
        let price = greeks(25_958.0, 26_500.0, WEEK, 0.2, s.rate()).call_price;
        assert!(s
            .solve_with_fallback(price, 25_958.0, 26_500.0, WEEK, OptionSide::Call, None, None)
            .is_err());
    }

    #[test]
    fn converges_from_default_seed() {
        let s = solver();
        let price = greeks(25_958.0, 26_300.0, WEEK, 0.12, s.rate()).call_price;
        let (vol, source) = s
            .solve_with_fallback(price, 25_958.0, 26_300.0, WEEK, OptionSide::Call, Some(12.0), None)
            .unwrap();
        assert_eq!(source, IvSource::Solved);
        assert!((vol - 0.12).abs() < 1e-4);
    }
}
