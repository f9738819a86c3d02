//! Black-Scholes prices and Greeks for European options on an index.

use serde::{Deserialize, Serialize};
use strangle_core::types::OptionSide;

/// Below this time to expiry (years, about 30 seconds) the option is priced at intrinsic.
pub const MIN_TIME_TO_EXPIRY: f64 = 1e-6;
/// Below this volatility the option is priced at intrinsic.
pub const MIN_VOLATILITY: f64 = 1e-4;

const DAYS_PER_YEAR: f64 = 365.0;

/// Prices and sensitivities for both sides at one strike.
///
/// `vega` is per 1.00 of volatility, theta per calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub call_delta: f64,
    pub put_delta: f64,
    pub gamma: f64,
    pub call_theta: f64,
    pub put_theta: f64,
    pub vega: f64,
    pub call_price: f64,
    pub put_price: f64,
}

impl Greeks {
    #[must_use]
    pub const fn delta(&self, side: OptionSide) -> f64 {
        match side {
            OptionSide::Call => self.call_delta,
            OptionSide::Put => self.put_delta,
        }
    }

    #[must_use]
    pub const fn theta(&self, side: OptionSide) -> f64 {
        match side {
            OptionSide::Call => self.call_theta,
            OptionSide::Put => self.put_theta,
        }
    }

    #[must_use]
    pub const fn price(&self, side: OptionSide) -> f64 {
        match side {
            OptionSide::Call => self.call_price,
            OptionSide::Put => self.put_price,
        }
    }
}

/// Standard normal CDF via the error function.
#[must_use]
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + libm::erf(x / std::f64::consts::SQRT_2))
}

/// Standard normal density.
#[must_use]
pub fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Prices and Greeks under the lognormal model.
///
/// Near-zero time or volatility, and non-positive spot or strike, short-circuit to
/// the intrinsic boundary: step deltas, zero gamma/vega/theta.
#[must_use]
pub fn greeks(spot: f64, strike: f64, time_to_expiry: f64, volatility: f64, rate: f64) -> Greeks {
    if time_to_expiry < MIN_TIME_TO_EXPIRY
        || volatility < MIN_VOLATILITY
        || spot <= 0.0
        || strike <= 0.0
        || !volatility.is_finite()
    {
        return intrinsic(spot, strike, time_to_expiry.max(0.0), rate);
    }

    let sqrt_t = time_to_expiry.sqrt();
    let vol_sqrt_t = volatility * sqrt_t;
    let d1 = ((spot / strike).ln() + (rate + 0.5 * volatility * volatility) * time_to_expiry)
        / vol_sqrt_t;
    let d2 = d1 - vol_sqrt_t;

    let discount = (-rate * time_to_expiry).exp();
    let nd1 = normal_cdf(d1);
    let nd2 = normal_cdf(d2);
    let pdf_d1 = normal_pdf(d1);

    let call_price = spot * nd1 - strike * discount * nd2;
    let put_price = strike * discount * normal_cdf(-d2) - spot * normal_cdf(-d1);

    let decay = -spot * pdf_d1 * volatility / (2.0 * sqrt_t);
    let call_theta = (decay - rate * strike * discount * nd2) / DAYS_PER_YEAR;
    let put_theta = (decay + rate * strike * discount * normal_cdf(-d2)) / DAYS_PER_YEAR;

    Greeks {
        call_delta: nd1.clamp(0.0, 1.0),
        put_delta: (nd1 - 1.0).clamp(-1.0, 0.0),
        gamma: (pdf_d1 / (spot * vol_sqrt_t)).max(0.0),
        call_theta,
        put_theta,
        vega: (spot * pdf_d1 * sqrt_t).max(0.0),
        call_price: call_price.max(0.0),
        put_price: put_price.max(0.0),
    }
}

/// Discounted intrinsic value of one side.
#[must_use]
pub fn intrinsic_value(spot: f64, strike: f64, time_to_expiry: f64, rate: f64, side: OptionSide) -> f64 {
    let pv_strike = strike * (-rate * time_to_expiry.max(0.0)).exp();
    match side {
        OptionSide::Call => (spot - pv_strike).max(0.0),
        OptionSide::Put => (pv_strike - spot).max(0.0),
    }
}

fn intrinsic(spot: f64, strike: f64, time_to_expiry: f64, rate: f64) -> Greeks {
    let pv_strike = strike * (-rate * time_to_expiry).exp();
    let call_delta = if spot > pv_strike {
        1.0
    } else if spot < pv_strike {
        0.0
    } else {
        0.5
    };
    Greeks {
        call_delta,
        put_delta: call_delta - 1.0,
        gamma: 0.0,
        call_theta: 0.0,
        put_theta: 0.0,
        vega: 0.0,
        call_price: (spot - pv_strike).max(0.0),
        put_price: (pv_strike - spot).max(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: f64 = 0.065;
    const WEEK: f64 = 7.0 / 365.0;

    #[test]
    fn cdf_reference_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-12);
        assert!((normal_cdf(1.0) - 0.841_344_746).abs() < 1e-8);
        assert!((normal_cdf(-1.96) - 0.024_997_895).abs() < 1e-8);
    }

    #[test]
    fn deltas_and_gamma_stay_in_range() {
        for spot in [100.0, 25_958.0, 60_000.0] {
            for moneyness in [0.5, 0.8, 0.95, 1.0, 1.05, 1.2, 2.0] {
                for vol in [0.01, 0.1, 0.3, 1.5] {
                    for t in [1.0 / 365.0, WEEK, 0.5, 2.0] {
                        let g = greeks(spot, spot * moneyness, t, vol, RATE);
                        assert!((0.0..=1.0).contains(&g.call_delta), "{g:?}");
                        assert!((-1.0..=0.0).contains(&g.put_delta), "{g:?}");
                        assert!(g.gamma >= 0.0);
                        assert!(g.vega >= 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn put_call_parity() {
        let (s, k, t) = (25_958.0, 26_500.0, WEEK);
        let g = greeks(s, k, t, 0.14, RATE);
        let parity = s - k * (-RATE * t).exp();
        assert!((g.call_price - g.put_price - parity).abs() < 1e-6);
        assert!((g.call_delta - g.put_delta - 1.0).abs() < 1e-12);
    }

    #[test]
    fn textbook_value() {
        // S=100 K=100 T=1 r=5% vol=20%: call 10.4506, delta 0.6368
        let g = greeks(100.0, 100.0, 1.0, 0.2, 0.05);
        assert!((g.call_price - 10.4506).abs() < 1e-3);
        assert!((g.call_delta - 0.6368).abs() < 1e-3);
    }

    #[test]
    fn expired_option_is_intrinsic() {
        let g = greeks(26_000.0, 25_900.0, 0.0, 0.15, RATE);
        assert_eq!(g.call_delta, 1.0);
        assert_eq!(g.put_delta, 0.0);
        assert_eq!(g.gamma, 0.0);
        assert!((g.call_price - 100.0).abs() < 1e-9);
        assert_eq!(g.put_price, 0.0);

        let g = greeks(26_000.0, 27_000.0, WEEK, 0.0, RATE);
        assert_eq!(g.call_delta, 0.0);
        assert_eq!(g.put_delta, -1.0);
    }

    #[test]
    fn otm_call_delta_falls_with_strike() {
        let near = greeks(25_958.0, 26_200.0, WEEK, 0.13, RATE);
        let far = greeks(25_958.0, 26_800.0, WEEK, 0.13, RATE);
        assert!(near.call_delta > far.call_delta);
        // both strikes sit above spot, so the puts are in the money
        assert!(near.put_delta > far.put_delta);
    }
}
