//! Delta-targeted strike selection.
//!
//! Each leg walks outward from the at-the-money strike, one listed strike at a
//! time, until its delta falls inside the target band. The band is divided by
//! the technical multiplier for that leg, so a widened leg settles further out.
//! Once both legs settle, the net delta per lot is checked and the heavier leg
//! is walked further out a bounded number of times.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use strangle_core::config::SelectionConfig;
use strangle_core::error::{Result, StrangleError};
use strangle_core::proposal::{ProposalStage, StrikeProposal};
use strangle_core::types::{OptionSide, StrikeLadder};
use strangle_signals::technical::DeltaMultipliers;

use crate::pricing::{ChainPricer, GreeksResult};

/// Absolute delta band for one leg after the technical multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeltaBand {
    pub low: f64,
    pub high: f64,
}

impl DeltaBand {
    #[must_use]
    pub fn scaled(low: f64, high: f64, multiplier: f64) -> Self {
        let m = if multiplier > 0.0 { multiplier } else { 1.0 };
        Self {
            low: low / m,
            high: high / m,
        }
    }

    #[must_use]
    pub fn contains(&self, abs_delta: f64) -> bool {
        abs_delta >= self.low && abs_delta <= self.high
    }

    /// Distance from the band, zero inside it.
    #[must_use]
    pub fn distance(&self, abs_delta: f64) -> f64 {
        if abs_delta < self.low {
            self.low - abs_delta
        } else if abs_delta > self.high {
            abs_delta - self.high
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LegPick {
    index: usize,
    greeks: GreeksResult,
}

impl LegPick {
    fn abs_delta(&self) -> f64 {
        self.greeks.delta.abs()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub proposal: StrikeProposal,
    pub call_band: DeltaBand,
    pub put_band: DeltaBand,
    pub call_iv: f64,
    pub put_iv: f64,
    /// Non-fatal findings: band not reachable, net delta not balanced.
    pub warnings: Vec<String>,
}

pub struct StrikeSelector {
    config: SelectionConfig,
    lot_size: u32,
}

impl StrikeSelector {
    #[must_use]
    pub const fn new(config: SelectionConfig, lot_size: u32) -> Self {
        Self { config, lot_size }
    }

    /// Selects both legs from `ladder`.
    ///
    /// # Errors
    /// `DataUnavailable` if the ladder is empty; `NumericConvergence` if a leg
    /// cannot be priced at all.
    pub fn select(
        &self,
        ladder: &StrikeLadder,
        pricer: &ChainPricer,
        spot: Decimal,
        multipliers: &DeltaMultipliers,
    ) -> Result<SelectionResult> {
        let atm = ladder
            .atm_strike(spot)
            .ok_or_else(|| StrangleError::data_unavailable("empty strike ladder"))?;
        let atm_index = ladder
            .entries()
            .iter()
            .position(|e| e.strike == atm)
            .ok_or_else(|| StrangleError::data_unavailable("ATM strike not on ladder"))?;

        let call_band = DeltaBand::scaled(
            self.config.target_delta_low,
            self.config.target_delta_high,
            multipliers.call,
        );
        let put_band = DeltaBand::scaled(
            self.config.target_delta_low,
            self.config.target_delta_high,
            multipliers.put,
        );

        let mut warnings = Vec::new();
        let mut call = self.walk(ladder, pricer, atm_index, OptionSide::Call, call_band, &mut warnings)?;
        let mut put = self.walk(ladder, pricer, atm_index, OptionSide::Put, put_band, &mut warnings)?;

        let strike_at = |pick: &LegPick| ladder.entries()[pick.index].strike;
        let mut proposal = StrikeProposal::new(atm, atm, 0.0, 0.0, pricer.as_of());
        for (side, pick, band) in [
            (OptionSide::Call, &call, call_band),
            (OptionSide::Put, &put, put_band),
        ] {
            proposal.move_strike(
                ProposalStage::Selection,
                side,
                strike_at(pick),
                format!(
                    "delta {:.3} vs band [{:.3}, {:.3}]",
                    pick.greeks.delta, band.low, band.high
                ),
            );
        }

        // net delta rebalance
        let mut best = (call, put);
        let mut steps = 0;
        while self.net_per_lot(&call, &put).abs() > self.config.max_net_delta {
            if steps >= self.config.max_rebalance_steps {
                break;
            }
            let side = if call.abs_delta() >= put.abs_delta() {
                OptionSide::Call
            } else {
                OptionSide::Put
            };
            let current = if side == OptionSide::Call { call } else { put };
            let Some(next) = self.step_out(ladder, pricer, current, side)? else {
                debug!(%side, "Ladder exhausted during rebalance");
                break;
            };
            if side == OptionSide::Call {
                call = next;
            } else {
                put = next;
            }
            steps += 1;
            if self.net_per_lot(&call, &put).abs() < self.net_per_lot(&best.0, &best.1).abs() {
                best = (call, put);
            }
        }

        let net = self.net_per_lot(&best.0, &best.1);
        if net.abs() > self.config.max_net_delta {
            let msg = format!(
                "net delta {net:.2} per lot outside ±{:.2} after {steps} rebalance steps",
                self.config.max_net_delta
            );
            warn!("{msg}");
            warnings.push(msg);
        }

        let (call, put) = best;
        for (side, pick) in [(OptionSide::Call, &call), (OptionSide::Put, &put)] {
            if pick.greeks.is_borrowed_vol() {
                let msg = borrowed_vol_warning(side, strike_at(pick), pick.greeks.implied_vol);
                warn!("{msg}");
                warnings.push(msg);
            }
            proposal.move_strike(
                ProposalStage::Rebalance,
                side,
                strike_at(pick),
                format!("net delta rebalance, leg delta {:.3}", pick.greeks.delta),
            );
        }
        proposal.set_deltas(call.greeks.delta, put.greeks.delta);

        info!(
            call_strike = %proposal.call_strike,
            put_strike = %proposal.put_strike,
            call_delta = proposal.call_delta,
            put_delta = proposal.put_delta,
            net_per_lot = net,
            "Strikes selected"
        );

        Ok(SelectionResult {
            proposal,
            call_band,
            put_band,
            call_iv: call.greeks.implied_vol,
            put_iv: put.greeks.implied_vol,
            warnings,
        })
    }

    fn net_per_lot(&self, call: &LegPick, put: &LegPick) -> f64 {
        (call.greeks.delta + put.greeks.delta) * f64::from(self.lot_size)
    }

    fn walk(
        &self,
        ladder: &StrikeLadder,
        pricer: &ChainPricer,
        atm_index: usize,
        side: OptionSide,
        band: DeltaBand,
        warnings: &mut Vec<String>,
    ) -> Result<LegPick> {
        let entries = ladder.entries();
        let mut previous: Option<LegPick> = None;
        let mut index = atm_index;

        for _ in 0..=self.config.max_walk_steps {
            let greeks = pricer.leg(
                &entries[index],
                side,
                previous.map(|p| p.greeks.implied_vol),
            )?;
            let pick = LegPick { index, greeks };
            let abs = pick.abs_delta();

            if band.contains(abs) {
                return Ok(pick);
            }
            if abs < band.low {
                // stepped over the band, keep whichever side of it is closer
                let chosen = match previous {
                    Some(prev) if band.distance(prev.abs_delta()) < band.distance(abs) => prev,
                    _ => pick,
                };
                let msg = format!(
                    "no {side} strike with delta in [{:.3}, {:.3}]; using {} (delta {:.3})",
                    band.low,
                    band.high,
                    entries[chosen.index].strike,
                    chosen.greeks.delta
                );
                warn!("{msg}");
                warnings.push(msg);
                return Ok(chosen);
            }

            previous = Some(pick);
            match next_index(index, side, entries.len()) {
                Some(next) => index = next,
                None => break,
            }
        }

        let last = previous.ok_or_else(|| StrangleError::data_unavailable("empty strike ladder"))?;
        let msg = format!(
            "{side} walk ended at {} with delta {:.3} above band",
            entries[last.index].strike, last.greeks.delta
        );
        warn!("{msg}");
        warnings.push(msg);
        Ok(last)
    }

    fn step_out(
        &self,
        ladder: &StrikeLadder,
        pricer: &ChainPricer,
        current: LegPick,
        side: OptionSide,
    ) -> Result<Option<LegPick>> {
        let Some(index) = next_index(current.index, side, ladder.entries().len()) else {
            return Ok(None);
        };
        let greeks = pricer.leg(
            &ladder.entries()[index],
            side,
            Some(current.greeks.implied_vol),
        )?;
        Ok(Some(LegPick { index, greeks }))
    }
}

/// Warning text for a leg whose delta rests on the neighbouring strike's volatility.
#[must_use]
pub fn borrowed_vol_warning(side: OptionSide, strike: Decimal, vol: f64) -> String {
    format!("{side} {strike} did not converge; delta uses neighbouring strike vol {vol:.4}")
}

/// Next index further out of the money, if the ladder has one.
fn next_index(index: usize, side: OptionSide, len: usize) -> Option<usize> {
    match side {
        OptionSide::Call => (index + 1 < len).then_some(index + 1),
        OptionSide::Put => index.checked_sub(1),
    }
}
