//! Substitutes the proposal's strikes with the nearest strikes the live chain lists.

use tracing::debug;

use strangle_core::error::{Result, StrangleError};
use strangle_core::proposal::{ProposalStage, StrikeProposal};
use strangle_core::types::{LadderEntry, OptionSide, StrikeLadder};

/// Chain rows backing both legs of a proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainQuote {
    pub call: LadderEntry,
    pub put: LadderEntry,
}

/// Moves each leg onto the nearest listed strike (ties further out of the money).
///
/// # Errors
/// `DataUnavailable` if the ladder is empty.
pub fn snap_to_chain(proposal: &mut StrikeProposal, ladder: &StrikeLadder) -> Result<()> {
    for side in [OptionSide::Call, OptionSide::Put] {
        let wanted = proposal.strike(side);
        let entry = ladder
            .nearest(wanted, side)
            .ok_or_else(|| StrangleError::data_unavailable("empty strike ladder"))?;
        if entry.strike != wanted {
            debug!(%side, %wanted, listed = %entry.strike, "Strike not listed, using nearest");
        }
        proposal.move_strike(
            ProposalStage::ChainLookup,
            side,
            entry.strike,
            format!("{wanted} not listed, nearest available"),
        );
    }
    Ok(())
}

/// Exact rows for the proposal's current strikes.
///
/// # Errors
/// `DataUnavailable` if either strike is missing from the ladder.
pub fn quote_legs(proposal: &StrikeProposal, ladder: &StrikeLadder) -> Result<ChainQuote> {
    let row = |side: OptionSide| {
        let strike = proposal.strike(side);
        ladder
            .get(strike)
            .cloned()
            .ok_or_else(|| StrangleError::data_unavailable(format!("{side} {strike} not on chain")))
    };
    Ok(ChainQuote {
        call: row(OptionSide::Call)?,
        put: row(OptionSide::Put)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn ladder(strikes: &[Decimal]) -> StrikeLadder {
        StrikeLadder::new(
            Utc::now(),
            strikes
                .iter()
                .map(|&strike| LadderEntry {
                    strike,
                    call_ltp: dec!(12.5),
                    put_ltp: dec!(11),
                    call_oi: 0,
                    put_oi: 0,
                })
                .collect(),
        )
    }

    #[test]
    fn snaps_to_nearest_listed_strike() {
        // chain only lists 100-point strikes far out
        let chain = ladder(&[dec!(24800), dec!(24900), dec!(27000), dec!(27100)]);
        let mut proposal = StrikeProposal::new(dec!(27050), dec!(24850), 0.1, -0.1, Utc::now());
        snap_to_chain(&mut proposal, &chain).unwrap();
        // ties go further out of the money
        assert_eq!(proposal.call_strike, dec!(27100));
        assert_eq!(proposal.put_strike, dec!(24800));
        assert_eq!(proposal.audit.len(), 2);
        assert!(proposal
            .audit
            .iter()
            .all(|a| a.stage == ProposalStage::ChainLookup));
    }

    #[test]
    fn listed_strikes_are_not_recorded() {
        let chain = ladder(&[dec!(24850), dec!(27050)]);
        let mut proposal = StrikeProposal::new(dec!(27050), dec!(24850), 0.1, -0.1, Utc::now());
        snap_to_chain(&mut proposal, &chain).unwrap();
        assert!(proposal.audit.is_empty());
        let quote = quote_legs(&proposal, &chain).unwrap();
        assert_eq!(quote.call.call_ltp, dec!(12.5));
        assert_eq!(quote.put.put_ltp, dec!(11));
    }

    #[test]
    fn empty_chain_is_unavailable() {
        let chain = ladder(&[]);
        let mut proposal = StrikeProposal::new(dec!(27050), dec!(24850), 0.1, -0.1, Utc::now());
        assert!(matches!(
            snap_to_chain(&mut proposal, &chain),
            Err(StrangleError::DataUnavailable { .. })
        ));
    }
}
