//! Integration tests for the strangle pipeline.
//!
//! These tests drive the full pipeline over synthetic chains priced with a flat
//! volatility:
//! - Gate verdicts short-circuiting the pipeline
//! - Final strikes clearing every psychological level
//! - Fail-closed behaviour when the chain has no safe strike
//! - Determinism on identical snapshots
//! - The async entry point over mock collaborators

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use strangle_core::config::AppConfig;
use strangle_core::error::{Result, StrangleError};
use strangle_core::suggestion::{SuggestionEdit, SuggestionStatus, TradeSuggestion};
use strangle_core::traits::{BrokerClients, MarginProvider, MarketDataProvider, OrderGateway};
use strangle_core::types::{
    BatchFill, DailyBar, LadderEntry, MarginState, OrderLeg, QuoteSnapshot, StrikeLadder,
};
use strangle_signals::history::HistoryWindow;
use strangle_signals::market_conditions::{CheckKind, CheckStatus};
use strangle_strategy::pricing::{greeks, time_to_expiry_years};
use strangle_strategy::{PipelineOutcome, StranglePipeline};

// =============================================================================
// Helper Functions
// =============================================================================

const VOL: f64 = 0.13;

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-10-15T05:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Ladder priced at a flat volatility, 24000-28000 every `step` points.
fn chain(spot: Decimal, at: DateTime<Utc>, step: i64) -> StrikeLadder {
    let expiry = at + Duration::days(7);
    let t = time_to_expiry_years(at, expiry);
    let rate = AppConfig::default().pricing.risk_free_rate;
    let s = spot.to_f64().unwrap();
    let entries = (0..=(4000 / step))
        .map(|i| {
            let strike = dec!(24000) + Decimal::from(i * step);
            let g = greeks(s, strike.to_f64().unwrap(), t, VOL, rate);
            LadderEntry {
                strike,
                call_ltp: Decimal::from_f64(g.call_price).unwrap().round_dp(2),
                put_ltp: Decimal::from_f64(g.put_price).unwrap().round_dp(2),
                call_oi: 1_000,
                put_oi: 1_000,
            }
        })
        .collect();
    StrikeLadder::new(expiry, entries)
}

fn quote(spot: Decimal, open: Decimal, previous_close: Decimal, at: DateTime<Utc>) -> QuoteSnapshot {
    QuoteSnapshot {
        symbol: "NIFTY".to_string(),
        spot,
        open,
        high: spot.max(open) + dec!(30),
        low: spot.min(open) - dec!(30),
        previous_close: Some(previous_close),
        volatility_index: Some(dec!(13)),
        timestamp: at,
    }
}

/// A year of flat closes with wide ranges, so no level sits near spot.
fn calm_bars(as_of: NaiveDate, close: Decimal) -> Vec<DailyBar> {
    (0..260)
        .map(|i| DailyBar {
            date: as_of - Duration::days(260 - i),
            open: close,
            high: close + dec!(400),
            low: close - dec!(400),
            close,
        })
        .collect()
}

fn margin() -> MarginState {
    MarginState {
        available_margin: dec!(38413056),
        margin_per_lot: dec!(192000),
    }
}

fn pipeline() -> StranglePipeline {
    StranglePipeline::new(AppConfig::default()).unwrap()
}

fn expect_suggestion(outcome: PipelineOutcome) -> TradeSuggestion {
    match outcome {
        PipelineOutcome::Suggestion(s) => *s,
        PipelineOutcome::NoTrade(report) => panic!("unexpected no-trade:\n{}", report.summary()),
    }
}

fn calm_suggestion(p: &StranglePipeline) -> TradeSuggestion {
    let at = now();
    let spot = dec!(25958);
    let outcome = p
        .run_on_snapshot(
            "desk-1",
            &quote(spot, dec!(25940), dec!(25900), at),
            &chain(spot, at, 50),
            &calm_bars(at.date_naive(), dec!(25900)),
            &margin(),
            at,
        )
        .unwrap();
    expect_suggestion(outcome)
}

// =============================================================================
// Gate
// =============================================================================

#[test]
fn calm_day_produces_pending_suggestion() {
    let p = pipeline();
    let s = calm_suggestion(&p);

    assert_eq!(s.status, SuggestionStatus::Pending);
    assert_eq!(s.lots, 100);
    assert_eq!(s.margin_required, dec!(19200000));
    assert_eq!(s.expires_at, now() + Duration::minutes(15));
    assert!(s.proposal.call_strike > dec!(25958));
    assert!(s.proposal.put_strike < dec!(25958));
    assert_eq!(
        s.total_premium,
        (s.call_premium + s.put_premium) * dec!(100) * dec!(75)
    );
    // short strangle: positive call delta, negative put delta
    assert!(s.proposal.call_delta > 0.0 && s.proposal.call_delta < 0.5);
    assert!(s.proposal.put_delta < 0.0 && s.proposal.put_delta > -0.5);
    assert_eq!(s.stages.len(), 3);
    assert!(s.stop_loss.is_none());
    assert!(s.target.is_none());
}

#[test]
fn gap_above_one_percent_is_a_no_trade_day() {
    let at = now();
    let spot = dec!(26210.8);
    let outcome = pipeline()
        .run_on_snapshot(
            "desk-1",
            &quote(spot, spot, dec!(25900), at),
            &chain(spot, at, 50),
            &calm_bars(at.date_naive(), dec!(25900)),
            &margin(),
            at,
        )
        .unwrap();
    match outcome {
        PipelineOutcome::NoTrade(report) => {
            assert_eq!(report.verdict(), CheckStatus::Fail);
            assert_eq!(
                report.get(CheckKind::Gap).map(|c| c.status),
                Some(CheckStatus::Fail)
            );
        }
        PipelineOutcome::Suggestion(_) => panic!("gap day must not trade"),
    }
}

#[test]
fn missing_history_degrades_to_skips() {
    let at = now();
    let spot = dec!(25958);
    let p = pipeline();
    let ladder = chain(spot, at, 50);
    let q = quote(spot, dec!(25940), dec!(25900), at);

    let report = p.evaluate(&q, &ladder, &[]).unwrap();
    assert_eq!(
        report.get(CheckKind::ThreeDayMove).map(|c| c.status),
        Some(CheckStatus::Skipped)
    );
    assert!(report.is_tradeable());

    let outcome = p
        .run_on_snapshot("desk-1", &q, &ladder, &[], &margin(), at)
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Suggestion(_)));
}

#[test]
fn empty_ladder_is_fatal() {
    let at = now();
    let spot = dec!(25958);
    let err = pipeline()
        .run_on_snapshot(
            "desk-1",
            &quote(spot, spot, dec!(25900), at),
            &StrikeLadder::new(at + Duration::days(7), Vec::new()),
            &calm_bars(at.date_naive(), dec!(25900)),
            &margin(),
            at,
        )
        .unwrap_err();
    assert!(matches!(err, StrangleError::DataUnavailable { .. }));
    assert!(err.is_fatal());
}

// =============================================================================
// Strike safety
// =============================================================================

#[test]
fn final_strikes_clear_every_level() {
    let p = pipeline();
    let at = now();
    for spot in [dec!(25958), dec!(26012), dec!(25480), dec!(25020), dec!(26505)] {
        let outcome = p
            .run_on_snapshot(
                "desk-1",
                &quote(spot, spot, spot, at),
                &chain(spot, at, 50),
                &calm_bars(at.date_naive(), spot),
                &margin(),
                at,
            )
            .unwrap();
        let s = expect_suggestion(outcome);
        assert!(p.guard().is_safe(s.proposal.call_strike), "{spot}: {:?}", s.proposal);
        assert!(p.guard().is_safe(s.proposal.put_strike), "{spot}: {:?}", s.proposal);
    }
}

#[test]
fn chain_without_safe_strikes_fails_closed() {
    let at = now();
    let spot = dec!(25958);
    // only round hundreds listed
    let err = pipeline()
        .run_on_snapshot(
            "desk-1",
            &quote(spot, dec!(25940), dec!(25900), at),
            &chain(spot, at, 100),
            &calm_bars(at.date_naive(), dec!(25900)),
            &margin(),
            at,
        )
        .unwrap_err();
    assert!(matches!(err, StrangleError::NoSafeStrikeAvailable { .. }), "{err:?}");
}

#[test]
fn identical_snapshots_give_identical_proposals() {
    let p = pipeline();
    let a = calm_suggestion(&p);
    let b = calm_suggestion(&p);
    // audit timestamps included
    assert_eq!(a.proposal, b.proposal);
    assert_eq!(a.proposal.as_of, now());
    assert!(a.proposal.audit.iter().all(|adj| adj.at == now()));
}

// =============================================================================
// Sizing and edits
// =============================================================================

#[test]
fn shortfall_creates_zero_lot_suggestion_that_cannot_be_approved() {
    let at = now();
    let spot = dec!(25958);
    let outcome = pipeline()
        .run_on_snapshot(
            "desk-1",
            &quote(spot, dec!(25940), dec!(25900), at),
            &chain(spot, at, 50),
            &calm_bars(at.date_naive(), dec!(25900)),
            &MarginState {
                available_margin: dec!(100000),
                margin_per_lot: dec!(192000),
            },
            at,
        )
        .unwrap();
    let mut s = expect_suggestion(outcome);
    assert_eq!(s.lots, 0);
    assert!(s.warnings.iter().any(|w| w.contains("cannot fund")));
    assert!(matches!(
        s.approve(at),
        Err(StrangleError::MarginInsufficient { .. })
    ));
}

#[test]
fn unsafe_edit_is_rejected_and_safe_edit_rederives() {
    let p = pipeline();
    let at = now();
    let spot = dec!(25958);
    let snapshot = quote(spot, dec!(25940), dec!(25900), at);
    let ladder = chain(spot, at, 50);
    let mut s = calm_suggestion(&p);
    let before = s.clone();

    let err = p
        .edit_suggestion(
            &mut s,
            &SuggestionEdit {
                call_strike: Some(dec!(27000)),
                ..SuggestionEdit::default()
            },
            &snapshot,
            &ladder,
            at,
        )
        .unwrap_err();
    assert!(matches!(err, StrangleError::NoSafeStrikeAvailable { .. }));
    assert_eq!(s, before);

    let target = if s.proposal.call_strike == dec!(26450) {
        dec!(26650)
    } else {
        dec!(26450)
    };
    p.edit_suggestion(
        &mut s,
        &SuggestionEdit {
            call_strike: Some(target),
            lots: Some(40),
            put_strike: None,
        },
        &snapshot,
        &ladder,
        at,
    )
    .unwrap();
    let row = ladder.get(target).unwrap();
    assert_eq!(s.call_premium, row.call_ltp);
    assert_eq!(s.margin_required, dec!(7680000));
    assert_eq!(
        s.total_premium,
        (s.call_premium + s.put_premium) * dec!(40) * dec!(75)
    );

    // deltas describe the edited strike, not the selected one
    let t = time_to_expiry_years(at, ladder.expiry);
    let rate = AppConfig::default().pricing.risk_free_rate;
    let expected = greeks(25_958.0, target.to_f64().unwrap(), t, VOL, rate).call_delta;
    assert!((s.proposal.call_delta - expected).abs() < 1e-3, "{}", s.proposal.call_delta);
    assert!((s.proposal.call_delta - before.proposal.call_delta).abs() > 1e-3);
    assert!((s.proposal.put_delta - before.proposal.put_delta).abs() < 1e-3);
    assert_eq!(
        s.proposal.net_delta,
        s.proposal.call_delta + s.proposal.put_delta
    );
}

#[test]
fn lots_only_edit_keeps_deltas() {
    let p = pipeline();
    let at = now();
    let spot = dec!(25958);
    let mut s = calm_suggestion(&p);
    let before = s.proposal.clone();

    p.edit_suggestion(
        &mut s,
        &SuggestionEdit {
            lots: Some(10),
            ..SuggestionEdit::default()
        },
        &quote(spot, dec!(25940), dec!(25900), at),
        &chain(spot, at, 50),
        at,
    )
    .unwrap();
    assert_eq!(s.lots, 10);
    assert_eq!(s.proposal.call_delta, before.call_delta);
    assert_eq!(s.proposal.put_delta, before.put_delta);
}

// =============================================================================
// Async entry point
// =============================================================================

struct FixedMarket {
    quote: QuoteSnapshot,
    ladder: StrikeLadder,
    bars: Option<Vec<DailyBar>>,
}

#[async_trait]
impl MarketDataProvider for FixedMarket {
    async fn quote_snapshot(&self, _symbol: &str) -> Result<QuoteSnapshot> {
        Ok(self.quote.clone())
    }

    async fn strike_ladder(&self, _symbol: &str, _expiry: DateTime<Utc>) -> Result<StrikeLadder> {
        Ok(self.ladder.clone())
    }

    async fn historical_daily_bars(&self, _symbol: &str, _lookback_days: u32) -> Result<Vec<DailyBar>> {
        self.bars
            .clone()
            .ok_or_else(|| StrangleError::data_unavailable("history service down"))
    }
}

struct FixedMargin;

#[async_trait]
impl MarginProvider for FixedMargin {
    async fn available_margin(&self, _account: &str) -> Result<Decimal> {
        Ok(margin().available_margin)
    }

    async fn margin_per_lot(&self, _instrument: &str) -> Result<Decimal> {
        Ok(margin().margin_per_lot)
    }
}

struct NoOrders;

#[async_trait]
impl OrderGateway for NoOrders {
    async fn place_order_batch(&self, _legs: &[OrderLeg], _lot_count: u32) -> Result<BatchFill> {
        Err(StrangleError::broker("orders disabled"))
    }
}

fn clients(bars: Option<Vec<DailyBar>>) -> BrokerClients {
    let at = now();
    let spot = dec!(25958);
    BrokerClients {
        market_data: Arc::new(FixedMarket {
            quote: quote(spot, dec!(25940), dec!(25900), at),
            ladder: chain(spot, at, 50),
            bars,
        }),
        margin: Arc::new(FixedMargin),
        orders: Arc::new(NoOrders),
    }
}

#[tokio::test]
async fn run_fetches_through_collaborators() {
    let at = now();
    let mut window = HistoryWindow::new();
    let outcome = pipeline()
        .run(
            &clients(Some(calm_bars(at.date_naive(), dec!(25900)))),
            "desk-1",
            &mut window,
            at,
        )
        .await
        .unwrap();
    let s = expect_suggestion(outcome);
    assert_eq!(s.account_id, "desk-1");
    assert_eq!(s.lots, 100);
    assert_eq!(window.bars().len(), 260);
}

#[tokio::test]
async fn history_outage_does_not_block_the_run() {
    let mut window = HistoryWindow::new();
    let outcome = pipeline()
        .run(&clients(None), "desk-1", &mut window, now())
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Suggestion(_)));
    assert!(window.bars().is_empty());
}
