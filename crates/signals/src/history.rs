//! Historical movement analysis.
//!
//! Keeps a rolling window of daily bars (about a trading year) and derives the
//! trailing cumulative moves, moving-average trend, support/resistance and ATR
//! that feed the market-condition gate and the technical bias.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use strangle_core::config::HistoryConfig;
use strangle_core::traits::MarketDataProvider;
use strangle_core::types::DailyBar;

/// Moving-average trend classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Uptrend,
    Downtrend,
    Range,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uptrend => write!(f, "uptrend"),
            Self::Downtrend => write!(f, "downtrend"),
            Self::Range => write!(f, "range"),
        }
    }
}

/// Everything the analyzer derives from the window for one spot price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementAnalysis {
    /// Signed % move from the close 3 sessions back to spot.
    pub move_3d_pct: Option<f64>,
    /// Signed % move from the close 5 sessions back to spot.
    pub move_5d_pct: Option<f64>,
    pub sma_20: Option<Decimal>,
    pub sma_50: Option<Decimal>,
    pub sma_200: Option<Decimal>,
    pub trend: Trend,
    pub support: Option<Decimal>,
    pub resistance: Option<Decimal>,
    /// ATR as % of spot.
    pub atr_pct: Option<f64>,
    /// Close of the most recent completed session.
    pub last_close: Option<Decimal>,
    /// Completed sessions the analysis was based on.
    pub sessions: usize,
}

pub struct HistoricalAnalyzer {
    config: HistoryConfig,
}

impl HistoricalAnalyzer {
    #[must_use]
    pub const fn new(config: HistoryConfig) -> Self {
        Self { config }
    }

    /// Analyzes completed sessions strictly before `as_of` against `spot`.
    #[must_use]
    pub fn analyze(&self, bars: &[DailyBar], spot: Decimal, as_of: NaiveDate) -> MovementAnalysis {
        let cutoff = bars.partition_point(|b| b.date < as_of);
        let completed = &bars[..cutoff];

        let sma_20 = sma(completed, 20);
        let sma_50 = sma(completed, 50);
        let sma_200 = sma(completed, 200);
        let trend = classify_trend(spot, sma_20, sma_50, sma_200);

        let (support, resistance) = support_resistance(completed, self.config.level_lookback);
        let atr_pct = average_true_range(completed, self.config.atr_period)
            .and_then(|atr| pct_of(atr, spot));

        let analysis = MovementAnalysis {
            move_3d_pct: cumulative_move_pct(completed, spot, 3),
            move_5d_pct: cumulative_move_pct(completed, spot, 5),
            sma_20,
            sma_50,
            sma_200,
            trend,
            support,
            resistance,
            atr_pct,
            last_close: completed.last().map(|b| b.close),
            sessions: completed.len(),
        };

        debug!(
            sessions = analysis.sessions,
            move_3d = ?analysis.move_3d_pct,
            move_5d = ?analysis.move_5d_pct,
            %trend,
            "Historical movement analyzed"
        );
        analysis
    }
}

/// Signed % move from the close `sessions` back to `spot`. `None` if the window is too short.
#[must_use]
pub fn cumulative_move_pct(bars: &[DailyBar], spot: Decimal, sessions: usize) -> Option<f64> {
    if sessions == 0 || bars.len() < sessions {
        return None;
    }
    let reference = bars[bars.len() - sessions].close;
    pct_of(spot - reference, reference)
}

/// Simple moving average of the last `period` closes.
#[must_use]
pub fn sma(bars: &[DailyBar], period: usize) -> Option<Decimal> {
    if period == 0 || bars.len() < period {
        return None;
    }
    let sum: Decimal = bars[bars.len() - period..].iter().map(|b| b.close).sum();
    Some(sum / Decimal::from(period as u64))
}

/// Simple average of the last `period` true ranges.
#[must_use]
pub fn average_true_range(bars: &[DailyBar], period: usize) -> Option<Decimal> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }
    let window = &bars[bars.len() - period - 1..];
    let sum: Decimal = window
        .windows(2)
        .map(|pair| {
            let prev_close = pair[0].close;
            let bar = &pair[1];
            (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        })
        .sum();
    Some(sum / Decimal::from(period as u64))
}

/// Lowest low and highest high over the last `lookback` sessions.
#[must_use]
pub fn support_resistance(bars: &[DailyBar], lookback: usize) -> (Option<Decimal>, Option<Decimal>) {
    if lookback == 0 || bars.is_empty() {
        return (None, None);
    }
    let window = &bars[bars.len().saturating_sub(lookback)..];
    let support = window.iter().map(|b| b.low).min();
    let resistance = window.iter().map(|b| b.high).max();
    (support, resistance)
}

/// Price stacked above rising averages is an uptrend, the mirror a downtrend, anything else range.
///
/// The 200-session average only participates when the window is long enough to have one.
#[must_use]
pub fn classify_trend(
    spot: Decimal,
    sma_20: Option<Decimal>,
    sma_50: Option<Decimal>,
    sma_200: Option<Decimal>,
) -> Trend {
    let (Some(s20), Some(s50)) = (sma_20, sma_50) else {
        return Trend::Range;
    };
    let above_long = sma_200.map_or(true, |s200| spot > s200);
    let below_long = sma_200.map_or(true, |s200| spot < s200);

    if spot > s20 && s20 > s50 && above_long {
        Trend::Uptrend
    } else if spot < s20 && s20 < s50 && below_long {
        Trend::Downtrend
    } else {
        Trend::Range
    }
}

fn pct_of(numerator: Decimal, base: Decimal) -> Option<f64> {
    if base.is_zero() {
        return None;
    }
    (numerator / base * Decimal::ONE_HUNDRED).to_f64()
}

/// Most recent weekday strictly before `date`. Exchange holidays are not modelled.
#[must_use]
pub fn previous_session(date: NaiveDate) -> NaiveDate {
    let mut d = date - Duration::days(1);
    while matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
        d -= Duration::days(1);
    }
    d
}

/// Rolling daily-bar window, refreshed from the data provider when short or stale.
#[derive(Debug, Clone, Default)]
pub struct HistoryWindow {
    bars: Vec<DailyBar>,
    fetched_at: Option<DateTime<Utc>>,
}

impl HistoryWindow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Window seeded with bars, e.g. from storage.
    #[must_use]
    pub fn from_bars(bars: Vec<DailyBar>) -> Self {
        let mut window = Self::default();
        window.merge(bars);
        window
    }

    #[must_use]
    pub fn bars(&self) -> &[DailyBar] {
        &self.bars
    }

    #[must_use]
    pub const fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    /// True if the window is shorter than `min_sessions` or misses the previous session.
    #[must_use]
    pub fn needs_refresh(&self, today: NaiveDate, min_sessions: usize) -> bool {
        if self.bars.len() < min_sessions {
            return true;
        }
        self.bars
            .last()
            .map_or(true, |b| b.date < previous_session(today))
    }

    /// Fetches from the provider if needed. Returns true if new data was merged.
    ///
    /// A failed fetch is logged and the existing window kept; checks that need the
    /// missing data degrade to skips downstream.
    pub async fn ensure_fresh(
        &mut self,
        provider: &dyn MarketDataProvider,
        symbol: &str,
        config: &HistoryConfig,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.needs_refresh(now.date_naive(), config.min_sessions) {
            return false;
        }
        match provider
            .historical_daily_bars(symbol, config.lookback_days)
            .await
        {
            Ok(bars) => {
                let fetched = bars.len();
                self.merge(bars);
                self.retain_lookback(config.lookback_days);
                self.fetched_at = Some(now);
                if self.bars.len() < config.min_sessions {
                    warn!(
                        symbol,
                        sessions = self.bars.len(),
                        required = config.min_sessions,
                        "Historical window shorter than required"
                    );
                }
                info!(symbol, fetched, total = self.bars.len(), "Historical window refreshed");
                true
            }
            Err(e) => {
                warn!(symbol, error = %e, "Historical fetch failed; keeping existing window");
                false
            }
        }
    }

    fn merge(&mut self, bars: Vec<DailyBar>) {
        self.bars.extend(bars);
        self.bars.sort_by_key(|b| b.date);
        // later fetches carry corrected bars, keep the newest copy of each date
        let mut deduped: Vec<DailyBar> = Vec::with_capacity(self.bars.len());
        for bar in self.bars.drain(..) {
            match deduped.last_mut() {
                Some(last) if last.date == bar.date => *last = bar,
                _ => deduped.push(bar),
            }
        }
        self.bars = deduped;
    }

    /// Drops bars more than `lookback_days` calendar days before the newest bar.
    fn retain_lookback(&mut self, lookback_days: u32) {
        let Some(newest) = self.bars.last().map(|b| b.date) else {
            return;
        };
        let cutoff = newest - Duration::days(i64::from(lookback_days));
        let before = self.bars.len();
        self.bars.retain(|b| b.date >= cutoff);
        if self.bars.len() < before {
            debug!(dropped = before - self.bars.len(), %cutoff, "Trimmed historical window");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strangle_core::error::{Result, StrangleError};
    use strangle_core::types::{QuoteSnapshot, StrikeLadder};

    fn bar(date: NaiveDate, close: Decimal) -> DailyBar {
        DailyBar {
            date,
            open: close,
            high: close + dec!(50),
            low: close - dec!(50),
            close,
        }
    }

    fn series(start: NaiveDate, closes: &[Decimal]) -> Vec<DailyBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| bar(start + Duration::days(i as i64), *c))
            .collect()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn cumulative_moves_use_close_n_sessions_back() {
        let bars = series(
            date(2025, 1, 1),
            &[dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)],
        );
        // 3 sessions back = 102
        let m3 = cumulative_move_pct(&bars, dec!(104.04), 3).unwrap();
        assert!((m3 - 2.0).abs() < 1e-9);
        // 5 sessions back = 100
        let m5 = cumulative_move_pct(&bars, dec!(95), 5).unwrap();
        assert!((m5 + 5.0).abs() < 1e-9);
        assert!(cumulative_move_pct(&bars, dec!(100), 6).is_none());
    }

    #[test]
    fn sma_needs_full_period() {
        let bars = series(date(2025, 1, 1), &[dec!(10), dec!(20), dec!(30)]);
        assert_eq!(sma(&bars, 2), Some(dec!(25)));
        assert_eq!(sma(&bars, 4), None);
    }

    #[test]
    fn atr_uses_true_range() {
        let bars = vec![
            DailyBar {
                date: date(2025, 1, 1),
                open: dec!(100),
                high: dec!(102),
                low: dec!(98),
                close: dec!(100),
            },
            // gap up: true range = high - prev close = 10
            DailyBar {
                date: date(2025, 1, 2),
                open: dec!(108),
                high: dec!(110),
                low: dec!(107),
                close: dec!(109),
            },
        ];
        assert_eq!(average_true_range(&bars, 1), Some(dec!(10)));
        assert_eq!(average_true_range(&bars, 2), None);
    }

    #[test]
    fn trend_classification() {
        assert_eq!(
            classify_trend(dec!(110), Some(dec!(105)), Some(dec!(100)), Some(dec!(95))),
            Trend::Uptrend
        );
        assert_eq!(
            classify_trend(dec!(90), Some(dec!(95)), Some(dec!(100)), None),
            Trend::Downtrend
        );
        assert_eq!(
            classify_trend(dec!(101), Some(dec!(105)), Some(dec!(100)), None),
            Trend::Range
        );
        assert_eq!(classify_trend(dec!(101), Some(dec!(100)), None, None), Trend::Range);
    }

    #[test]
    fn analysis_ignores_bars_from_as_of_onwards() {
        let mut bars = series(
            date(2025, 1, 1),
            &[dec!(100), dec!(100), dec!(100), dec!(100), dec!(100)],
        );
        // a partial bar for the analysis day must not shift the reference closes
        bars.push(bar(date(2025, 1, 6), dec!(130)));
        let analyzer = HistoricalAnalyzer::new(HistoryConfig::default());
        let a = analyzer.analyze(&bars, dec!(102), date(2025, 1, 6));
        assert_eq!(a.sessions, 5);
        assert!((a.move_3d_pct.unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(a.last_close, Some(dec!(100)));
        assert_eq!(a.resistance, Some(dec!(150)));
        assert_eq!(a.support, Some(dec!(50)));
    }

    #[test]
    fn previous_session_skips_weekend() {
        // 2025-01-06 is a Monday
        assert_eq!(previous_session(date(2025, 1, 6)), date(2025, 1, 3));
        assert_eq!(previous_session(date(2025, 1, 7)), date(2025, 1, 6));
    }

    #[test]
    fn merge_keeps_latest_copy_per_date() {
        let mut window = HistoryWindow::from_bars(series(date(2025, 1, 1), &[dec!(1), dec!(2)]));
        window.merge(vec![bar(date(2025, 1, 2), dec!(3)), bar(date(2025, 1, 3), dec!(4))]);
        let closes: Vec<_> = window.bars().iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![dec!(1), dec!(3), dec!(4)]);
    }

    struct CountingProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MarketDataProvider for CountingProvider {
        async fn quote_snapshot(&self, _symbol: &str) -> Result<QuoteSnapshot> {
            Err(StrangleError::data_unavailable("quote"))
        }

        async fn strike_ladder(&self, _symbol: &str, _expiry: DateTime<Utc>) -> Result<StrikeLadder> {
            Err(StrangleError::data_unavailable("ladder"))
        }

        async fn historical_daily_bars(&self, _symbol: &str, _days: u32) -> Result<Vec<DailyBar>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StrangleError::data_unavailable("history"));
            }
            Ok(series(date(2025, 1, 1), &[dec!(100); 10]))
        }
    }

    #[tokio::test]
    async fn ensure_fresh_fetches_when_short() {
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let config = HistoryConfig {
            min_sessions: 5,
            ..HistoryConfig::default()
        };
        let now = date(2025, 1, 11).and_hms_opt(4, 0, 0).unwrap().and_utc();
        let mut window = HistoryWindow::new();
        assert!(window.ensure_fresh(&provider, "NIFTY", &config, now).await);
        assert_eq!(window.bars().len(), 10);
        // last bar is 2025-01-10, previous session of Saturday 11th -> fresh
        assert!(!window.ensure_fresh(&provider, "NIFTY", &config, now).await);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_trims_bars_outside_lookback() {
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let config = HistoryConfig {
            lookback_days: 20,
            min_sessions: 5,
            ..HistoryConfig::default()
        };
        // 2024-11-01 through 2024-12-30
        let mut window = HistoryWindow::from_bars(series(date(2024, 11, 1), &[dec!(100); 60]));
        let now = date(2025, 1, 11).and_hms_opt(4, 0, 0).unwrap().and_utc();
        assert!(window.ensure_fresh(&provider, "NIFTY", &config, now).await);

        let bars = window.bars();
        assert_eq!(bars.first().unwrap().date, date(2024, 12, 21));
        assert_eq!(bars.last().unwrap().date, date(2025, 1, 10));
        assert_eq!(bars.len(), 20);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_window() {
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
            fail: true,
        };
        let seeded = series(date(2025, 1, 1), &[dec!(100); 3]);
        let mut window = HistoryWindow::from_bars(seeded);
        let now = Utc::now();
        assert!(
            !window
                .ensure_fresh(&provider, "NIFTY", &HistoryConfig::default(), now)
                .await
        );
        assert_eq!(window.bars().len(), 3);
    }
}
