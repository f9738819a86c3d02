//! Market data replayed from a recorded JSON snapshot.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use strangle_core::error::{Result, StrangleError};
use strangle_core::traits::MarketDataProvider;
use strangle_core::types::{DailyBar, MarginState, QuoteSnapshot, StrikeLadder};

/// Everything the pipeline reads from a broker at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub quote: QuoteSnapshot,
    pub ladder: StrikeLadder,
    #[serde(default)]
    pub bars: Vec<DailyBar>,
    /// Recorded account margin, if captured alongside the market.
    #[serde(default)]
    pub margin: Option<MarginState>,
}

impl MarketSnapshot {
    /// # Errors
    /// `DataUnavailable` if the file can't be read or parsed.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            StrangleError::data_unavailable(format!("snapshot {}: {e}", path.display()))
        })?;
        let snapshot: Self = serde_json::from_str(&raw).map_err(|e| {
            StrangleError::data_unavailable(format!("snapshot {}: {e}", path.display()))
        })?;
        debug!(
            path = %path.display(),
            symbol = %snapshot.quote.symbol,
            strikes = snapshot.ladder.entries().len(),
            bars = snapshot.bars.len(),
            "Snapshot loaded"
        );
        Ok(snapshot)
    }
}

pub struct ReplayMarketData {
    snapshot: MarketSnapshot,
}

impl ReplayMarketData {
    #[must_use]
    pub fn new(snapshot: MarketSnapshot) -> Self {
        Self { snapshot }
    }

    #[must_use]
    pub fn snapshot(&self) -> &MarketSnapshot {
        &self.snapshot
    }

    fn require_symbol(&self, symbol: &str) -> Result<()> {
        if self.snapshot.quote.symbol == symbol {
            Ok(())
        } else {
            Err(StrangleError::data_unavailable(format!(
                "snapshot holds {}, not {symbol}",
                self.snapshot.quote.symbol
            )))
        }
    }
}

#[async_trait]
impl MarketDataProvider for ReplayMarketData {
    async fn quote_snapshot(&self, symbol: &str) -> Result<QuoteSnapshot> {
        self.require_symbol(symbol)?;
        Ok(self.snapshot.quote.clone())
    }

    async fn strike_ladder(&self, symbol: &str, expiry: DateTime<Utc>) -> Result<StrikeLadder> {
        self.require_symbol(symbol)?;
        if self.snapshot.ladder.expiry.date_naive() != expiry.date_naive() {
            warn!(
                requested = %expiry,
                recorded = %self.snapshot.ladder.expiry,
                "Replaying ladder for a different expiry"
            );
        }
        Ok(self.snapshot.ladder.clone())
    }

    /// Bars within `lookback_days` calendar days of the snapshot's quote.
    async fn historical_daily_bars(
        &self,
        symbol: &str,
        lookback_days: u32,
    ) -> Result<Vec<DailyBar>> {
        self.require_symbol(symbol)?;
        let as_of = self.snapshot.quote.timestamp.date_naive();
        let from = as_of - Duration::days(i64::from(lookback_days));
        Ok(self
            .snapshot
            .bars
            .iter()
            .filter(|b| b.date >= from && b.date < as_of)
            .cloned()
            .collect())
    }
}

/// Recorded margin figures, when the snapshot carries them.
#[must_use]
pub fn recorded_margin(snapshot: &MarketSnapshot) -> Option<(Decimal, Decimal)> {
    snapshot
        .margin
        .map(|m| (m.available_margin, m.margin_per_lot))
}
