//! Collaborator interfaces implemented per broker.
//!
//! The engine never inspects which broker it is talking to; an account's
//! configuration picks the implementation once, at connect time.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::Result;
use crate::types::{BatchFill, DailyBar, MarginState, OrderLeg, QuoteSnapshot, StrikeLadder};

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn quote_snapshot(&self, symbol: &str) -> Result<QuoteSnapshot>;
    async fn strike_ladder(&self, symbol: &str, expiry: DateTime<Utc>) -> Result<StrikeLadder>;
    async fn historical_daily_bars(&self, symbol: &str, lookback_days: u32)
        -> Result<Vec<DailyBar>>;
}

#[async_trait]
pub trait MarginProvider: Send + Sync {
    async fn available_margin(&self, account: &str) -> Result<Decimal>;
    async fn margin_per_lot(&self, instrument: &str) -> Result<Decimal>;

    /// Both margin figures in one call.
    async fn margin_state(&self, account: &str, instrument: &str) -> Result<MarginState> {
        Ok(MarginState {
            available_margin: self.available_margin(account).await?,
            margin_per_lot: self.margin_per_lot(instrument).await?,
        })
    }
}

#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Places every leg for `lot_count` lots in one broker call.
    async fn place_order_batch(&self, legs: &[OrderLeg], lot_count: u32) -> Result<BatchFill>;
}

/// The three collaborators for one account.
#[derive(Clone)]
pub struct BrokerClients {
    pub market_data: Arc<dyn MarketDataProvider>,
    pub margin: Arc<dyn MarginProvider>,
    pub orders: Arc<dyn OrderGateway>,
}
