//! Broker adapters implementing the collaborator traits.
//!
//! An account's `broker` setting picks the implementation once, in [`connect`]:
//! - `paper`: margin and fills simulated by [`PaperBroker`] from the account's
//!   paper figures; market data replayed from `replay_file`
//! - `replay`: as `paper`, but margin is taken from the snapshot when recorded

pub mod paper;
pub mod replay;

use std::sync::Arc;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::info;

use strangle_core::config::{AccountConfig, BrokerKind};
use strangle_core::error::{Result, StrangleError};
use strangle_core::traits::BrokerClients;

pub use paper::{PaperBroker, PaperFailure};
pub use replay::{MarketSnapshot, ReplayMarketData};

/// Builds the collaborators for one account.
///
/// # Errors
/// `Configuration` if the account has no snapshot file or invalid paper figures;
/// `DataUnavailable` if the snapshot can't be loaded.
pub async fn connect(account: &AccountConfig) -> Result<BrokerClients> {
    let path = account.replay_file.as_deref().ok_or_else(|| {
        StrangleError::configuration(format!(
            "account {} needs replay_file for market data",
            account.id
        ))
    })?;
    let snapshot = MarketSnapshot::load(path).await?;

    let (available, per_lot) = match account.broker {
        BrokerKind::Replay => replay::recorded_margin(&snapshot),
        BrokerKind::Paper => None,
    }
    .map_or_else(|| paper_margin(account), Ok)?;

    info!(
        account = %account.id,
        broker = ?account.broker,
        snapshot = path,
        available = %available,
        margin_per_lot = %per_lot,
        "Broker connected"
    );

    let broker = Arc::new(PaperBroker::new(account.id.clone(), available, per_lot));
    Ok(BrokerClients {
        market_data: Arc::new(ReplayMarketData::new(snapshot)),
        margin: broker.clone(),
        orders: broker,
    })
}

fn paper_margin(account: &AccountConfig) -> Result<(Decimal, Decimal)> {
    let to_decimal = |name: &str, v: f64| {
        Decimal::from_f64(v)
            .filter(|d| *d > Decimal::ZERO)
            .ok_or_else(|| {
                StrangleError::configuration(format!("account {}: invalid {name} {v}", account.id))
            })
    };
    Ok((
        to_decimal("paper_margin", account.paper_margin)?,
        to_decimal("paper_margin_per_lot", account.paper_margin_per_lot)?,
    ))
}
