//! Paper trading broker.
//!
//! Simulates margin and fills locally without touching a real broker. Each filled
//! lot debits the account's available margin. Failures can be queued ahead of
//! time to exercise retry and timeout handling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{info, warn};

use strangle_core::error::{Result, StrangleError};
use strangle_core::traits::{MarginProvider, OrderGateway};
use strangle_core::types::{BatchFill, OrderLeg};

/// A scripted outcome for the next order call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaperFailure {
    /// Broker rejects the batch with this message.
    Reject(String),
    /// Call stalls for this long before filling.
    Stall(Duration),
}

pub struct PaperBroker {
    account: String,
    available: Mutex<Decimal>,
    margin_per_lot: Decimal,
    failures: Mutex<VecDeque<PaperFailure>>,
    sequence: AtomicU64,
}

impl PaperBroker {
    #[must_use]
    pub fn new(account: impl Into<String>, available: Decimal, margin_per_lot: Decimal) -> Self {
        Self {
            account: account.into(),
            available: Mutex::new(available),
            margin_per_lot,
            failures: Mutex::new(VecDeque::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Queues an outcome for the next order call.
    pub fn push_failure(&self, failure: PaperFailure) {
        self.failures.lock().push_back(failure);
    }

    /// Current available margin.
    #[must_use]
    pub fn available(&self) -> Decimal {
        *self.available.lock()
    }

    /// Order calls accepted so far.
    #[must_use]
    pub fn orders_placed(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarginProvider for PaperBroker {
    async fn available_margin(&self, account: &str) -> Result<Decimal> {
        if account != self.account {
            return Err(StrangleError::not_found(format!("paper account {account}")));
        }
        Ok(self.available())
    }

    async fn margin_per_lot(&self, _instrument: &str) -> Result<Decimal> {
        Ok(self.margin_per_lot)
    }
}

#[async_trait]
impl OrderGateway for PaperBroker {
    async fn place_order_batch(&self, legs: &[OrderLeg], lot_count: u32) -> Result<BatchFill> {
        let scripted = self.failures.lock().pop_front();
        match scripted {
            Some(PaperFailure::Reject(reason)) => {
                warn!(account = %self.account, lots = lot_count, %reason, "Paper batch rejected");
                return Err(StrangleError::broker(reason));
            }
            Some(PaperFailure::Stall(d)) => tokio::time::sleep(d).await,
            None => {}
        }

        let required = self.margin_per_lot * Decimal::from(lot_count);
        {
            let mut available = self.available.lock();
            if required > *available {
                return Err(StrangleError::margin_insufficient(*available, self.margin_per_lot));
            }
            *available -= required;
        }

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let broker_order_ids: Vec<String> = legs
            .iter()
            .map(|leg| format!("PAPER-{seq:06}-{}{}", leg.strike, leg.side))
            .collect();

        info!(
            account = %self.account,
            lots = lot_count,
            orders = ?broker_order_ids,
            margin_used = %required,
            "Paper batch filled"
        );

        Ok(BatchFill {
            broker_order_ids,
            lots: lot_count,
            filled_at: Utc::now(),
        })
    }
}
