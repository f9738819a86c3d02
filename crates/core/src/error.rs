//! Error taxonomy for the strangle pipeline and execution controller.
//!
//! Each variant maps to one failure class with a fixed propagation policy:
//! data gaps degrade individual checks, guard violations and missing spot/ladder
//! data abort the pipeline before any order exists, and execution failures halt
//! remaining batches without undoing placed ones.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::OptionSide;

/// Errors raised by the strangle engine.
#[derive(Debug, Error)]
pub enum StrangleError {
    /// Quote, ladder or historical data missing.
    #[error("data unavailable: {what}")]
    DataUnavailable {
        /// What was missing.
        what: String,
    },

    /// Implied-volatility solver did not converge.
    #[error("implied volatility did not converge after {iterations} iterations (last estimate {last_estimate:.6})")]
    NumericConvergence {
        /// Iterations spent.
        iterations: u32,
        /// Last volatility estimate.
        last_estimate: f64,
    },

    /// The psychological guard could not find a strike outside every danger zone on the chain.
    #[error("no safe {side} strike available near {strike}")]
    NoSafeStrikeAvailable {
        /// Leg that could not be placed.
        side: OptionSide,
        /// Strike the guard tried last.
        strike: Decimal,
    },

    /// Not enough margin for a single lot.
    #[error("insufficient margin: available {available}, required per lot {per_lot}")]
    MarginInsufficient {
        /// Margin available on the account.
        available: Decimal,
        /// Margin required per lot.
        per_lot: Decimal,
    },

    /// A batch exhausted its retries.
    #[error("batch {batch} failed after {attempts} attempts: {reason}")]
    BatchExecution {
        /// Zero-based batch index.
        batch: u32,
        /// Attempts made.
        attempts: u32,
        /// Last broker failure.
        reason: String,
    },

    /// A lifecycle operation was applied in the wrong state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Record lookup failed.
    #[error("not found: {0}")]
    NotFound(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Persistence layer failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Broker rejected or failed a request.
    #[error("broker error: {0}")]
    Broker(String),

    /// A broker call exceeded its deadline.
    #[error("timeout after {millis}ms: {operation}")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Deadline in milliseconds.
        millis: u64,
    },
}

impl StrangleError {
    /// Creates a data-unavailable error.
    pub fn data_unavailable(what: impl Into<String>) -> Self {
        Self::DataUnavailable { what: what.into() }
    }

    /// Creates a no-safe-strike error.
    #[must_use]
    pub const fn no_safe_strike(side: OptionSide, strike: Decimal) -> Self {
        Self::NoSafeStrikeAvailable { side, strike }
    }

    /// Creates a margin-insufficient error.
    #[must_use]
    pub const fn margin_insufficient(available: Decimal, per_lot: Decimal) -> Self {
        Self::MarginInsufficient { available, per_lot }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Creates a broker error.
    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker(message.into())
    }

    /// Creates an invalid-transition error.
    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::InvalidTransition(message.into())
    }

    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Returns true if the error must abort the pipeline before any order is placed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DataUnavailable { .. }
                | Self::NoSafeStrikeAvailable { .. }
                | Self::Configuration(_)
        )
    }

    /// Returns true if repeating the same broker request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Broker(_) | Self::Timeout { .. })
    }
}

/// Result type alias for strangle operations.
pub type Result<T> = std::result::Result<T, StrangleError>;
