pub mod history;
pub mod market_conditions;
pub mod technical;

// Re-export analyzers for convenience
pub use history::{HistoricalAnalyzer, HistoryWindow, MovementAnalysis, Trend};

// Re-export the market-condition gate
pub use market_conditions::{
    CheckKind, CheckResult, CheckStatus, MarketConditionValidator, ValidationReport,
};

pub use technical::{DeltaMultipliers, TechnicalAdjuster};
