pub mod config;
pub mod config_loader;
pub mod error;
pub mod proposal;
pub mod suggestion;
pub mod traits;
pub mod types;

pub use config::{AppConfig, BrokerKind, DEFAULT_UTILIZATION_FRACTION};
pub use config_loader::ConfigLoader;
pub use error::{Result, StrangleError};
pub use proposal::{ProposalAdjustment, ProposalStage, StrikeProposal};
pub use suggestion::{
    ExitRule, NewSuggestion, SuggestionEdit, SuggestionStatus, TradeSuggestion, Tranche,
};
pub use traits::{BrokerClients, MarginProvider, MarketDataProvider, OrderGateway};
pub use types::{
    BatchFill, DailyBar, LadderEntry, MarginState, OptionSide, OrderAction, OrderLeg,
    QuoteSnapshot, StrikeLadder,
};
