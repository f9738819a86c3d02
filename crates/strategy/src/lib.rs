pub mod chain_lookup;
pub mod pipeline;
pub mod pricing;
pub mod psych_levels;
pub mod sizing;
pub mod strike_selection;

pub use chain_lookup::{quote_legs, snap_to_chain, ChainQuote};
pub use pipeline::{MarketAssessment, PipelineOutcome, ProposalOutcome, StranglePipeline};
pub use pricing::{greeks, ChainPricer, Greeks, GreeksResult, IvSolver};
pub use psych_levels::{GuardAdjustment, GuardOutcome, LevelHit, LevelTierKind, PsychLevelGuard};
pub use sizing::{PositionSizer, SizingPlan};
pub use strike_selection::{DeltaBand, SelectionResult, StrikeSelector};
