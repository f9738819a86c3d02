pub mod batching;
pub mod control;
pub mod controller;
pub mod monitor;
pub mod store;

pub use batching::plan_batches;
pub use control::{BatchProgress, ExecutionControl, ExecutionState};
pub use controller::{ExecutionController, ExecutionPolicy};
pub use monitor::{StallMonitor, STALE_HEARTBEAT_REASON};
pub use store::{ExecutionStore, InMemoryExecutionStore};
