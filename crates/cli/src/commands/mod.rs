//! CLI commands for the strangle engine.

pub mod execution;
pub mod review;
pub mod suggest;

pub use execution::{
    run_cancel, run_execute, run_monitor, run_status, CancelArgs, ExecuteArgs, MonitorArgs,
    StatusArgs,
};
pub use review::{
    run_approve, run_edit, run_list, run_reject, ApproveArgs, EditArgs, ListArgs, RejectArgs,
};
pub use suggest::{run_suggest, SuggestArgs};
