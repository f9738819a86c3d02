//! Command implementations behind the `strangle` binary.

pub mod commands;
pub mod context;

pub use context::AppContext;
