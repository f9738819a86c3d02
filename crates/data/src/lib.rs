//! SQLite persistence for the strangle engine.
//!
//! This crate provides:
//! - `Database`, a pooled `SQLite` handle with embedded migrations
//! - `SuggestionRepository` for trade suggestions and their lifecycle updates
//! - `AuditRepository` for the strike proposal audit trail
//! - `SqliteExecutionStore`, the durable `ExecutionStore`

pub mod database;
pub mod repositories;

pub use database::Database;
pub use repositories::{AuditRepository, SqliteExecutionStore, SuggestionRepository};
