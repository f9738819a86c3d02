//! Typed access to each table.
//!
//! Timestamps are stored as Unix milliseconds, decimals and enums as text.

pub mod audit_repo;
pub mod execution_repo;
pub mod suggestion_repo;

pub use audit_repo::AuditRepository;
pub use execution_repo::SqliteExecutionStore;
pub use suggestion_repo::SuggestionRepository;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use strangle_core::error::{Result, StrangleError};

use crate::database::storage_err;

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StrangleError::storage(format!("timestamp {ms} out of range")))
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(storage_err)
}

/// Serde name of a unit enum variant, e.g. `manual_edit`.
pub(crate) fn enum_text<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value).map_err(storage_err)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(StrangleError::storage(format!("{other} is not a unit variant"))),
    }
}

pub(crate) fn parse_enum<T: DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(storage_err)
}
