//! Strike proposal audit trail.

use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use strangle_core::error::Result;
use strangle_core::proposal::ProposalAdjustment;

use super::{enum_text, from_millis, parse_enum};
use crate::database::storage_err;

#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: SqlitePool,
}

impl AuditRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Recorded adjustments for a suggestion, in the order they were made.
    ///
    /// # Errors
    /// Returns `StrangleError::Storage` if the query or decoding fails.
    pub async fn trail(&self, suggestion_id: Uuid) -> Result<Vec<ProposalAdjustment>> {
        let rows = sqlx::query_as::<_, (String, String, String, String, String, i64)>(
            r"
            SELECT stage, side, before_strike, after_strike, reason, recorded_at
            FROM proposal_audit
            WHERE suggestion_id = ?1
            ORDER BY seq
            ",
        )
        .bind(suggestion_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.into_iter()
            .map(|(stage, side, before, after, reason, at)| {
                Ok(ProposalAdjustment {
                    stage: parse_enum(&stage)?,
                    side: parse_enum(&side)?,
                    before: Decimal::from_str(&before).map_err(storage_err)?,
                    after: Decimal::from_str(&after).map_err(storage_err)?,
                    reason,
                    at: from_millis(at)?,
                })
            })
            .collect()
    }
}

/// Appends adjustments not yet stored. The trail only ever grows, so the
/// position in the slice is a stable sequence number.
pub(crate) async fn append_trail(
    conn: &mut SqliteConnection,
    suggestion_id: Uuid,
    audit: &[ProposalAdjustment],
) -> Result<()> {
    let id = suggestion_id.to_string();
    for (seq, adj) in audit.iter().enumerate() {
        sqlx::query(
            r"
            INSERT OR IGNORE INTO proposal_audit
                (suggestion_id, seq, stage, side, before_strike, after_strike, reason, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )
        .bind(&id)
        .bind(seq as i64)
        .bind(enum_text(&adj.stage)?)
        .bind(enum_text(&adj.side)?)
        .bind(adj.before.to_string())
        .bind(adj.after.to_string())
        .bind(&adj.reason)
        .bind(adj.at.timestamp_millis())
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
    }
    Ok(())
}
