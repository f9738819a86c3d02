//! Trade suggestion repository.
//!
//! The full record is stored as JSON; status, strikes and money fields are
//! duplicated into columns for querying.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use strangle_core::error::{Result, StrangleError};
use strangle_core::suggestion::{SuggestionStatus, TradeSuggestion};

use super::audit_repo::append_trail;
use crate::database::storage_err;

#[derive(Debug, Clone)]
pub struct SuggestionRepository {
    pool: SqlitePool,
}

impl SuggestionRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a new suggestion together with its proposal audit trail.
    ///
    /// # Errors
    /// Returns `StrangleError::Storage` if serialization or the insert fails.
    pub async fn insert(&self, s: &TradeSuggestion) -> Result<()> {
        let payload = serde_json::to_string(s).map_err(storage_err)?;
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query(
            r"
            INSERT INTO trade_suggestions
                (id, account_id, symbol, status, lots, call_strike, put_strike,
                 margin_required, total_premium, payload, created_at, expires_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ",
        )
        .bind(s.id.to_string())
        .bind(&s.account_id)
        .bind(&s.symbol)
        .bind(s.status.as_str())
        .bind(i64::from(s.lots))
        .bind(s.proposal.call_strike.to_string())
        .bind(s.proposal.put_strike.to_string())
        .bind(s.margin_required.to_string())
        .bind(s.total_premium.to_string())
        .bind(payload)
        .bind(s.created_at.timestamp_millis())
        .bind(s.expires_at.timestamp_millis())
        .bind(s.updated_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        append_trail(&mut tx, s.id, &s.proposal.audit).await?;
        tx.commit().await.map_err(storage_err)?;

        debug!(id = %s.id, status = %s.status, "Suggestion stored");
        Ok(())
    }

    /// Writes the current state of an existing suggestion.
    ///
    /// # Errors
    /// `NotFound` if the suggestion was never inserted.
    pub async fn update(&self, s: &TradeSuggestion) -> Result<()> {
        let payload = serde_json::to_string(s).map_err(storage_err)?;
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let result = sqlx::query(
            r"
            UPDATE trade_suggestions
            SET status = ?2, lots = ?3, call_strike = ?4, put_strike = ?5,
                margin_required = ?6, total_premium = ?7, payload = ?8, updated_at = ?9
            WHERE id = ?1
            ",
        )
        .bind(s.id.to_string())
        .bind(s.status.as_str())
        .bind(i64::from(s.lots))
        .bind(s.proposal.call_strike.to_string())
        .bind(s.proposal.put_strike.to_string())
        .bind(s.margin_required.to_string())
        .bind(s.total_premium.to_string())
        .bind(payload)
        .bind(s.updated_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(StrangleError::not_found(format!("suggestion {}", s.id)));
        }

        append_trail(&mut tx, s.id, &s.proposal.audit).await?;
        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    /// # Errors
    /// `NotFound` for an unknown id.
    pub async fn get(&self, id: Uuid) -> Result<TradeSuggestion> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT payload FROM trade_suggestions WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match row {
            Some((payload,)) => decode(&payload),
            None => Err(StrangleError::not_found(format!("suggestion {id}"))),
        }
    }

    /// Newest first.
    ///
    /// # Errors
    /// Returns `StrangleError::Storage` if the query or decoding fails.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<TradeSuggestion>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT payload FROM trade_suggestions ORDER BY created_at DESC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(|(payload,)| decode(payload)).collect()
    }

    /// # Errors
    /// Returns `StrangleError::Storage` if the query or decoding fails.
    pub async fn list_by_status(&self, status: SuggestionStatus) -> Result<Vec<TradeSuggestion>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT payload FROM trade_suggestions WHERE status = ?1 ORDER BY created_at DESC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(|(payload,)| decode(payload)).collect()
    }

    /// Moves every pending or approved suggestion past its window to EXPIRED. Returns
    /// their ids.
    ///
    /// # Errors
    /// Returns `StrangleError::Storage` if a read or write fails.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT payload FROM trade_suggestions \
             WHERE status IN (?1, ?2) AND expires_at <= ?3",
        )
        .bind(SuggestionStatus::Pending.as_str())
        .bind(SuggestionStatus::Approved.as_str())
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        let mut expired = Vec::new();
        for (payload,) in rows {
            let mut s = decode(&payload)?;
            if s.expire_if_stale(now) {
                self.update(&s).await?;
                expired.push(s.id);
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired stale suggestions");
        }
        Ok(expired)
    }
}

fn decode(payload: &str) -> Result<TradeSuggestion> {
    serde_json::from_str(payload).map_err(storage_err)
}
