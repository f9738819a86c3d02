use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use strangle_core::config::DatabaseConfig;
use strangle_core::error::{Result, StrangleError};

use crate::repositories::{AuditRepository, SqliteExecutionStore, SuggestionRepository};

/// `SQLite` database holding suggestions, their audit trail and execution control.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if missing) the database and runs embedded migrations.
    ///
    /// # Errors
    /// Returns `StrangleError::Storage` if connection or migration fails.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(storage_err)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(storage_err)?;

        let db = Self { pool };
        db.migrate().await?;
        info!(url = %config.url, "Database ready");
        Ok(db)
    }

    /// Creates an in-memory database.
    ///
    /// A single connection that never idles out, since every `SQLite` memory
    /// connection is a separate database.
    ///
    /// # Errors
    /// Returns `StrangleError::Storage` if connection or migration fails.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StrangleError::storage(format!("migration failed: {e}")))
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[must_use]
    pub fn suggestions(&self) -> SuggestionRepository {
        SuggestionRepository::new(self.pool.clone())
    }

    #[must_use]
    pub fn audit(&self) -> AuditRepository {
        AuditRepository::new(self.pool.clone())
    }

    #[must_use]
    pub fn executions(&self) -> SqliteExecutionStore {
        SqliteExecutionStore::new(self.pool.clone())
    }
}

pub(crate) fn storage_err(e: impl std::fmt::Display) -> StrangleError {
    StrangleError::storage(e.to_string())
}
