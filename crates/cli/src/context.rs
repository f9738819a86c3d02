//! Shared setup for every command: configuration, database and broker access.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use strangle_core::config::AppConfig;
use strangle_core::traits::BrokerClients;
use strangle_core::ConfigLoader;
use strangle_data::Database;

pub struct AppContext {
    pub config: AppConfig,
    pub db: Database,
}

impl AppContext {
    /// Loads configuration and opens the configured database.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the database can't be opened.
    pub async fn open(config_path: &str, profile: Option<&str>) -> Result<Self> {
        let config = match profile {
            Some(profile) => ConfigLoader::load_with_profile(config_path, profile)?,
            None => ConfigLoader::load(config_path)?,
        };
        ensure_sqlite_parent(&config.database.url)?;
        let db = Database::connect(&config.database)
            .await
            .with_context(|| format!("Failed to open database {}", config.database.url))?;
        Ok(Self { config, db })
    }

    /// Context over an already opened database, e.g. in memory.
    #[must_use]
    pub fn with_database(config: AppConfig, db: Database) -> Self {
        Self { config, db }
    }

    /// Connects the broker configured for `account_id`.
    ///
    /// # Errors
    /// Returns an error if the account is unknown or its broker can't be reached.
    pub async fn broker(&self, account_id: &str) -> Result<BrokerClients> {
        let account = self
            .config
            .account(account_id)
            .ok_or_else(|| anyhow!("Unknown account '{account_id}'"))?;
        strangle_broker::connect(account)
            .await
            .with_context(|| format!("Failed to connect broker for account {account_id}"))
    }
}

/// Creates the directory of a file-backed `SQLite` URL.
fn ensure_sqlite_parent(url: &str) -> Result<()> {
    let Some(rest) = url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let file = rest.split('?').next().unwrap_or(rest);
    if let Some(parent) = Path::new(file).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}
