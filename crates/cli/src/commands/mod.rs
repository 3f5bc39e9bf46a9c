//! CLI commands

pub mod categories;
pub mod database;
pub mod hits;
pub mod stats;

use anyhow::{Context, Result};
use cms_common::config::AppConfig;
use cms_infrastructure::{DatabaseConfig, DatabasePool, Repositories};

use crate::output::OutputFormat;

/// Context passed to all commands
pub struct CommandContext {
    pub db: DatabasePool,
    pub repos: Repositories,
    pub format: OutputFormat,
}

impl CommandContext {
    /// Open the pool described by `config` and build the repositories on it
    pub async fn connect(config: &AppConfig, format: OutputFormat) -> Result<Self> {
        let db_config = DatabaseConfig::from_settings(&config.database);
        let db = DatabasePool::new(&db_config)
            .await
            .context("Failed to connect to the database")?;
        let repos = Repositories::new(db.pool().clone());
        Ok(Self { db, repos, format })
    }
}
