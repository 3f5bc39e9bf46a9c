//! PostgreSQL pool, schema migrations and the transaction helper shared by
//! the repositories.

use std::time::{Duration, Instant};

use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use tracing::{debug, info, instrument, warn};

use cms_common::config::DatabaseSettings;

use crate::{Error, Result};

/// Pool sizing and per-session limits.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    /// Applied as `statement_timeout` on every new session
    pub statement_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            statement_timeout: Duration::from_secs(30),
        }
    }
}

impl DatabaseConfig {
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        Self {
            url: settings.url.clone(),
            max_connections: settings.max_connections,
            min_connections: settings.min_connections,
            acquire_timeout: Duration::from_secs(settings.acquire_timeout_seconds),
            ..Default::default()
        }
    }
}

/// Shared connection pool handed to [`crate::Repositories`].
#[derive(Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let statement_timeout = format!("SET statement_timeout = {}", config.statement_timeout.as_millis());

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .after_connect(move |conn, _meta| {
                let statement_timeout = statement_timeout.clone();
                Box::pin(async move {
                    // Daily statistics bucket by the session time zone
                    sqlx::query("SET timezone = 'UTC'").execute(&mut *conn).await?;
                    sqlx::query(&statement_timeout).execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect(&config.url)
            .await
            .map_err(Error::Database)?;

        info!("Database pool ready");
        Ok(Self { pool })
    }

    #[inline]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations from `migrations/`.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(e.into()))?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Round-trip a trivial query. A failing database is reported in the
    /// returned status rather than as an error.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<HealthStatus> {
        let start = Instant::now();
        let outcome = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool).await;
        let latency = start.elapsed();

        let error = match outcome {
            Ok(_) => {
                debug!(latency_ms = latency.as_millis(), "Database reachable");
                None
            }
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                Some(e.to_string())
            }
        };

        Ok(HealthStatus {
            healthy: error.is_none(),
            latency,
            pool_size: self.pool.size(),
            idle_connections: self.pool.num_idle(),
            error,
        })
    }
}

impl std::fmt::Debug for DatabasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabasePool")
            .field("size", &self.pool.size())
            .field("idle", &self.pool.num_idle())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency: Duration,
    pub pool_size: u32,
    pub idle_connections: usize,
    pub error: Option<String>,
}

/// Finish a transaction according to the outcome of the work done inside it.
#[async_trait::async_trait]
pub trait TransactionExt {
    async fn commit_or_rollback<T, E>(self, result: std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        T: Send,
        E: From<sqlx::Error> + Send;
}

#[async_trait::async_trait]
impl TransactionExt for Transaction<'_, Postgres> {
    async fn commit_or_rollback<T, E>(self, result: std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        T: Send,
        E: From<sqlx::Error> + Send,
    {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}
