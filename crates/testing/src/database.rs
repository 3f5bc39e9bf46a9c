//! Test database setup.
//!
//! Connects to the PostgreSQL instance named by `TEST_DATABASE_URL` (or
//! `DATABASE_URL`), applies the workspace migrations and truncates every
//! table between tests.

use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;

/// Tables in dependency order; truncated together with CASCADE.
const TABLES: &[&str] = &[
    "hits",
    "qr_codes",
    "wechat_users",
    "event_registrations",
    "events",
    "survey_answers",
    "survey_responses",
    "survey_options",
    "survey_questions",
    "surveys",
    "videos",
    "images",
    "news",
    "article_tags",
    "articles",
    "categories",
    "users",
];

/// Test database wrapper with migrations applied
pub struct TestDatabase {
    pool: Arc<PgPool>,
}

impl TestDatabase {
    /// Connect using `TEST_DATABASE_URL`, falling back to `DATABASE_URL`.
    pub async fn from_env() -> anyhow::Result<Self> {
        let url = std::env::var("TEST_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| anyhow::anyhow!("TEST_DATABASE_URL or DATABASE_URL must be set"))?;
        Self::new_with_url(&url).await
    }

    /// Connect to `connection_string`, run migrations and start from empty tables.
    pub async fn new_with_url(connection_string: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await?;

        sqlx::migrate!("../../migrations").run(&pool).await?;

        let db = Self {
            pool: Arc::new(pool),
        };
        db.clean().await?;
        Ok(db)
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get an Arc clone of the pool for sharing
    pub fn pool_arc(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }

    /// Clean all tables for test isolation
    pub async fn clean(&self) -> anyhow::Result<()> {
        sqlx::query(&truncate_sql()).execute(self.pool()).await?;
        Ok(())
    }
}

fn truncate_sql() -> String {
    format!("TRUNCATE TABLE {} CASCADE", TABLES.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_covers_every_table() {
        let sql = truncate_sql();
        assert!(sql.starts_with("TRUNCATE TABLE hits, "));
        assert!(sql.ends_with("users CASCADE"));
        assert_eq!(TABLES.len(), 17);
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL to be running
    async fn test_database_creation() {
        let db = TestDatabase::from_env().await.unwrap();
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(db.pool()).await.unwrap();
        assert_eq!(one, 1);
    }
}
