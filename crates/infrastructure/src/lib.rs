//! Infrastructure layer for the CMS backend.
//!
//! PostgreSQL persistence for every domain entity through the repository
//! pattern: one `async_trait` per entity, implemented by a `Pg*Repository`
//! over a shared `PgPool`.
//!
//! ```rust,ignore
//! use cms_infrastructure::{DatabaseConfig, DatabasePool, Repositories};
//!
//! let settings = AppConfig::load()?;
//! let pool = DatabasePool::new(&DatabaseConfig::from_settings(&settings.database)).await?;
//! pool.migrate().await?;
//!
//! let repos = Repositories::new(pool.pool().clone());
//! let tree = repos.categories.tree().await?;
//! ```

pub mod database;
pub mod repositories;

pub use database::{DatabaseConfig, DatabasePool, HealthStatus, TransactionExt};
pub use repositories::*;

use cms_domain::DomainError;

pub type Result<T> = std::result::Result<T, Error>;

/// Infrastructure-level errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Row missing or soft-deleted
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique constraint violation or conflicting state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Input rejected before touching the database
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value no longer parses, e.g. an unknown status string
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl Error {
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Error::NotFound(format!("{} {}", entity, id))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Only pool and connection failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Database(
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            )
        )
    }

    /// Map a unique violation to `Conflict`, keep everything else as a
    /// database error.
    pub fn from_write(err: sqlx::Error, conflict: impl FnOnce() -> String) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Error::Conflict(conflict()),
            _ => Error::Database(err),
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Error::Validation(errors.to_string())
    }
}

impl From<DomainError> for Error {
    fn from(err: DomainError) -> Self {
        Error::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cms_domain::CategoryId;
    use validator::Validate;

    #[test]
    fn test_error_retryable() {
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_retryable());
        assert!(!Error::NotFound("article".to_string()).is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let id = CategoryId::new();
        let err = Error::not_found("category", id);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), format!("Not found: category {}", id));
    }

    #[test]
    fn test_from_write_keeps_other_errors() {
        let err = Error::from_write(sqlx::Error::RowNotFound, || "dup".to_string());
        assert!(matches!(err, Error::Database(_)));
    }

    #[test]
    fn test_validation_conversions() {
        let input = cms_domain::category::NewCategory {
            parent_id: None,
            name: String::new(),
            slug: "ok".to_string(),
            sort_order: 0,
        };
        let err: Error = input.validate().unwrap_err().into();
        assert!(matches!(err, Error::Validation(msg) if msg.contains("name")));

        let err: Error = DomainError::SurveyClosed.into();
        assert!(matches!(err, Error::Validation(_)));
    }
}
