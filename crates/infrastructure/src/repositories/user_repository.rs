//! User repository implementation.
//!
//! PostgreSQL-backed persistence for user accounts. Usernames and emails are
//! unique among live users, compared case-insensitively.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};
use uuid::Uuid;
use validator::Validate;

use cms_common::pagination::{PaginatedResult, PaginationParams, SortParams};
use cms_domain::{
    user::{NewUser, User, UserFilter, UserRole, UserStatus, UserUpdate},
    Audit, StatusCount, UserId,
};

use super::query::{self, non_blank, parse_enum, push_keyword, read_audit, AUDIT_COLUMNS};
use crate::{Error, Result};

const SORT_FIELDS: [&str; 4] = ["username", "email", "created_at", "last_login_at"];

/// Query parameters for user searches.
#[derive(Debug, Clone, Default)]
pub struct UserQuery {
    pub filter: UserFilter,
    pub pagination: PaginationParams,
    pub sort: SortParams,
}

/// User credentials for authentication.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: UserId,
    pub password_hash: String,
}

/// Repository trait for user operations.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, input: NewUser) -> Result<User>;

    async fn get_by_id(&self, id: UserId) -> Result<User>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Credentials of an active user, looked up by username.
    async fn get_password_hash(&self, username: &str) -> Result<Option<UserCredentials>>;

    async fn update(&self, id: UserId, update: UserUpdate) -> Result<User>;

    async fn update_password(&self, id: UserId, password_hash: &str) -> Result<()>;

    async fn set_status(&self, id: UserId, status: UserStatus) -> Result<()>;

    /// Stamp `last_login_at` with the current time.
    async fn record_login(&self, id: UserId) -> Result<()>;

    /// Delete a user (soft delete).
    async fn delete(&self, id: UserId) -> Result<bool>;

    async fn list(&self, query: UserQuery) -> Result<PaginatedResult<User>>;

    async fn count(&self, filter: &UserFilter) -> Result<u64>;

    async fn username_exists(&self, username: &str) -> Result<bool>;

    async fn email_exists(&self, email: &str) -> Result<bool>;

    /// Live users per role.
    async fn count_by_role(&self) -> Result<Vec<StatusCount<UserRole>>>;
}

/// PostgreSQL implementation of UserRepository.
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, column: &'static str, value: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "{} WHERE LOWER({column}) = LOWER($1) AND is_deleted = FALSE",
            select_sql()
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn exists(&self, column: &'static str, value: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM users WHERE LOWER({column}) = LOWER($1) AND is_deleted = FALSE)"
        ))
        .bind(value)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(exists)
    }
}

fn select_sql() -> String {
    format!(
        "SELECT id, username, email, phone, display_name, avatar_url, role, status, \
         last_login_at, {AUDIT_COLUMNS} FROM users"
    )
}

fn row_to_user(row: &PgRow) -> Result<User> {
    Ok(User {
        id: UserId::from(row.get::<Uuid, _>("id")),
        username: row.get("username"),
        email: row.get("email"),
        phone: row.get("phone"),
        display_name: row.get("display_name"),
        avatar_url: row.get("avatar_url"),
        role: parse_enum(row.get::<String, _>("role").as_str())?,
        status: parse_enum(row.get::<String, _>("status").as_str())?,
        last_login_at: row.get("last_login_at"),
        audit: read_audit(row, ""),
    })
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    builder.push(" WHERE is_deleted = FALSE");
    if let Some(role) = filter.role {
        builder.push(" AND role = ");
        builder.push_bind(role.as_str());
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ");
        builder.push_bind(status.as_str());
    }
    if let Some(keyword) = non_blank(&filter.keyword) {
        push_keyword(builder, &["username", "email", "display_name"], keyword);
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    #[instrument(skip(self, input), fields(username = %input.username))]
    async fn create(&self, input: NewUser) -> Result<User> {
        input.validate()?;

        let id = UserId::new();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO users (
                id, username, email, phone, display_name, password_hash,
                role, status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            "#,
        )
        .bind(id.as_uuid())
        .bind(&input.username)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.display_name)
        .bind(&input.password_hash)
        .bind(input.role.as_str())
        .bind(UserStatus::Active.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::from_write(e, || {
                format!("username '{}' or email '{}' already taken", input.username, input.email)
            })
        })?;

        debug!(user_id = %id, "User created successfully");
        Ok(User {
            id,
            username: input.username,
            email: input.email,
            phone: input.phone,
            display_name: input.display_name,
            avatar_url: None,
            role: input.role,
            status: UserStatus::Active,
            last_login_at: None,
            audit: Audit::new(now),
        })
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: UserId) -> Result<User> {
        let row = sqlx::query(&format!("{} WHERE id = $1 AND is_deleted = FALSE", select_sql()))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(row) => row_to_user(&row),
            None => Err(Error::not_found("user", id)),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        self.find_one("username", username).await
    }

    #[instrument(skip(self))]
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_one("email", email).await
    }

    #[instrument(skip(self))]
    async fn get_password_hash(&self, username: &str) -> Result<Option<UserCredentials>> {
        let row = sqlx::query(
            r#"
            SELECT id, password_hash
            FROM users
            WHERE LOWER(username) = LOWER($1) AND status = $2 AND is_deleted = FALSE
            "#,
        )
        .bind(username)
        .bind(UserStatus::Active.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| UserCredentials {
            user_id: UserId::from(r.get::<Uuid, _>("id")),
            password_hash: r.get("password_hash"),
        }))
    }

    #[instrument(skip(self, update))]
    async fn update(&self, id: UserId, update: UserUpdate) -> Result<User> {
        update.validate()?;

        let mut builder = QueryBuilder::<Postgres>::new("UPDATE users SET updated_at = ");
        builder.push_bind(Utc::now());
        if let Some(email) = &update.email {
            builder.push(", email = ");
            builder.push_bind(email.clone());
        }
        if let Some(phone) = &update.phone {
            builder.push(", phone = ");
            builder.push_bind(phone.clone());
        }
        if let Some(display_name) = &update.display_name {
            builder.push(", display_name = ");
            builder.push_bind(display_name.clone());
        }
        if let Some(avatar_url) = &update.avatar_url {
            builder.push(", avatar_url = ");
            builder.push_bind(avatar_url.clone());
        }
        if let Some(role) = update.role {
            builder.push(", role = ");
            builder.push_bind(role.as_str());
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id.into_uuid());
        builder.push(format!(
            " AND is_deleted = FALSE RETURNING id, username, email, phone, display_name, \
             avatar_url, role, status, last_login_at, {AUDIT_COLUMNS}"
        ));

        let row = builder
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::from_write(e, || {
                    format!("email '{}' already taken", update.email.clone().unwrap_or_default())
                })
            })?;

        let user = match row {
            Some(row) => row_to_user(&row)?,
            None => return Err(Error::not_found("user", id)),
        };

        debug!(user_id = %id, "User updated");
        Ok(user)
    }

    #[instrument(skip(self, password_hash))]
    async fn update_password(&self, id: UserId, password_hash: &str) -> Result<()> {
        if password_hash.is_empty() {
            return Err(Error::Validation("password hash must not be empty".to_string()));
        }

        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, updated_at = $3
            WHERE id = $1 AND is_deleted = FALSE
            "#,
        )
        .bind(id.as_uuid())
        .bind(password_hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("user", id));
        }

        debug!(user_id = %id, "Password updated");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_status(&self, id: UserId, status: UserStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET status = $2, updated_at = $3
            WHERE id = $1 AND is_deleted = FALSE
            "#,
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("user", id));
        }

        debug!(user_id = %id, status = %status, "Status updated");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn record_login(&self, id: UserId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET last_login_at = $2 WHERE id = $1 AND is_deleted = FALSE",
        )
        .bind(id.as_uuid())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("user", id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: UserId) -> Result<bool> {
        query::soft_delete(&self.pool, "users", id.into_uuid()).await
    }

    #[instrument(skip(self, query))]
    async fn list(&self, query: UserQuery) -> Result<PaginatedResult<User>> {
        let pagination = query.pagination.normalized();
        let total = self.count(&query.filter).await?;

        let mut builder = QueryBuilder::<Postgres>::new(select_sql());
        push_filter(&mut builder, &query.filter);
        query::push_order(&mut builder, &query.sort, &SORT_FIELDS, "created_at");
        query::push_page(&mut builder, &pagination);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let users = rows.iter().map(row_to_user).collect::<Result<Vec<_>>>()?;
        Ok(PaginatedResult::from_params(users, &pagination, total))
    }

    #[instrument(skip(self, filter))]
    async fn count(&self, filter: &UserFilter) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filter(&mut builder, filter);
        query::fetch_count(&self.pool, builder).await
    }

    #[instrument(skip(self))]
    async fn username_exists(&self, username: &str) -> Result<bool> {
        self.exists("username", username).await
    }

    #[instrument(skip(self))]
    async fn email_exists(&self, email: &str) -> Result<bool> {
        self.exists("email", email).await
    }

    #[instrument(skip(self))]
    async fn count_by_role(&self) -> Result<Vec<StatusCount<UserRole>>> {
        query::grouped_status_counts(
            &self.pool,
            "SELECT role AS status, COUNT(*) AS count FROM users \
             WHERE is_deleted = FALSE GROUP BY role ORDER BY role",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_sql() {
        let filter = UserFilter {
            role: Some(UserRole::Editor),
            status: Some(UserStatus::Active),
            keyword: Some("li".to_string()),
        };
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filter(&mut builder, &filter);
        assert_eq!(
            builder.sql(),
            "SELECT COUNT(*) FROM users WHERE is_deleted = FALSE AND role = $1 AND status = $2 \
             AND (username ILIKE $3 OR email ILIKE $4 OR display_name ILIKE $5)"
        );
    }

    #[test]
    fn test_select_lists_audit_columns() {
        assert!(select_sql().contains("is_deleted, created_at, updated_at, deleted_at"));
    }
}
