//! WeChat follower repository.
//!
//! Followers are keyed by `openid`, which stays unique across deleted rows so
//! that `upsert` can revive a follower who unsubscribed and was purged from
//! the back office.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};
use uuid::Uuid;
use validator::Validate;

use cms_common::pagination::{DateRange, PaginatedResult, PaginationParams, SortParams};
use cms_domain::{
    wechat::{WeChatProfile, WeChatUser, WeChatUserFilter},
    DailyCount, UserId, WeChatUserId,
};

use super::query::{self, non_blank, parse_enum, push_keyword, read_audit, AUDIT_COLUMNS};
use crate::{Error, Result};

const SORT_FIELDS: [&str; 3] = ["created_at", "subscribed_at", "nickname"];

const WECHAT_COLUMNS: &str = "id, openid, unionid, user_id, nickname, avatar_url, gender, city, \
     province, country, subscribed, subscribed_at, unsubscribed_at";

#[derive(Debug, Clone, Default)]
pub struct WeChatUserQuery {
    pub filter: WeChatUserFilter,
    pub pagination: PaginationParams,
    pub sort: SortParams,
}

#[async_trait]
pub trait WeChatUserRepository: Send + Sync {
    /// Insert or refresh a follower from its WeChat profile.
    ///
    /// An existing row keeps its id and bound user; a soft-deleted row is
    /// revived.
    async fn upsert(&self, profile: WeChatProfile) -> Result<WeChatUser>;

    async fn get_by_id(&self, id: WeChatUserId) -> Result<WeChatUser>;

    async fn find_by_openid(&self, openid: &str) -> Result<Option<WeChatUser>>;

    async fn find_by_unionid(&self, unionid: &str) -> Result<Option<WeChatUser>>;

    async fn find_by_user(&self, user_id: UserId) -> Result<Option<WeChatUser>>;

    /// Link the follower to a site account.
    async fn bind_user(&self, id: WeChatUserId, user_id: UserId) -> Result<WeChatUser>;

    async fn unbind_user(&self, id: WeChatUserId) -> Result<WeChatUser>;

    /// Record a (un)subscribe event; the timestamp only moves on a change.
    async fn set_subscribed(&self, openid: &str, subscribed: bool) -> Result<WeChatUser>;

    async fn delete(&self, id: WeChatUserId) -> Result<bool>;

    async fn list(&self, query: WeChatUserQuery) -> Result<PaginatedResult<WeChatUser>>;

    async fn count(&self, filter: &WeChatUserFilter) -> Result<u64>;

    /// New subscriptions per day.
    async fn daily_subscriptions(&self, range: DateRange) -> Result<Vec<DailyCount>>;
}

pub struct PgWeChatUserRepository {
    pool: PgPool,
}

impl PgWeChatUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, column: &'static str, value: &str) -> Result<Option<WeChatUser>> {
        let row = sqlx::query(&format!(
            "SELECT {WECHAT_COLUMNS}, {AUDIT_COLUMNS} FROM wechat_users \
             WHERE {column} = $1 AND is_deleted = FALSE ORDER BY created_at LIMIT 1"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(row_to_wechat_user).transpose()
    }

    async fn set_user(&self, id: WeChatUserId, user_id: Option<UserId>) -> Result<WeChatUser> {
        let row = sqlx::query(&format!(
            "UPDATE wechat_users SET user_id = $2, updated_at = $3 \
             WHERE id = $1 AND is_deleted = FALSE RETURNING {WECHAT_COLUMNS}, {AUDIT_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(user_id.map(UserId::into_uuid))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(wechat_user_id = %id, bound = user_id.is_some(), "WeChat binding changed");
        match row {
            Some(row) => row_to_wechat_user(&row),
            None => Err(Error::not_found("wechat user", id)),
        }
    }
}

fn row_to_wechat_user(row: &PgRow) -> Result<WeChatUser> {
    Ok(WeChatUser {
        id: WeChatUserId::from(row.get::<Uuid, _>("id")),
        openid: row.get("openid"),
        unionid: row.get("unionid"),
        user_id: row.get::<Option<Uuid>, _>("user_id").map(UserId::from),
        nickname: row.get("nickname"),
        avatar_url: row.get("avatar_url"),
        gender: parse_enum(row.get::<String, _>("gender").as_str())?,
        city: row.get("city"),
        province: row.get("province"),
        country: row.get("country"),
        subscribed: row.get("subscribed"),
        subscribed_at: row.get("subscribed_at"),
        unsubscribed_at: row.get("unsubscribed_at"),
        audit: read_audit(row, ""),
    })
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &WeChatUserFilter) {
    builder.push(" WHERE is_deleted = FALSE");
    if let Some(subscribed) = filter.subscribed {
        builder.push(" AND subscribed = ");
        builder.push_bind(subscribed);
    }
    match filter.bound {
        Some(true) => {
            builder.push(" AND user_id IS NOT NULL");
        }
        Some(false) => {
            builder.push(" AND user_id IS NULL");
        }
        None => {}
    }
    if let Some(keyword) = non_blank(&filter.keyword) {
        push_keyword(builder, &["nickname", "openid"], keyword);
    }
}

#[async_trait]
impl WeChatUserRepository for PgWeChatUserRepository {
    #[instrument(skip(self, profile), fields(openid = %profile.openid))]
    async fn upsert(&self, profile: WeChatProfile) -> Result<WeChatUser> {
        profile.validate()?;

        let now = Utc::now();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO wechat_users (
                id, openid, unionid, nickname, avatar_url, gender, city, province, country,
                subscribed, subscribed_at, unsubscribed_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            ON CONFLICT (openid) DO UPDATE SET
                unionid = COALESCE(EXCLUDED.unionid, wechat_users.unionid),
                nickname = EXCLUDED.nickname,
                avatar_url = EXCLUDED.avatar_url,
                gender = EXCLUDED.gender,
                city = EXCLUDED.city,
                province = EXCLUDED.province,
                country = EXCLUDED.country,
                subscribed = EXCLUDED.subscribed,
                subscribed_at = CASE
                    WHEN EXCLUDED.subscribed AND NOT wechat_users.subscribed THEN EXCLUDED.updated_at
                    ELSE COALESCE(wechat_users.subscribed_at, EXCLUDED.subscribed_at)
                END,
                unsubscribed_at = CASE
                    WHEN NOT EXCLUDED.subscribed AND wechat_users.subscribed THEN EXCLUDED.updated_at
                    ELSE wechat_users.unsubscribed_at
                END,
                is_deleted = FALSE,
                deleted_at = NULL,
                updated_at = EXCLUDED.updated_at
            RETURNING {WECHAT_COLUMNS}, {AUDIT_COLUMNS}
            "#
        ))
        .bind(WeChatUserId::new().into_uuid())
        .bind(&profile.openid)
        .bind(&profile.unionid)
        .bind(&profile.nickname)
        .bind(&profile.avatar_url)
        .bind(profile.gender.as_str())
        .bind(&profile.city)
        .bind(&profile.province)
        .bind(&profile.country)
        .bind(profile.subscribed)
        .bind(profile.subscribed.then_some(now))
        .bind((!profile.subscribed).then_some(now))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        let user = row_to_wechat_user(&row)?;
        debug!(wechat_user_id = %user.id, subscribed = user.subscribed, "WeChat user upserted");
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: WeChatUserId) -> Result<WeChatUser> {
        let row = sqlx::query(&format!(
            "SELECT {WECHAT_COLUMNS}, {AUDIT_COLUMNS} FROM wechat_users \
             WHERE id = $1 AND is_deleted = FALSE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => row_to_wechat_user(&row),
            None => Err(Error::not_found("wechat user", id)),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_openid(&self, openid: &str) -> Result<Option<WeChatUser>> {
        self.find_one("openid", openid).await
    }

    #[instrument(skip(self))]
    async fn find_by_unionid(&self, unionid: &str) -> Result<Option<WeChatUser>> {
        self.find_one("unionid", unionid).await
    }

    #[instrument(skip(self))]
    async fn find_by_user(&self, user_id: UserId) -> Result<Option<WeChatUser>> {
        let row = sqlx::query(&format!(
            "SELECT {WECHAT_COLUMNS}, {AUDIT_COLUMNS} FROM wechat_users \
             WHERE user_id = $1 AND is_deleted = FALSE ORDER BY updated_at DESC LIMIT 1"
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(row_to_wechat_user).transpose()
    }

    #[instrument(skip(self))]
    async fn bind_user(&self, id: WeChatUserId, user_id: UserId) -> Result<WeChatUser> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = $1 AND is_deleted = FALSE)",
        )
        .bind(user_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        if !exists {
            return Err(Error::not_found("user", user_id));
        }
        self.set_user(id, Some(user_id)).await
    }

    #[instrument(skip(self))]
    async fn unbind_user(&self, id: WeChatUserId) -> Result<WeChatUser> {
        self.set_user(id, None).await
    }

    #[instrument(skip(self))]
    async fn set_subscribed(&self, openid: &str, subscribed: bool) -> Result<WeChatUser> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE wechat_users SET
                subscribed_at = CASE WHEN $2 AND NOT subscribed THEN $3 ELSE subscribed_at END,
                unsubscribed_at = CASE WHEN NOT $2 AND subscribed THEN $3 ELSE unsubscribed_at END,
                subscribed = $2,
                updated_at = $3
            WHERE openid = $1 AND is_deleted = FALSE
            RETURNING {WECHAT_COLUMNS}, {AUDIT_COLUMNS}
            "#
        ))
        .bind(openid)
        .bind(subscribed)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(openid, subscribed, found = row.is_some(), "Subscription event");
        match row {
            Some(row) => row_to_wechat_user(&row),
            None => Err(Error::not_found("wechat user", openid)),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: WeChatUserId) -> Result<bool> {
        query::soft_delete(&self.pool, "wechat_users", id.into_uuid()).await
    }

    #[instrument(skip(self, query))]
    async fn list(&self, query: WeChatUserQuery) -> Result<PaginatedResult<WeChatUser>> {
        let pagination = query.pagination.normalized();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM wechat_users");
        push_filter(&mut count, &query.filter);
        let total = query::fetch_count(&self.pool, count).await?;

        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {WECHAT_COLUMNS}, {AUDIT_COLUMNS} FROM wechat_users"
        ));
        push_filter(&mut builder, &query.filter);
        query::push_order(&mut builder, &query.sort, &SORT_FIELDS, "created_at");
        query::push_page(&mut builder, &pagination);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let users = rows.iter().map(row_to_wechat_user).collect::<Result<Vec<_>>>()?;
        Ok(PaginatedResult::from_params(users, &pagination, total))
    }

    #[instrument(skip(self, filter))]
    async fn count(&self, filter: &WeChatUserFilter) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM wechat_users");
        push_filter(&mut builder, filter);
        query::fetch_count(&self.pool, builder).await
    }

    #[instrument(skip(self))]
    async fn daily_subscriptions(&self, range: DateRange) -> Result<Vec<DailyCount>> {
        range.validate().map_err(Error::Validation)?;

        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT (subscribed_at AT TIME ZONE 'UTC')::DATE AS day, COUNT(*) AS count \
             FROM wechat_users WHERE is_deleted = FALSE AND subscribed_at IS NOT NULL",
        );
        query::push_date_range(&mut builder, "subscribed_at", &range);
        builder.push(" GROUP BY day ORDER BY day");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(query::daily_counts(&rows, &range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_sql(filter: &WeChatUserFilter) -> String {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM wechat_users");
        push_filter(&mut builder, filter);
        builder.sql().to_string()
    }

    #[test]
    fn test_bound_filter() {
        let bound = WeChatUserFilter {
            bound: Some(true),
            ..Default::default()
        };
        assert!(filter_sql(&bound).ends_with("AND user_id IS NOT NULL"));

        let unbound = WeChatUserFilter {
            subscribed: Some(true),
            bound: Some(false),
            ..Default::default()
        };
        assert_eq!(
            filter_sql(&unbound),
            "SELECT COUNT(*) FROM wechat_users WHERE is_deleted = FALSE \
             AND subscribed = $1 AND user_id IS NULL"
        );
    }

    #[test]
    fn test_keyword_matches_nickname_and_openid() {
        let filter = WeChatUserFilter {
            keyword: Some("li".to_string()),
            ..Default::default()
        };
        assert!(filter_sql(&filter).ends_with("AND (nickname ILIKE $1 OR openid ILIKE $2)"));
    }
}
