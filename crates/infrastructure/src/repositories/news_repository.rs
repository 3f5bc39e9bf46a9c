//! News repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};
use uuid::Uuid;
use validator::Validate;

use cms_common::pagination::{PaginatedResult, PaginationParams, SortParams};
use cms_domain::{
    news::{News, NewsFilter, NewsUpdate, NewNews, SourceCount},
    Audit, NewsId,
};

use super::query::{self, non_blank, push_keyword, read_audit, AUDIT_COLUMNS};
use crate::{Error, Result};

const SORT_FIELDS: [&str; 4] = ["published_at", "created_at", "view_count", "title"];

const NEWS_COLUMNS: &str =
    "id, title, summary, content, source, source_url, cover_url, is_headline, view_count, published_at";

#[derive(Debug, Clone)]
pub struct NewsQuery {
    pub filter: NewsFilter,
    pub pagination: PaginationParams,
    pub sort: SortParams,
}

impl Default for NewsQuery {
    fn default() -> Self {
        Self {
            filter: NewsFilter::default(),
            pagination: PaginationParams::default(),
            sort: SortParams::desc("published_at"),
        }
    }
}

#[async_trait]
pub trait NewsRepository: Send + Sync {
    async fn create(&self, input: NewNews) -> Result<News>;

    async fn get_by_id(&self, id: NewsId) -> Result<News>;

    async fn update(&self, id: NewsId, update: NewsUpdate) -> Result<News>;

    async fn delete(&self, id: NewsId) -> Result<bool>;

    async fn list(&self, query: NewsQuery) -> Result<PaginatedResult<News>>;

    async fn count(&self, filter: &NewsFilter) -> Result<u64>;

    /// Make `id` the only headline.
    async fn set_headline(&self, id: NewsId) -> Result<()>;

    async fn get_headline(&self) -> Result<Option<News>>;

    /// Most recently published items, newest first.
    async fn latest(&self, limit: u32) -> Result<Vec<News>>;

    async fn increment_view_count(&self, id: NewsId) -> Result<i64>;

    /// Live items per source; items without a source under `None`.
    async fn count_by_source(&self) -> Result<Vec<SourceCount>>;
}

pub struct PgNewsRepository {
    pool: PgPool,
}

impl PgNewsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_news(row: &PgRow) -> News {
    News {
        id: NewsId::from(row.get::<Uuid, _>("id")),
        title: row.get("title"),
        summary: row.get("summary"),
        content: row.get("content"),
        source: row.get("source"),
        source_url: row.get("source_url"),
        cover_url: row.get("cover_url"),
        is_headline: row.get("is_headline"),
        view_count: row.get("view_count"),
        published_at: row.get("published_at"),
        audit: read_audit(row, ""),
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &NewsFilter) {
    builder.push(" WHERE is_deleted = FALSE");
    if let Some(keyword) = non_blank(&filter.keyword) {
        push_keyword(builder, &["title", "summary"], keyword);
    }
    if let Some(source) = non_blank(&filter.source) {
        builder.push(" AND source = ");
        builder.push_bind(source.to_string());
    }
    if let Some(is_headline) = filter.is_headline {
        builder.push(" AND is_headline = ");
        builder.push_bind(is_headline);
    }
    if let Some(from) = filter.published_from {
        builder.push(" AND published_at >= ");
        builder.push_bind(from);
    }
    if let Some(to) = filter.published_to {
        builder.push(" AND published_at <= ");
        builder.push_bind(to);
    }
}

#[async_trait]
impl NewsRepository for PgNewsRepository {
    #[instrument(skip(self, input), fields(title = %input.title))]
    async fn create(&self, input: NewNews) -> Result<News> {
        input.validate()?;

        let id = NewsId::new();
        let now = Utc::now();
        let published_at = input.published_at.unwrap_or(now);

        sqlx::query(
            r#"
            INSERT INTO news (
                id, title, summary, content, source, source_url, cover_url,
                published_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            "#,
        )
        .bind(id.as_uuid())
        .bind(&input.title)
        .bind(&input.summary)
        .bind(&input.content)
        .bind(&input.source)
        .bind(&input.source_url)
        .bind(&input.cover_url)
        .bind(published_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(news_id = %id, "News created");
        Ok(News {
            id,
            title: input.title,
            summary: input.summary,
            content: input.content,
            source: input.source,
            source_url: input.source_url,
            cover_url: input.cover_url,
            is_headline: false,
            view_count: 0,
            published_at,
            audit: Audit::new(now),
        })
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: NewsId) -> Result<News> {
        let row = sqlx::query(&format!(
            "SELECT {NEWS_COLUMNS}, {AUDIT_COLUMNS} FROM news WHERE id = $1 AND is_deleted = FALSE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref()
            .map(row_to_news)
            .ok_or_else(|| Error::not_found("news", id))
    }

    #[instrument(skip(self, update))]
    async fn update(&self, id: NewsId, update: NewsUpdate) -> Result<News> {
        update.validate()?;

        let mut builder = QueryBuilder::<Postgres>::new("UPDATE news SET updated_at = ");
        builder.push_bind(Utc::now());
        if let Some(title) = &update.title {
            builder.push(", title = ");
            builder.push_bind(title.clone());
        }
        if let Some(summary) = &update.summary {
            builder.push(", summary = ");
            builder.push_bind(summary.clone());
        }
        if let Some(content) = &update.content {
            builder.push(", content = ");
            builder.push_bind(content.clone());
        }
        if let Some(source) = &update.source {
            builder.push(", source = ");
            builder.push_bind(source.clone());
        }
        if let Some(source_url) = &update.source_url {
            builder.push(", source_url = ");
            builder.push_bind(source_url.clone());
        }
        if let Some(cover_url) = &update.cover_url {
            builder.push(", cover_url = ");
            builder.push_bind(cover_url.clone());
        }
        if let Some(published_at) = update.published_at {
            builder.push(", published_at = ");
            builder.push_bind(published_at);
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id.into_uuid());
        builder.push(format!(
            " AND is_deleted = FALSE RETURNING {NEWS_COLUMNS}, {AUDIT_COLUMNS}"
        ));

        let row = builder
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        debug!(news_id = %id, updated = row.is_some(), "News update");
        row.as_ref()
            .map(row_to_news)
            .ok_or_else(|| Error::not_found("news", id))
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: NewsId) -> Result<bool> {
        query::soft_delete(&self.pool, "news", id.into_uuid()).await
    }

    #[instrument(skip(self, query))]
    async fn list(&self, query: NewsQuery) -> Result<PaginatedResult<News>> {
        let pagination = query.pagination.normalized();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM news");
        push_filter(&mut count, &query.filter);
        let total = query::fetch_count(&self.pool, count).await?;

        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {NEWS_COLUMNS}, {AUDIT_COLUMNS} FROM news"
        ));
        push_filter(&mut builder, &query.filter);
        query::push_order(&mut builder, &query.sort, &SORT_FIELDS, "published_at");
        query::push_page(&mut builder, &pagination);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let items = rows.iter().map(row_to_news).collect();
        Ok(PaginatedResult::from_params(items, &pagination, total))
    }

    #[instrument(skip(self, filter))]
    async fn count(&self, filter: &NewsFilter) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM news");
        push_filter(&mut builder, filter);
        query::fetch_count(&self.pool, builder).await
    }

    #[instrument(skip(self))]
    async fn set_headline(&self, id: NewsId) -> Result<()> {
        query::set_exclusive_flag(&self.pool, "news", "is_headline", "news", id.into_uuid()).await
    }

    #[instrument(skip(self))]
    async fn get_headline(&self) -> Result<Option<News>> {
        let row = sqlx::query(&format!(
            "SELECT {NEWS_COLUMNS}, {AUDIT_COLUMNS} FROM news \
             WHERE is_headline = TRUE AND is_deleted = FALSE ORDER BY updated_at DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(row_to_news))
    }

    #[instrument(skip(self))]
    async fn latest(&self, limit: u32) -> Result<Vec<News>> {
        let limit = limit.clamp(1, PaginationParams::MAX_PAGE_SIZE);
        let rows = sqlx::query(&format!(
            "SELECT {NEWS_COLUMNS}, {AUDIT_COLUMNS} FROM news \
             WHERE is_deleted = FALSE ORDER BY published_at DESC, id DESC LIMIT $1"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(row_to_news).collect())
    }

    #[instrument(skip(self))]
    async fn increment_view_count(&self, id: NewsId) -> Result<i64> {
        query::increment_counter(&self.pool, "news", "view_count", "news", id.into_uuid()).await
    }

    #[instrument(skip(self))]
    async fn count_by_source(&self) -> Result<Vec<SourceCount>> {
        let rows = sqlx::query(
            "SELECT source, COUNT(*) AS count FROM news WHERE is_deleted = FALSE \
             GROUP BY source ORDER BY count DESC, source",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .iter()
            .map(|row| SourceCount {
                source: row.get("source"),
                count: row.get::<i64, _>("count") as u64,
            })
            .collect())
    }
}
