//! Article repository.
//!
//! Tags live in `article_tags` and are preloaded with one batched query per
//! page. `get_detail` joins the category and author in a single statement.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;
use validator::Validate;

use cms_common::pagination::{PaginatedResult, PaginationParams, SortParams};
use cms_domain::{
    article::{
        normalize_tags, Article, ArticleDetail, ArticleFilter, ArticleStatus, ArticleUpdate,
        CategoryCount, NewArticle,
    },
    category::{self, Category},
    user::UserSummary,
    ArticleId, Audit, CategoryId, StatusCount, UserId,
};

use super::category_repository::{ensure_live_category, load_live_categories};
use super::query::{self, non_blank, parse_enum, push_keyword, read_audit, AUDIT_COLUMNS};
use crate::{Error, Result};

const SORT_FIELDS: [&str; 4] = ["created_at", "published_at", "view_count", "title"];

const ARTICLE_COLUMNS: &str = "id, category_id, author_id, title, summary, content, cover_url, \
     status, is_top, is_recommended, view_count, published_at";

/// Query parameters for article listings.
#[derive(Debug, Clone, Default)]
pub struct ArticleQuery {
    pub filter: ArticleFilter,
    pub pagination: PaginationParams,
    pub sort: SortParams,
}

#[async_trait]
pub trait ArticleRepository: Send + Sync {
    /// Insert the article and its tags in one transaction.
    async fn create(&self, input: NewArticle) -> Result<Article>;

    /// Article with its tags.
    async fn get_by_id(&self, id: ArticleId) -> Result<Article>;

    /// Article with category and author preloaded.
    async fn get_detail(&self, id: ArticleId) -> Result<ArticleDetail>;

    async fn update(&self, id: ArticleId, update: ArticleUpdate) -> Result<Article>;

    async fn delete(&self, id: ArticleId) -> Result<bool>;

    async fn list(&self, query: ArticleQuery) -> Result<PaginatedResult<Article>>;

    async fn count(&self, filter: &ArticleFilter) -> Result<u64>;

    /// Mark as published; an existing `published_at` is kept.
    async fn publish(&self, id: ArticleId) -> Result<Article>;

    /// Make `id` the only pinned article.
    async fn set_top(&self, id: ArticleId) -> Result<()>;

    /// Unpin every article; returns how many were pinned.
    async fn clear_top(&self) -> Result<u64>;

    async fn get_top(&self) -> Result<Option<Article>>;

    async fn set_recommended(&self, id: ArticleId, recommended: bool) -> Result<()>;

    /// Returns the new view count.
    async fn increment_view_count(&self, id: ArticleId) -> Result<i64>;

    async fn count_by_status(&self) -> Result<Vec<StatusCount<ArticleStatus>>>;

    /// Live articles per live category; uncategorised ones under `None`.
    /// Articles left in a deleted category are not counted.
    async fn count_by_category(&self) -> Result<Vec<CategoryCount>>;
}

pub struct PgArticleRepository {
    pool: PgPool,
}

impl PgArticleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Batch-load tags for the given articles, keyed by article id.
    async fn load_tags(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<String>>> {
        let mut tags: HashMap<Uuid, Vec<String>> = HashMap::new();
        if ids.is_empty() {
            return Ok(tags);
        }

        let rows = sqlx::query(
            "SELECT article_id, tag FROM article_tags WHERE article_id = ANY($1) ORDER BY position",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        for row in rows {
            tags.entry(row.get("article_id"))
                .or_default()
                .push(row.get("tag"));
        }
        Ok(tags)
    }

    async fn attach_tags(&self, mut articles: Vec<Article>) -> Result<Vec<Article>> {
        let ids: Vec<Uuid> = articles.iter().map(|a| a.id.into_uuid()).collect();
        let mut tags = self.load_tags(&ids).await?;
        for article in &mut articles {
            article.tags = tags.remove(article.id.as_uuid()).unwrap_or_default();
        }
        Ok(articles)
    }

    async fn fetch_one(&self, id: ArticleId) -> Result<Article> {
        let row = sqlx::query(&format!(
            "SELECT {ARTICLE_COLUMNS}, {AUDIT_COLUMNS} FROM articles WHERE id = $1 AND is_deleted = FALSE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let article = match row {
            Some(row) => row_to_article(&row)?,
            None => return Err(Error::not_found("article", id)),
        };
        let mut articles = self.attach_tags(vec![article]).await?;
        articles.pop().ok_or_else(|| Error::not_found("article", id))
    }

    /// Category ids matched by the filter; `None` when it has no category.
    async fn category_scope(&self, filter: &ArticleFilter) -> Result<Option<Vec<Uuid>>> {
        let Some(category_id) = filter.category_id else {
            return Ok(None);
        };
        if !filter.include_subcategories {
            return Ok(Some(vec![category_id.into_uuid()]));
        }

        let all = load_live_categories(&self.pool).await?;
        Ok(Some(
            category::descendant_ids(&all, category_id)
                .into_iter()
                .map(CategoryId::into_uuid)
                .collect(),
        ))
    }
}

fn row_to_article(row: &PgRow) -> Result<Article> {
    Ok(Article {
        id: ArticleId::from(row.get::<Uuid, _>("id")),
        category_id: row.get::<Option<Uuid>, _>("category_id").map(CategoryId::from),
        author_id: row.get::<Option<Uuid>, _>("author_id").map(UserId::from),
        title: row.get("title"),
        summary: row.get("summary"),
        content: row.get("content"),
        cover_url: row.get("cover_url"),
        status: parse_enum(row.get::<String, _>("status").as_str())?,
        is_top: row.get("is_top"),
        is_recommended: row.get("is_recommended"),
        view_count: row.get("view_count"),
        tags: Vec::new(),
        published_at: row.get("published_at"),
        audit: read_audit(row, ""),
    })
}

/// Append the WHERE clause. `categories` is the resolved category scope.
fn push_filter(
    builder: &mut QueryBuilder<'_, Postgres>,
    filter: &ArticleFilter,
    categories: Option<Vec<Uuid>>,
) {
    builder.push(" WHERE is_deleted = FALSE");
    match categories {
        Some(ids) if ids.len() == 1 => {
            builder.push(" AND category_id = ");
            builder.push_bind(ids[0]);
        }
        Some(ids) => {
            builder.push(" AND category_id = ANY(");
            builder.push_bind(ids);
            builder.push(")");
        }
        None => {}
    }
    if let Some(author_id) = filter.author_id {
        builder.push(" AND author_id = ");
        builder.push_bind(author_id.into_uuid());
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ");
        builder.push_bind(status.as_str());
    }
    if let Some(keyword) = non_blank(&filter.keyword) {
        push_keyword(builder, &["title", "summary"], keyword);
    }
    if let Some(tag) = non_blank(&filter.tag) {
        builder.push(
            " AND EXISTS (SELECT 1 FROM article_tags t WHERE t.article_id = articles.id AND t.tag = ",
        );
        builder.push_bind(tag.to_lowercase());
        builder.push(")");
    }
    if let Some(is_top) = filter.is_top {
        builder.push(" AND is_top = ");
        builder.push_bind(is_top);
    }
    if let Some(is_recommended) = filter.is_recommended {
        builder.push(" AND is_recommended = ");
        builder.push_bind(is_recommended);
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

async fn replace_tags(tx: &mut Transaction<'_, Postgres>, id: ArticleId, tags: &[String]) -> Result<()> {
    sqlx::query("DELETE FROM article_tags WHERE article_id = $1")
        .bind(id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

    for (position, tag) in tags.iter().enumerate() {
        sqlx::query("INSERT INTO article_tags (article_id, tag, position) VALUES ($1, $2, $3)")
            .bind(id.as_uuid())
            .bind(tag)
            .bind(position as i32)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
    }
    Ok(())
}

#[async_trait]
impl ArticleRepository for PgArticleRepository {
    #[instrument(skip(self, input), fields(title = %input.title))]
    async fn create(&self, input: NewArticle) -> Result<Article> {
        input.validate()?;
        if let Some(category_id) = input.category_id {
            ensure_live_category(&self.pool, category_id).await?;
        }

        let id = ArticleId::new();
        let now = Utc::now();
        let tags = normalize_tags(&input.tags);
        let published_at = (input.status == ArticleStatus::Published).then_some(now);

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query(
            r#"
            INSERT INTO articles (
                id, category_id, author_id, title, summary, content, cover_url,
                status, is_recommended, published_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            "#,
        )
        .bind(id.as_uuid())
        .bind(input.category_id.map(CategoryId::into_uuid))
        .bind(input.author_id.map(UserId::into_uuid))
        .bind(&input.title)
        .bind(&input.summary)
        .bind(&input.content)
        .bind(&input.cover_url)
        .bind(input.status.as_str())
        .bind(input.is_recommended)
        .bind(published_at)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        replace_tags(&mut tx, id, &tags).await?;

        tx.commit().await.map_err(Error::Database)?;

        debug!(article_id = %id, tags = tags.len(), "Article created");
        Ok(Article {
            id,
            category_id: input.category_id,
            author_id: input.author_id,
            title: input.title,
            summary: input.summary,
            content: input.content,
            cover_url: input.cover_url,
            status: input.status,
            is_top: false,
            is_recommended: input.is_recommended,
            view_count: 0,
            tags,
            published_at,
            audit: Audit::new(now),
        })
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: ArticleId) -> Result<Article> {
        self.fetch_one(id).await
    }

    #[instrument(skip(self))]
    async fn get_detail(&self, id: ArticleId) -> Result<ArticleDetail> {
        let row = sqlx::query(
            r#"
            SELECT
                a.id, a.category_id, a.author_id, a.title, a.summary, a.content, a.cover_url,
                a.status, a.is_top, a.is_recommended, a.view_count, a.published_at,
                a.is_deleted, a.created_at, a.updated_at, a.deleted_at,
                c.id AS c_id, c.parent_id AS c_parent_id, c.name AS c_name, c.slug AS c_slug,
                c.sort_order AS c_sort_order, c.is_deleted AS c_is_deleted,
                c.created_at AS c_created_at, c.updated_at AS c_updated_at,
                c.deleted_at AS c_deleted_at,
                u.id AS u_id, u.username AS u_username, u.display_name AS u_display_name,
                u.avatar_url AS u_avatar_url
            FROM articles a
            LEFT JOIN categories c ON c.id = a.category_id AND c.is_deleted = FALSE
            LEFT JOIN users u ON u.id = a.author_id AND u.is_deleted = FALSE
            WHERE a.id = $1 AND a.is_deleted = FALSE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some(row) = row else {
            return Err(Error::not_found("article", id));
        };

        let article = row_to_article(&row)?;
        let category = row.get::<Option<Uuid>, _>("c_id").map(|category_id| Category {
            id: CategoryId::from(category_id),
            parent_id: row.get::<Option<Uuid>, _>("c_parent_id").map(CategoryId::from),
            name: row.get("c_name"),
            slug: row.get("c_slug"),
            sort_order: row.get("c_sort_order"),
            audit: read_audit(&row, "c_"),
        });
        let author = row.get::<Option<Uuid>, _>("u_id").map(|user_id| UserSummary {
            id: UserId::from(user_id),
            username: row.get("u_username"),
            display_name: row.get("u_display_name"),
            avatar_url: row.get("u_avatar_url"),
        });

        let mut articles = self.attach_tags(vec![article]).await?;
        let article = articles.pop().ok_or_else(|| Error::not_found("article", id))?;

        Ok(ArticleDetail {
            article,
            category,
            author,
        })
    }

    #[instrument(skip(self, update))]
    async fn update(&self, id: ArticleId, update: ArticleUpdate) -> Result<Article> {
        update.validate()?;
        if let Some(Some(category_id)) = update.category_id {
            ensure_live_category(&self.pool, category_id).await?;
        }

        let now = Utc::now();
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE articles SET updated_at = ");
        builder.push_bind(now);
        if let Some(category_id) = update.category_id {
            builder.push(", category_id = ");
            builder.push_bind(category_id.map(CategoryId::into_uuid));
        }
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
        if let Some(cover_url) = &update.cover_url {
            builder.push(", cover_url = ");
            builder.push_bind(cover_url.clone());
        }
        if let Some(status) = update.status {
            builder.push(", status = ");
            builder.push_bind(status.as_str());
            if status == ArticleStatus::Published {
                builder.push(", published_at = COALESCE(published_at, ");
                builder.push_bind(now);
                builder.push(")");
            }
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id.into_uuid());
        builder.push(" AND is_deleted = FALSE");

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let result = builder
            .build()
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("article", id));
        }

        if let Some(tags) = &update.tags {
            replace_tags(&mut tx, id, &normalize_tags(tags)).await?;
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(article_id = %id, "Article updated");
        self.fetch_one(id).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: ArticleId) -> Result<bool> {
        query::soft_delete(&self.pool, "articles", id.into_uuid()).await
    }

    #[instrument(skip(self, query))]
    async fn list(&self, query: ArticleQuery) -> Result<PaginatedResult<Article>> {
        let pagination = query.pagination.normalized();
        let categories = self.category_scope(&query.filter).await?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM articles");
        push_filter(&mut count, &query.filter, categories.clone());
        let total = query::fetch_count(&self.pool, count).await?;

        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {ARTICLE_COLUMNS}, {AUDIT_COLUMNS} FROM articles"
        ));
        push_filter(&mut builder, &query.filter, categories);
        query::push_order(&mut builder, &query.sort, &SORT_FIELDS, "created_at");
        query::push_page(&mut builder, &pagination);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let articles = rows.iter().map(row_to_article).collect::<Result<Vec<_>>>()?;
        let articles = self.attach_tags(articles).await?;
        Ok(PaginatedResult::from_params(articles, &pagination, total))
    }

    #[instrument(skip(self, filter))]
    async fn count(&self, filter: &ArticleFilter) -> Result<u64> {
        let categories = self.category_scope(filter).await?;
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM articles");
        push_filter(&mut builder, filter, categories);
        query::fetch_count(&self.pool, builder).await
    }

    #[instrument(skip(self))]
    async fn publish(&self, id: ArticleId) -> Result<Article> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE articles
            SET status = $2, published_at = COALESCE(published_at, $3), updated_at = $3
            WHERE id = $1 AND is_deleted = FALSE
            "#,
        )
        .bind(id.as_uuid())
        .bind(ArticleStatus::Published.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("article", id));
        }

        debug!(article_id = %id, "Article published");
        self.fetch_one(id).await
    }

    #[instrument(skip(self))]
    async fn set_top(&self, id: ArticleId) -> Result<()> {
        query::set_exclusive_flag(&self.pool, "articles", "is_top", "article", id.into_uuid()).await
    }

    #[instrument(skip(self))]
    async fn clear_top(&self) -> Result<u64> {
        query::clear_flag(&self.pool, "articles", "is_top").await
    }

    #[instrument(skip(self))]
    async fn get_top(&self) -> Result<Option<Article>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM articles WHERE is_top = TRUE AND is_deleted = FALSE \
             ORDER BY updated_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match id {
            Some(id) => self.fetch_one(ArticleId::from(id)).await.map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn set_recommended(&self, id: ArticleId, recommended: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE articles SET is_recommended = $2, updated_at = $3 WHERE id = $1 AND is_deleted = FALSE",
        )
        .bind(id.as_uuid())
        .bind(recommended)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("article", id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn increment_view_count(&self, id: ArticleId) -> Result<i64> {
        query::increment_counter(&self.pool, "articles", "view_count", "article", id.into_uuid())
            .await
    }

    #[instrument(skip(self))]
    async fn count_by_status(&self) -> Result<Vec<StatusCount<ArticleStatus>>> {
        query::grouped_status_counts(
            &self.pool,
            "SELECT status, COUNT(*) AS count FROM articles \
             WHERE is_deleted = FALSE GROUP BY status ORDER BY status",
        )
        .await
    }

    #[instrument(skip(self))]
    async fn count_by_category(&self) -> Result<Vec<CategoryCount>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id AS category_id, c.name AS category_name, COUNT(*) AS count
            FROM articles a
            LEFT JOIN categories c ON c.id = a.category_id AND c.is_deleted = FALSE
            WHERE a.is_deleted = FALSE AND (a.category_id IS NULL OR c.id IS NOT NULL)
            GROUP BY c.id, c.name
            ORDER BY count DESC, c.name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .iter()
            .map(|row| CategoryCount {
                category_id: row.get::<Option<Uuid>, _>("category_id").map(CategoryId::from),
                category_name: row.get("category_name"),
                count: row.get::<i64, _>("count") as u64,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn filter_sql(filter: &ArticleFilter, categories: Option<Vec<Uuid>>) -> String {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM articles");
        push_filter(&mut builder, filter, categories);
        builder.sql().to_string()
    }

    #[test]
    fn test_empty_filter_only_hides_deleted() {
        assert_eq!(
            filter_sql(&ArticleFilter::default(), None),
            "SELECT COUNT(*) FROM articles WHERE is_deleted = FALSE"
        );
    }

    #[test]
    fn test_single_category_uses_equality() {
        let sql = filter_sql(&ArticleFilter::default(), Some(vec![Uuid::now_v7()]));
        assert!(sql.ends_with("AND category_id = $1"));
    }

    #[test]
    fn test_subcategories_use_any() {
        let sql = filter_sql(
            &ArticleFilter::default(),
            Some(vec![Uuid::now_v7(), Uuid::now_v7()]),
        );
        assert!(sql.ends_with("AND category_id = ANY($1)"));
    }

    #[test]
    fn test_full_filter_binds_in_order() {
        let filter = ArticleFilter {
            author_id: Some(UserId::new()),
            status: Some(ArticleStatus::Published),
            keyword: Some("open day".to_string()),
            tag: Some(" Campus ".to_string()),
            is_top: Some(false),
            is_recommended: Some(true),
            published_from: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            published_to: Some(Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        assert_eq!(
            filter_sql(&filter, None),
            "SELECT COUNT(*) FROM articles WHERE is_deleted = FALSE \
             AND author_id = $1 AND status = $2 AND (title ILIKE $3 OR summary ILIKE $4) \
             AND EXISTS (SELECT 1 FROM article_tags t WHERE t.article_id = articles.id AND t.tag = $5) \
             AND is_top = $6 AND is_recommended = $7 \
             AND published_at >= $8 AND published_at <= $9"
        );
    }
}
