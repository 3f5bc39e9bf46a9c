//! Category repository.
//!
//! Categories form a tree through `parent_id`. Traversals load every live
//! category in one query and walk the parent pointers in memory.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;
use validator::Validate;

use cms_common::pagination::{PaginatedResult, PaginationParams, SortParams};
use cms_domain::{
    category::{self, Category, CategoryFilter, CategoryNode, CategoryUpdate, NewCategory, ParentFilter},
    Audit, CategoryId,
};

use super::query::{self, non_blank, push_keyword, read_audit, AUDIT_COLUMNS};
use crate::database::TransactionExt;
use crate::{Error, Result};

const SORT_FIELDS: [&str; 4] = ["sort_order", "name", "slug", "created_at"];

/// Query parameters for category listings.
#[derive(Debug, Clone, Default)]
pub struct CategoryQuery {
    pub filter: CategoryFilter,
    pub pagination: PaginationParams,
    pub sort: SortParams,
}

#[async_trait]
pub trait CategoryRepository: Send + Sync {
    /// Create a category; the parent must be live.
    async fn create(&self, input: NewCategory) -> Result<Category>;

    async fn get_by_id(&self, id: CategoryId) -> Result<Category>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Category>>;

    /// Apply a partial update; re-parenting under a descendant is rejected.
    async fn update(&self, id: CategoryId, update: CategoryUpdate) -> Result<Category>;

    /// Soft delete. Fails with `Conflict` while live children exist.
    async fn delete(&self, id: CategoryId) -> Result<bool>;

    async fn list(&self, query: CategoryQuery) -> Result<PaginatedResult<Category>>;

    async fn count(&self, filter: &CategoryFilter) -> Result<u64>;

    /// Direct children ordered by `sort_order, name`.
    async fn children(&self, id: CategoryId) -> Result<Vec<Category>>;

    /// Root-first chain of ancestors, excluding the category itself.
    async fn ancestors(&self, id: CategoryId) -> Result<Vec<Category>>;

    /// The category and all of its transitive children.
    async fn descendant_ids(&self, id: CategoryId) -> Result<Vec<CategoryId>>;

    /// Every live category arranged as a forest.
    async fn tree(&self) -> Result<Vec<CategoryNode>>;
}

pub struct PgCategoryRepository {
    pool: PgPool,
}

impl PgCategoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// `NotFound` unless the category exists and is live.
pub(crate) async fn ensure_live_category(pool: &PgPool, id: CategoryId) -> Result<()> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM categories WHERE id = $1 AND is_deleted = FALSE)",
    )
    .bind(id.as_uuid())
    .fetch_one(pool)
    .await
    .map_err(Error::Database)?;

    if exists {
        Ok(())
    } else {
        Err(Error::not_found("category", id))
    }
}

/// Row lock on a live category; `false` when it is missing or deleted.
///
/// Deletion takes `FOR UPDATE` and attaching a child takes `FOR SHARE`, so a
/// child can never be attached to a category that is being deleted.
async fn lock_live_category(tx: &mut Transaction<'_, Postgres>, id: CategoryId, exclusive: bool) -> Result<bool> {
    let mode = if exclusive { "FOR UPDATE" } else { "FOR SHARE" };
    let row = sqlx::query(&format!(
        "SELECT id FROM categories WHERE id = $1 AND is_deleted = FALSE {mode}"
    ))
    .bind(id.as_uuid())
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.is_some())
}

fn select_sql() -> String {
    format!("SELECT id, parent_id, name, slug, sort_order, {AUDIT_COLUMNS} FROM categories")
}

pub(crate) fn row_to_category(row: &PgRow) -> Category {
    Category {
        id: CategoryId::from(row.get::<Uuid, _>("id")),
        parent_id: row.get::<Option<Uuid>, _>("parent_id").map(CategoryId::from),
        name: row.get("name"),
        slug: row.get("slug"),
        sort_order: row.get("sort_order"),
        audit: read_audit(row, ""),
    }
}

/// Every live category, ordered for stable tree building.
pub(crate) async fn load_live_categories(pool: &PgPool) -> Result<Vec<Category>> {
    let rows = sqlx::query(&format!(
        "{} WHERE is_deleted = FALSE ORDER BY sort_order, name",
        select_sql()
    ))
    .fetch_all(pool)
    .await
    .map_err(Error::Database)?;

    Ok(rows.iter().map(row_to_category).collect())
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &CategoryFilter) {
    builder.push(" WHERE is_deleted = FALSE");
    match filter.parent {
        ParentFilter::Any => {}
        ParentFilter::Root => {
            builder.push(" AND parent_id IS NULL");
        }
        ParentFilter::Of(parent) => {
            builder.push(" AND parent_id = ");
            builder.push_bind(parent.into_uuid());
        }
    }
    if let Some(keyword) = non_blank(&filter.keyword) {
        push_keyword(builder, &["name", "slug"], keyword);
    }
}

fn slug_conflict(slug: &str) -> impl FnOnce() -> String + '_ {
    move || format!("category slug '{}' already exists", slug)
}

#[async_trait]
impl CategoryRepository for PgCategoryRepository {
    #[instrument(skip(self, input), fields(slug = %input.slug))]
    async fn create(&self, input: NewCategory) -> Result<Category> {
        input.validate()?;

        let id = CategoryId::new();
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let result: Result<()> = async {
            if let Some(parent) = input.parent_id {
                if !lock_live_category(&mut tx, parent, false).await? {
                    return Err(Error::not_found("category", parent));
                }
            }

            sqlx::query(
                r#"
                INSERT INTO categories (id, parent_id, name, slug, sort_order, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $6)
                "#,
            )
            .bind(id.as_uuid())
            .bind(input.parent_id.map(CategoryId::into_uuid))
            .bind(&input.name)
            .bind(&input.slug)
            .bind(input.sort_order)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::from_write(e, slug_conflict(&input.slug)))?;
            Ok(())
        }
        .await;
        tx.commit_or_rollback(result).await?;

        debug!(category_id = %id, "Category created");
        Ok(Category {
            id,
            parent_id: input.parent_id,
            name: input.name,
            slug: input.slug,
            sort_order: input.sort_order,
            audit: Audit::new(now),
        })
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: CategoryId) -> Result<Category> {
        let row = sqlx::query(&format!("{} WHERE id = $1 AND is_deleted = FALSE", select_sql()))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref()
            .map(row_to_category)
            .ok_or_else(|| Error::not_found("category", id))
    }

    #[instrument(skip(self))]
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Category>> {
        let row = sqlx::query(&format!("{} WHERE slug = $1 AND is_deleted = FALSE", select_sql()))
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.as_ref().map(row_to_category))
    }

    #[instrument(skip(self, update))]
    async fn update(&self, id: CategoryId, update: CategoryUpdate) -> Result<Category> {
        update.validate()?;

        if let Some(new_parent) = update.parent_id {
            let all = load_live_categories(&self.pool).await?;
            if !all.iter().any(|c| c.id == id) {
                return Err(Error::not_found("category", id));
            }
            if let Some(parent) = new_parent {
                if parent != id && !all.iter().any(|c| c.id == parent) {
                    return Err(Error::not_found("category", parent));
                }
            }
            if category::would_create_cycle(&all, id, new_parent) {
                return Err(cms_domain::DomainError::CategoryCycle(id).into());
            }
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let result: Result<Category> = async {
            if let Some(Some(parent)) = update.parent_id {
                if !lock_live_category(&mut tx, parent, false).await? {
                    return Err(Error::not_found("category", parent));
                }
            }

            let mut builder = QueryBuilder::<Postgres>::new("UPDATE categories SET updated_at = ");
            builder.push_bind(Utc::now());
            if let Some(name) = &update.name {
                builder.push(", name = ");
                builder.push_bind(name.clone());
            }
            if let Some(slug) = &update.slug {
                builder.push(", slug = ");
                builder.push_bind(slug.clone());
            }
            if let Some(sort_order) = update.sort_order {
                builder.push(", sort_order = ");
                builder.push_bind(sort_order);
            }
            if let Some(parent) = update.parent_id {
                builder.push(", parent_id = ");
                builder.push_bind(parent.map(CategoryId::into_uuid));
            }
            builder.push(" WHERE id = ");
            builder.push_bind(id.into_uuid());
            builder.push(format!(
                " AND is_deleted = FALSE RETURNING id, parent_id, name, slug, sort_order, {AUDIT_COLUMNS}"
            ));

            let slug = update.slug.clone().unwrap_or_default();
            let row = builder
                .build()
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| Error::from_write(e, slug_conflict(&slug)))?;

            row.as_ref()
                .map(row_to_category)
                .ok_or_else(|| Error::not_found("category", id))
        }
        .await;
        let category = tx.commit_or_rollback(result).await?;

        debug!(category_id = %id, "Category updated");
        Ok(category)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: CategoryId) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let result: Result<bool> = async {
            if !lock_live_category(&mut tx, id, true).await? {
                return Ok(false);
            }

            let has_children: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM categories WHERE parent_id = $1 AND is_deleted = FALSE)",
            )
            .bind(id.as_uuid())
            .fetch_one(&mut *tx)
            .await?;
            if has_children {
                return Err(Error::Conflict(format!("category {} still has children", id)));
            }

            let now = Utc::now();
            sqlx::query(
                "UPDATE categories SET is_deleted = TRUE, deleted_at = $2, updated_at = $2 WHERE id = $1",
            )
            .bind(id.as_uuid())
            .bind(now)
            .execute(&mut *tx)
            .await?;
            Ok(true)
        }
        .await;
        let deleted = tx.commit_or_rollback(result).await?;

        if deleted {
            debug!(category_id = %id, "Category deleted");
        }
        Ok(deleted)
    }

    #[instrument(skip(self, query))]
    async fn list(&self, query: CategoryQuery) -> Result<PaginatedResult<Category>> {
        let pagination = query.pagination.normalized();
        let total = self.count(&query.filter).await?;

        let mut builder = QueryBuilder::<Postgres>::new(select_sql());
        push_filter(&mut builder, &query.filter);
        query::push_order(&mut builder, &query.sort, &SORT_FIELDS, "sort_order");
        query::push_page(&mut builder, &pagination);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(PaginatedResult::from_params(
            rows.iter().map(row_to_category).collect(),
            &pagination,
            total,
        ))
    }

    #[instrument(skip(self, filter))]
    async fn count(&self, filter: &CategoryFilter) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM categories");
        push_filter(&mut builder, filter);
        query::fetch_count(&self.pool, builder).await
    }

    #[instrument(skip(self))]
    async fn children(&self, id: CategoryId) -> Result<Vec<Category>> {
        let rows = sqlx::query(&format!(
            "{} WHERE parent_id = $1 AND is_deleted = FALSE ORDER BY sort_order, name",
            select_sql()
        ))
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(row_to_category).collect())
    }

    #[instrument(skip(self))]
    async fn ancestors(&self, id: CategoryId) -> Result<Vec<Category>> {
        let all = load_live_categories(&self.pool).await?;
        if !all.iter().any(|c| c.id == id) {
            return Err(Error::not_found("category", id));
        }
        Ok(category::ancestors(&all, id))
    }

    #[instrument(skip(self))]
    async fn descendant_ids(&self, id: CategoryId) -> Result<Vec<CategoryId>> {
        let all = load_live_categories(&self.pool).await?;
        if !all.iter().any(|c| c.id == id) {
            return Err(Error::not_found("category", id));
        }
        Ok(category::descendant_ids(&all, id))
    }

    #[instrument(skip(self))]
    async fn tree(&self) -> Result<Vec<CategoryNode>> {
        let all = load_live_categories(&self.pool).await?;
        Ok(category::build_tree(&all))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_sql(filter: &CategoryFilter) -> String {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM categories");
        push_filter(&mut builder, filter);
        builder.sql().to_string()
    }

    #[test]
    fn test_filter_any_parent() {
        assert_eq!(
            filter_sql(&CategoryFilter::default()),
            "SELECT COUNT(*) FROM categories WHERE is_deleted = FALSE"
        );
    }

    #[test]
    fn test_filter_root_and_keyword() {
        let filter = CategoryFilter {
            parent: ParentFilter::Root,
            keyword: Some("sport".to_string()),
        };
        assert_eq!(
            filter_sql(&filter),
            "SELECT COUNT(*) FROM categories WHERE is_deleted = FALSE AND parent_id IS NULL \
             AND (name ILIKE $1 OR slug ILIKE $2)"
        );
    }

    #[test]
    fn test_filter_children_of() {
        let filter = CategoryFilter {
            parent: ParentFilter::Of(CategoryId::new()),
            keyword: Some("   ".to_string()),
        };
        assert!(filter_sql(&filter).ends_with("AND parent_id = $1"));
    }
}
