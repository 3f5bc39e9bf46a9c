//! Image library repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};
use uuid::Uuid;
use validator::Validate;

use cms_common::pagination::{PaginatedResult, PaginationParams, SortParams};
use cms_domain::{
    media::{Image, ImageFilter, ImageUpdate, MimeTypeStat, NewImage, StorageStats},
    Audit, ImageId, UserId,
};

use super::query::{self, non_blank, push_keyword, read_audit, AUDIT_COLUMNS};
use crate::{Error, Result};

const SORT_FIELDS: [&str; 3] = ["created_at", "title", "size_bytes"];

const IMAGE_COLUMNS: &str =
    "id, uploader_id, album, title, url, mime_type, width, height, size_bytes, alt_text";

#[derive(Debug, Clone, Default)]
pub struct ImageQuery {
    pub filter: ImageFilter,
    pub pagination: PaginationParams,
    pub sort: SortParams,
}

#[async_trait]
pub trait ImageRepository: Send + Sync {
    async fn create(&self, input: NewImage) -> Result<Image>;

    async fn get_by_id(&self, id: ImageId) -> Result<Image>;

    async fn update(&self, id: ImageId, update: ImageUpdate) -> Result<Image>;

    async fn delete(&self, id: ImageId) -> Result<bool>;

    /// Soft-delete several images; returns how many were live.
    async fn delete_many(&self, ids: &[ImageId]) -> Result<u64>;

    async fn list(&self, query: ImageQuery) -> Result<PaginatedResult<Image>>;

    async fn count(&self, filter: &ImageFilter) -> Result<u64>;

    /// Distinct album names in use, sorted.
    async fn albums(&self) -> Result<Vec<String>>;

    async fn storage_stats(&self) -> Result<StorageStats>;
}

pub struct PgImageRepository {
    pool: PgPool,
}

impl PgImageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_image(row: &PgRow) -> Image {
    Image {
        id: ImageId::from(row.get::<Uuid, _>("id")),
        uploader_id: row.get::<Option<Uuid>, _>("uploader_id").map(UserId::from),
        album: row.get("album"),
        title: row.get("title"),
        url: row.get("url"),
        mime_type: row.get("mime_type"),
        width: row.get("width"),
        height: row.get("height"),
        size_bytes: row.get("size_bytes"),
        alt_text: row.get("alt_text"),
        audit: read_audit(row, ""),
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &ImageFilter) {
    builder.push(" WHERE is_deleted = FALSE");
    if let Some(album) = non_blank(&filter.album) {
        builder.push(" AND album = ");
        builder.push_bind(album.to_string());
    }
    if let Some(uploader_id) = filter.uploader_id {
        builder.push(" AND uploader_id = ");
        builder.push_bind(uploader_id.into_uuid());
    }
    if let Some(mime_type) = non_blank(&filter.mime_type) {
        builder.push(" AND mime_type = ");
        builder.push_bind(mime_type.to_lowercase());
    }
    if let Some(keyword) = non_blank(&filter.keyword) {
        push_keyword(builder, &["title", "alt_text"], keyword);
    }
}

#[async_trait]
impl ImageRepository for PgImageRepository {
    #[instrument(skip(self, input), fields(url = %input.url))]
    async fn create(&self, input: NewImage) -> Result<Image> {
        input.validate()?;

        let id = ImageId::new();
        let now = Utc::now();
        let mime_type = input.mime_type.to_lowercase();

        sqlx::query(
            r#"
            INSERT INTO images (
                id, uploader_id, album, title, url, mime_type, width, height,
                size_bytes, alt_text, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            "#,
        )
        .bind(id.as_uuid())
        .bind(input.uploader_id.map(UserId::into_uuid))
        .bind(&input.album)
        .bind(&input.title)
        .bind(&input.url)
        .bind(&mime_type)
        .bind(input.width)
        .bind(input.height)
        .bind(input.size_bytes)
        .bind(&input.alt_text)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(image_id = %id, bytes = input.size_bytes, "Image stored");
        Ok(Image {
            id,
            uploader_id: input.uploader_id,
            album: input.album,
            title: input.title,
            url: input.url,
            mime_type,
            width: input.width,
            height: input.height,
            size_bytes: input.size_bytes,
            alt_text: input.alt_text,
            audit: Audit::new(now),
        })
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: ImageId) -> Result<Image> {
        let row = sqlx::query(&format!(
            "SELECT {IMAGE_COLUMNS}, {AUDIT_COLUMNS} FROM images WHERE id = $1 AND is_deleted = FALSE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref()
            .map(row_to_image)
            .ok_or_else(|| Error::not_found("image", id))
    }

    #[instrument(skip(self, update))]
    async fn update(&self, id: ImageId, update: ImageUpdate) -> Result<Image> {
        update.validate()?;

        let mut builder = QueryBuilder::<Postgres>::new("UPDATE images SET updated_at = ");
        builder.push_bind(Utc::now());
        if let Some(album) = &update.album {
            builder.push(", album = ");
            builder.push_bind(album.clone());
        }
        if let Some(title) = &update.title {
            builder.push(", title = ");
            builder.push_bind(title.clone());
        }
        if let Some(alt_text) = &update.alt_text {
            builder.push(", alt_text = ");
            builder.push_bind(alt_text.clone());
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id.into_uuid());
        builder.push(format!(
            " AND is_deleted = FALSE RETURNING {IMAGE_COLUMNS}, {AUDIT_COLUMNS}"
        ));

        let row = builder
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref()
            .map(row_to_image)
            .ok_or_else(|| Error::not_found("image", id))
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: ImageId) -> Result<bool> {
        query::soft_delete(&self.pool, "images", id.into_uuid()).await
    }

    #[instrument(skip(self, ids), fields(requested = ids.len()))]
    async fn delete_many(&self, ids: &[ImageId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = ids.iter().map(|id| id.into_uuid()).collect();
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE images SET is_deleted = TRUE, deleted_at = $2, updated_at = $2 \
             WHERE id = ANY($1) AND is_deleted = FALSE",
        )
        .bind(&ids)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(deleted = result.rows_affected(), "Images deleted");
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, query))]
    async fn list(&self, query: ImageQuery) -> Result<PaginatedResult<Image>> {
        let pagination = query.pagination.normalized();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM images");
        push_filter(&mut count, &query.filter);
        let total = query::fetch_count(&self.pool, count).await?;

        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {IMAGE_COLUMNS}, {AUDIT_COLUMNS} FROM images"
        ));
        push_filter(&mut builder, &query.filter);
        query::push_order(&mut builder, &query.sort, &SORT_FIELDS, "created_at");
        query::push_page(&mut builder, &pagination);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let images = rows.iter().map(row_to_image).collect();
        Ok(PaginatedResult::from_params(images, &pagination, total))
    }

    #[instrument(skip(self, filter))]
    async fn count(&self, filter: &ImageFilter) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM images");
        push_filter(&mut builder, filter);
        query::fetch_count(&self.pool, builder).await
    }

    #[instrument(skip(self))]
    async fn albums(&self) -> Result<Vec<String>> {
        let albums: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT album FROM images \
             WHERE is_deleted = FALSE AND album IS NOT NULL AND album <> '' ORDER BY album",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(albums)
    }

    #[instrument(skip(self))]
    async fn storage_stats(&self) -> Result<StorageStats> {
        let rows = sqlx::query(
            r#"
            SELECT mime_type, COUNT(*) AS count, COALESCE(SUM(size_bytes), 0)::BIGINT AS total_bytes
            FROM images
            WHERE is_deleted = FALSE
            GROUP BY mime_type
            ORDER BY total_bytes DESC, mime_type
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let breakdown = rows
            .iter()
            .map(|row| MimeTypeStat {
                mime_type: row.get("mime_type"),
                count: row.get::<i64, _>("count") as u64,
                total_bytes: row.get("total_bytes"),
            })
            .collect();

        Ok(StorageStats::from_breakdown(breakdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_sql() {
        let filter = ImageFilter {
            album: Some("campus".to_string()),
            uploader_id: Some(UserId::new()),
            mime_type: Some("IMAGE/PNG".to_string()),
            keyword: Some("gate".to_string()),
        };
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM images");
        push_filter(&mut builder, &filter);
        assert_eq!(
            builder.sql(),
            "SELECT COUNT(*) FROM images WHERE is_deleted = FALSE AND album = $1 \
             AND uploader_id = $2 AND mime_type = $3 AND (title ILIKE $4 OR alt_text ILIKE $5)"
        );
    }

    #[test]
    fn test_unknown_sort_falls_back() {
        let sort = SortParams::asc("url");
        assert_eq!(query::order_column(&sort, &SORT_FIELDS, "created_at"), "created_at");
    }
}
