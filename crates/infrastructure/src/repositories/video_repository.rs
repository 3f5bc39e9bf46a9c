//! Video repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};
use uuid::Uuid;
use validator::Validate;

use cms_common::pagination::{PaginatedResult, PaginationParams, SortParams};
use cms_domain::{
    media::{NewVideo, Video, VideoFilter, VideoStatus, VideoUpdate},
    Audit, CategoryId, StatusCount, UserId, VideoId,
};

use super::category_repository::ensure_live_category;
use super::query::{self, non_blank, parse_enum, push_keyword, read_audit, AUDIT_COLUMNS};
use crate::{Error, Result};

const SORT_FIELDS: [&str; 4] = ["created_at", "play_count", "duration_seconds", "title"];

const VIDEO_COLUMNS: &str = "id, category_id, uploader_id, title, description, url, cover_url, \
     duration_seconds, status, is_recommended, play_count";

#[derive(Debug, Clone, Default)]
pub struct VideoQuery {
    pub filter: VideoFilter,
    pub pagination: PaginationParams,
    pub sort: SortParams,
}

#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn create(&self, input: NewVideo) -> Result<Video>;

    async fn get_by_id(&self, id: VideoId) -> Result<Video>;

    async fn update(&self, id: VideoId, update: VideoUpdate) -> Result<Video>;

    async fn delete(&self, id: VideoId) -> Result<bool>;

    async fn list(&self, query: VideoQuery) -> Result<PaginatedResult<Video>>;

    async fn count(&self, filter: &VideoFilter) -> Result<u64>;

    async fn set_status(&self, id: VideoId, status: VideoStatus) -> Result<()>;

    async fn set_recommended(&self, id: VideoId, recommended: bool) -> Result<()>;

    async fn increment_play_count(&self, id: VideoId) -> Result<i64>;

    async fn count_by_status(&self) -> Result<Vec<StatusCount<VideoStatus>>>;

    /// Total running time of playable videos.
    async fn total_duration_seconds(&self) -> Result<i64>;
}

pub struct PgVideoRepository {
    pool: PgPool,
}

impl PgVideoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn set_column<T>(&self, id: VideoId, column: &'static str, value: T) -> Result<()>
    where
        T: for<'q> sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres> + Send + 'static,
    {
        let result = sqlx::query(&format!(
            "UPDATE videos SET {column} = $2, updated_at = $3 WHERE id = $1 AND is_deleted = FALSE"
        ))
        .bind(id.as_uuid())
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("video", id));
        }
        debug!(video_id = %id, column, "Video updated");
        Ok(())
    }
}

fn row_to_video(row: &PgRow) -> Result<Video> {
    Ok(Video {
        id: VideoId::from(row.get::<Uuid, _>("id")),
        category_id: row.get::<Option<Uuid>, _>("category_id").map(CategoryId::from),
        uploader_id: row.get::<Option<Uuid>, _>("uploader_id").map(UserId::from),
        title: row.get("title"),
        description: row.get("description"),
        url: row.get("url"),
        cover_url: row.get("cover_url"),
        duration_seconds: row.get("duration_seconds"),
        status: parse_enum(row.get::<String, _>("status").as_str())?,
        is_recommended: row.get("is_recommended"),
        play_count: row.get("play_count"),
        audit: read_audit(row, ""),
    })
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &VideoFilter) {
    builder.push(" WHERE is_deleted = FALSE");
    if let Some(category_id) = filter.category_id {
        builder.push(" AND category_id = ");
        builder.push_bind(category_id.into_uuid());
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ");
        builder.push_bind(status.as_str());
    }
    if let Some(is_recommended) = filter.is_recommended {
        builder.push(" AND is_recommended = ");
        builder.push_bind(is_recommended);
    }
    if let Some(keyword) = non_blank(&filter.keyword) {
        push_keyword(builder, &["title", "description"], keyword);
    }
    if let Some(min) = filter.min_duration {
        builder.push(" AND duration_seconds >= ");
        builder.push_bind(min);
    }
    if let Some(max) = filter.max_duration {
        builder.push(" AND duration_seconds <= ");
        builder.push_bind(max);
    }
}

#[async_trait]
impl VideoRepository for PgVideoRepository {
    #[instrument(skip(self, input), fields(title = %input.title))]
    async fn create(&self, input: NewVideo) -> Result<Video> {
        input.validate()?;
        if let Some(category_id) = input.category_id {
            ensure_live_category(&self.pool, category_id).await?;
        }

        let id = VideoId::new();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO videos (
                id, category_id, uploader_id, title, description, url, cover_url,
                duration_seconds, status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            "#,
        )
        .bind(id.as_uuid())
        .bind(input.category_id.map(CategoryId::into_uuid))
        .bind(input.uploader_id.map(UserId::into_uuid))
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.url)
        .bind(&input.cover_url)
        .bind(input.duration_seconds)
        .bind(input.status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(video_id = %id, "Video created");
        Ok(Video {
            id,
            category_id: input.category_id,
            uploader_id: input.uploader_id,
            title: input.title,
            description: input.description,
            url: input.url,
            cover_url: input.cover_url,
            duration_seconds: input.duration_seconds,
            status: input.status,
            is_recommended: false,
            play_count: 0,
            audit: Audit::new(now),
        })
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: VideoId) -> Result<Video> {
        let row = sqlx::query(&format!(
            "SELECT {VIDEO_COLUMNS}, {AUDIT_COLUMNS} FROM videos WHERE id = $1 AND is_deleted = FALSE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => row_to_video(&row),
            None => Err(Error::not_found("video", id)),
        }
    }

    #[instrument(skip(self, update))]
    async fn update(&self, id: VideoId, update: VideoUpdate) -> Result<Video> {
        update.validate()?;
        if let Some(Some(category_id)) = update.category_id {
            ensure_live_category(&self.pool, category_id).await?;
        }

        let mut builder = QueryBuilder::<Postgres>::new("UPDATE videos SET updated_at = ");
        builder.push_bind(Utc::now());
        if let Some(category_id) = update.category_id {
            builder.push(", category_id = ");
            builder.push_bind(category_id.map(CategoryId::into_uuid));
        }
        if let Some(title) = &update.title {
            builder.push(", title = ");
            builder.push_bind(title.clone());
        }
        if let Some(description) = &update.description {
            builder.push(", description = ");
            builder.push_bind(description.clone());
        }
        if let Some(cover_url) = &update.cover_url {
            builder.push(", cover_url = ");
            builder.push_bind(cover_url.clone());
        }
        if let Some(duration) = update.duration_seconds {
            builder.push(", duration_seconds = ");
            builder.push_bind(duration);
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id.into_uuid());
        builder.push(format!(
            " AND is_deleted = FALSE RETURNING {VIDEO_COLUMNS}, {AUDIT_COLUMNS}"
        ));

        let row = builder
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(row) => row_to_video(&row),
            None => Err(Error::not_found("video", id)),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: VideoId) -> Result<bool> {
        query::soft_delete(&self.pool, "videos", id.into_uuid()).await
    }

    #[instrument(skip(self, query))]
    async fn list(&self, query: VideoQuery) -> Result<PaginatedResult<Video>> {
        let pagination = query.pagination.normalized();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM videos");
        push_filter(&mut count, &query.filter);
        let total = query::fetch_count(&self.pool, count).await?;

        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {VIDEO_COLUMNS}, {AUDIT_COLUMNS} FROM videos"
        ));
        push_filter(&mut builder, &query.filter);
        query::push_order(&mut builder, &query.sort, &SORT_FIELDS, "created_at");
        query::push_page(&mut builder, &pagination);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let videos = rows.iter().map(row_to_video).collect::<Result<Vec<_>>>()?;
        Ok(PaginatedResult::from_params(videos, &pagination, total))
    }

    #[instrument(skip(self, filter))]
    async fn count(&self, filter: &VideoFilter) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM videos");
        push_filter(&mut builder, filter);
        query::fetch_count(&self.pool, builder).await
    }

    #[instrument(skip(self))]
    async fn set_status(&self, id: VideoId, status: VideoStatus) -> Result<()> {
        self.set_column(id, "status", status.as_str()).await
    }

    #[instrument(skip(self))]
    async fn set_recommended(&self, id: VideoId, recommended: bool) -> Result<()> {
        self.set_column(id, "is_recommended", recommended).await
    }

    #[instrument(skip(self))]
    async fn increment_play_count(&self, id: VideoId) -> Result<i64> {
        query::increment_counter(&self.pool, "videos", "play_count", "video", id.into_uuid()).await
    }

    #[instrument(skip(self))]
    async fn count_by_status(&self) -> Result<Vec<StatusCount<VideoStatus>>> {
        query::grouped_status_counts(
            &self.pool,
            "SELECT status, COUNT(*) AS count FROM videos \
             WHERE is_deleted = FALSE GROUP BY status ORDER BY status",
        )
        .await
    }

    #[instrument(skip(self))]
    async fn total_duration_seconds(&self) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(duration_seconds), 0)::BIGINT FROM videos \
             WHERE is_deleted = FALSE AND status = $1",
        )
        .bind(VideoStatus::Ready.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_bounds() {
        let filter = VideoFilter {
            status: Some(VideoStatus::Ready),
            min_duration: Some(60),
            max_duration: Some(600),
            ..Default::default()
        };
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM videos");
        push_filter(&mut builder, &filter);
        assert_eq!(
            builder.sql(),
            "SELECT COUNT(*) FROM videos WHERE is_deleted = FALSE AND status = $1 \
             AND duration_seconds >= $2 AND duration_seconds <= $3"
        );
    }

    #[test]
    fn test_sort_whitelist() {
        let sort = SortParams::desc("play_count");
        assert_eq!(query::order_column(&sort, &SORT_FIELDS, "created_at"), "play_count");
    }
}
