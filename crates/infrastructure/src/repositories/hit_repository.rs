//! Hit log repository.
//!
//! The hit log is append-only: rows are inserted, aggregated and eventually
//! purged, never updated or soft-deleted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info, instrument};
use uuid::Uuid;
use validator::Validate;

use cms_common::pagination::{DateRange, PaginationParams};
use cms_domain::{
    hit::{HitTarget, NewHit, TargetCount, TargetKind},
    DailyCount, HitId, UserId,
};

use super::query::{self, parse_enum};
use crate::{Error, Result};

#[async_trait]
pub trait HitRepository: Send + Sync {
    async fn record(&self, hit: NewHit) -> Result<HitId>;

    async fn count_for(&self, target: HitTarget) -> Result<u64>;

    /// Distinct visitors by IP, falling back to the user id.
    async fn unique_visitors(&self, target: HitTarget) -> Result<u64>;

    /// Hits per day for one kind, optionally narrowed to one target.
    async fn daily_counts(
        &self,
        kind: TargetKind,
        target_id: Option<Uuid>,
        range: DateRange,
    ) -> Result<Vec<DailyCount>>;

    /// Most visited targets of `kind`, busiest first.
    async fn top_targets(&self, kind: TargetKind, range: DateRange, limit: u32) -> Result<Vec<TargetCount>>;

    /// Delete hits recorded before `cutoff`.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

pub struct PgHitRepository {
    pool: PgPool,
}

impl PgHitRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// ` WHERE target_kind = $n [AND target_id = $n+1] [AND created_at ...]`
fn push_scope(
    builder: &mut QueryBuilder<'_, Postgres>,
    kind: TargetKind,
    target_id: Option<Uuid>,
    range: &DateRange,
) {
    builder.push(" WHERE target_kind = ");
    builder.push_bind(kind.as_str());
    if let Some(id) = target_id {
        builder.push(" AND target_id = ");
        builder.push_bind(id);
    }
    query::push_date_range(builder, "created_at", range);
}

#[async_trait]
impl HitRepository for PgHitRepository {
    #[instrument(skip(self, hit), fields(kind = %hit.target.kind, target = %hit.target.id))]
    async fn record(&self, hit: NewHit) -> Result<HitId> {
        hit.validate()?;

        let id = HitId::new();
        sqlx::query(
            r#"
            INSERT INTO hits (id, target_kind, target_id, user_id, ip, user_agent, referer, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id.as_uuid())
        .bind(hit.target.kind.as_str())
        .bind(hit.target.id)
        .bind(hit.user_id.map(UserId::into_uuid))
        .bind(&hit.ip)
        .bind(&hit.user_agent)
        .bind(&hit.referer)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(hit_id = %id, "Hit recorded");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn count_for(&self, target: HitTarget) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM hits");
        push_scope(&mut builder, target.kind, Some(target.id), &DateRange::default());
        query::fetch_count(&self.pool, builder).await
    }

    #[instrument(skip(self))]
    async fn unique_visitors(&self, target: HitTarget) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(DISTINCT COALESCE(ip, user_id::TEXT)) FROM hits",
        );
        push_scope(&mut builder, target.kind, Some(target.id), &DateRange::default());
        query::fetch_count(&self.pool, builder).await
    }

    #[instrument(skip(self))]
    async fn daily_counts(
        &self,
        kind: TargetKind,
        target_id: Option<Uuid>,
        range: DateRange,
    ) -> Result<Vec<DailyCount>> {
        range.validate().map_err(Error::Validation)?;

        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT (created_at AT TIME ZONE 'UTC')::DATE AS day, COUNT(*) AS count FROM hits",
        );
        push_scope(&mut builder, kind, target_id, &range);
        builder.push(" GROUP BY day ORDER BY day");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(query::daily_counts(&rows, &range))
    }

    #[instrument(skip(self))]
    async fn top_targets(&self, kind: TargetKind, range: DateRange, limit: u32) -> Result<Vec<TargetCount>> {
        range.validate().map_err(Error::Validation)?;
        let limit = limit.clamp(1, PaginationParams::MAX_PAGE_SIZE);

        let mut builder =
            QueryBuilder::<Postgres>::new("SELECT target_kind, target_id, COUNT(*) AS count FROM hits");
        push_scope(&mut builder, kind, None, &range);
        builder.push(" GROUP BY target_kind, target_id ORDER BY count DESC, target_id LIMIT ");
        builder.push_bind(i64::from(limit));

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        rows.iter()
            .map(|row| {
                Ok(TargetCount {
                    target: HitTarget::new(
                        parse_enum(row.get::<String, _>("target_kind").as_str())?,
                        row.get("target_id"),
                    ),
                    count: row.get::<i64, _>("count") as u64,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM hits WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        info!(%cutoff, purged = result.rows_affected(), "Purged hit log");
        Ok(result.rows_affected())
    }
}
