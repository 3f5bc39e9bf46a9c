//! WeChat QR code repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};
use uuid::Uuid;
use validator::Validate;

use cms_common::pagination::{PaginatedResult, PaginationParams, SortParams};
use cms_domain::{
    wechat::{NewQrCode, QrCode, QrCodeFilter, QrCodeKind},
    Audit, EventId, QrCodeId,
};

use super::query::{self, parse_enum, read_audit, AUDIT_COLUMNS};
use crate::{Error, Result};

const SORT_FIELDS: [&str; 3] = ["created_at", "scan_count", "expires_at"];

const QR_COLUMNS: &str =
    "id, scene, kind, ticket, url, event_id, expires_at, scan_count, last_scanned_at";

#[derive(Debug, Clone, Default)]
pub struct QrCodeQuery {
    pub filter: QrCodeFilter,
    pub pagination: PaginationParams,
    pub sort: SortParams,
}

#[async_trait]
pub trait QrCodeRepository: Send + Sync {
    async fn create(&self, input: NewQrCode) -> Result<QrCode>;

    async fn get_by_id(&self, id: QrCodeId) -> Result<QrCode>;

    async fn find_by_scene(&self, scene: &str) -> Result<Option<QrCode>>;

    async fn find_by_ticket(&self, ticket: &str) -> Result<Option<QrCode>>;

    /// Count a scan. Expired temporary codes are rejected.
    async fn record_scan(&self, id: QrCodeId) -> Result<QrCode>;

    async fn delete(&self, id: QrCodeId) -> Result<bool>;

    async fn list(&self, query: QrCodeQuery) -> Result<PaginatedResult<QrCode>>;

    async fn count(&self, filter: &QrCodeFilter) -> Result<u64>;
}

pub struct PgQrCodeRepository {
    pool: PgPool,
}

impl PgQrCodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, column: &'static str, value: &str) -> Result<Option<QrCode>> {
        let row = sqlx::query(&format!(
            "SELECT {QR_COLUMNS}, {AUDIT_COLUMNS} FROM qr_codes \
             WHERE {column} = $1 AND is_deleted = FALSE LIMIT 1"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(row_to_qr_code).transpose()
    }
}

fn row_to_qr_code(row: &PgRow) -> Result<QrCode> {
    Ok(QrCode {
        id: QrCodeId::from(row.get::<Uuid, _>("id")),
        scene: row.get("scene"),
        kind: parse_enum(row.get::<String, _>("kind").as_str())?,
        ticket: row.get("ticket"),
        url: row.get("url"),
        event_id: row.get::<Option<Uuid>, _>("event_id").map(EventId::from),
        expires_at: row.get("expires_at"),
        scan_count: row.get("scan_count"),
        last_scanned_at: row.get("last_scanned_at"),
        audit: read_audit(row, ""),
    })
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &QrCodeFilter) {
    builder.push(" WHERE is_deleted = FALSE");
    if let Some(kind) = filter.kind {
        builder.push(" AND kind = ");
        builder.push_bind(kind.as_str());
    }
    if let Some(event_id) = filter.event_id {
        builder.push(" AND event_id = ");
        builder.push_bind(event_id.into_uuid());
    }
    if let Some(at) = filter.active_at {
        builder.push(" AND (kind = ");
        builder.push_bind(QrCodeKind::Permanent.as_str());
        builder.push(" OR expires_at IS NULL OR expires_at > ");
        builder.push_bind(at);
        builder.push(")");
    }
}

#[async_trait]
impl QrCodeRepository for PgQrCodeRepository {
    #[instrument(skip(self, input), fields(scene = %input.scene, kind = %input.kind))]
    async fn create(&self, input: NewQrCode) -> Result<QrCode> {
        input.validate()?;
        input.check_expiry()?;

        let id = QrCodeId::new();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO qr_codes (
                id, scene, kind, ticket, url, event_id, expires_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            "#,
        )
        .bind(id.as_uuid())
        .bind(&input.scene)
        .bind(input.kind.as_str())
        .bind(&input.ticket)
        .bind(&input.url)
        .bind(input.event_id.map(EventId::into_uuid))
        .bind(input.expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::from_write(e, || format!("QR scene '{}' already in use", input.scene)))?;

        debug!(qr_code_id = %id, "QR code created");
        Ok(QrCode {
            id,
            scene: input.scene,
            kind: input.kind,
            ticket: input.ticket,
            url: input.url,
            event_id: input.event_id,
            expires_at: input.expires_at,
            scan_count: 0,
            last_scanned_at: None,
            audit: Audit::new(now),
        })
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: QrCodeId) -> Result<QrCode> {
        let row = sqlx::query(&format!(
            "SELECT {QR_COLUMNS}, {AUDIT_COLUMNS} FROM qr_codes WHERE id = $1 AND is_deleted = FALSE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => row_to_qr_code(&row),
            None => Err(Error::not_found("qr code", id)),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_scene(&self, scene: &str) -> Result<Option<QrCode>> {
        self.find_one("scene", scene).await
    }

    #[instrument(skip(self))]
    async fn find_by_ticket(&self, ticket: &str) -> Result<Option<QrCode>> {
        self.find_one("ticket", ticket).await
    }

    #[instrument(skip(self))]
    async fn record_scan(&self, id: QrCodeId) -> Result<QrCode> {
        let code = self.get_by_id(id).await?;
        let now = Utc::now();
        if code.is_expired_at(now) {
            return Err(Error::Validation(format!("QR code {} has expired", id)));
        }

        let row = sqlx::query(&format!(
            "UPDATE qr_codes SET scan_count = scan_count + 1, last_scanned_at = $2, updated_at = $2 \
             WHERE id = $1 AND is_deleted = FALSE RETURNING {QR_COLUMNS}, {AUDIT_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => {
                let code = row_to_qr_code(&row)?;
                debug!(qr_code_id = %id, scans = code.scan_count, "QR code scanned");
                Ok(code)
            }
            None => Err(Error::not_found("qr code", id)),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: QrCodeId) -> Result<bool> {
        query::soft_delete(&self.pool, "qr_codes", id.into_uuid()).await
    }

    #[instrument(skip(self, query))]
    async fn list(&self, query: QrCodeQuery) -> Result<PaginatedResult<QrCode>> {
        let pagination = query.pagination.normalized();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM qr_codes");
        push_filter(&mut count, &query.filter);
        let total = query::fetch_count(&self.pool, count).await?;

        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {QR_COLUMNS}, {AUDIT_COLUMNS} FROM qr_codes"
        ));
        push_filter(&mut builder, &query.filter);
        query::push_order(&mut builder, &query.sort, &SORT_FIELDS, "created_at");
        query::push_page(&mut builder, &pagination);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let codes = rows.iter().map(row_to_qr_code).collect::<Result<Vec<_>>>()?;
        Ok(PaginatedResult::from_params(codes, &pagination, total))
    }

    #[instrument(skip(self, filter))]
    async fn count(&self, filter: &QrCodeFilter) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM qr_codes");
        push_filter(&mut builder, filter);
        query::fetch_count(&self.pool, builder).await
    }
}
