//! Event and registration repository.
//!
//! `registered_count` is never stored; it is counted from
//! `event_registrations` rows that still hold a seat. Registration locks the
//! event row so that two concurrent sign-ups cannot both take the last seat.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use cms_common::pagination::{PaginatedResult, PaginationParams, SortParams};
use cms_domain::{
    event::{
        check_schedule, Event, EventFilter, EventUpdate, NewEvent, Registration, RegistrationStatus,
    },
    Audit, EventId, RegistrationId, StatusCount, UserId,
};

use super::query::{self, non_blank, parse_enum, push_keyword, read_audit, AUDIT_COLUMNS};
use crate::database::TransactionExt;
use crate::{Error, Result};

const SORT_FIELDS: [&str; 3] = ["starts_at", "created_at", "title"];

const EVENT_COLUMNS: &str = "id, title, description, location, cover_url, starts_at, ends_at, \
     registration_deadline, capacity, status, is_featured";

/// Seats held for `events.id`; used as a correlated subquery.
const REGISTERED_COUNT: &str = "(SELECT COUNT(*) FROM event_registrations r \
     WHERE r.event_id = events.id AND r.status <> 'cancelled') AS registered_count";

const REGISTRATION_COLUMNS: &str =
    "id, event_id, user_id, status, registered_at, checked_in_at, cancelled_at";

#[derive(Debug, Clone)]
pub struct EventQuery {
    pub filter: EventFilter,
    pub pagination: PaginationParams,
    pub sort: SortParams,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            filter: EventFilter::default(),
            pagination: PaginationParams::default(),
            sort: SortParams::asc("starts_at"),
        }
    }
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn create(&self, input: NewEvent) -> Result<Event>;

    async fn get_by_id(&self, id: EventId) -> Result<Event>;

    async fn update(&self, id: EventId, update: EventUpdate) -> Result<Event>;

    async fn delete(&self, id: EventId) -> Result<bool>;

    async fn list(&self, query: EventQuery) -> Result<PaginatedResult<Event>>;

    async fn count(&self, filter: &EventFilter) -> Result<u64>;

    /// Make `id` the only featured event.
    async fn set_featured(&self, id: EventId) -> Result<()>;

    async fn get_featured(&self) -> Result<Option<Event>>;

    /// Sign a user up. A previously cancelled registration is re-activated.
    async fn register(&self, event_id: EventId, user_id: UserId) -> Result<Registration>;

    /// Returns false when there was no active registration to cancel.
    async fn cancel_registration(&self, event_id: EventId, user_id: UserId) -> Result<bool>;

    async fn check_in(&self, event_id: EventId, user_id: UserId) -> Result<Registration>;

    async fn list_registrations(
        &self,
        event_id: EventId,
        pagination: PaginationParams,
    ) -> Result<PaginatedResult<Registration>>;

    async fn registration_stats(&self, event_id: EventId) -> Result<Vec<StatusCount<RegistrationStatus>>>;
}

pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_registration(&self, event_id: EventId, user_id: UserId) -> Result<Option<Registration>> {
        let row = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM event_registrations WHERE event_id = $1 AND user_id = $2"
        ))
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(row_to_registration).transpose()
    }
}

fn row_to_event(row: &PgRow) -> Result<Event> {
    Ok(Event {
        id: EventId::from(row.get::<Uuid, _>("id")),
        title: row.get("title"),
        description: row.get("description"),
        location: row.get("location"),
        cover_url: row.get("cover_url"),
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
        registration_deadline: row.get("registration_deadline"),
        capacity: row.get("capacity"),
        status: parse_enum(row.get::<String, _>("status").as_str())?,
        is_featured: row.get("is_featured"),
        registered_count: row.get("registered_count"),
        audit: read_audit(row, ""),
    })
}

fn row_to_registration(row: &PgRow) -> Result<Registration> {
    Ok(Registration {
        id: RegistrationId::from(row.get::<Uuid, _>("id")),
        event_id: EventId::from(row.get::<Uuid, _>("event_id")),
        user_id: UserId::from(row.get::<Uuid, _>("user_id")),
        status: parse_enum(row.get::<String, _>("status").as_str())?,
        registered_at: row.get("registered_at"),
        checked_in_at: row.get("checked_in_at"),
        cancelled_at: row.get("cancelled_at"),
    })
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &EventFilter) {
    builder.push(" WHERE is_deleted = FALSE");
    if let Some(status) = filter.status {
        builder.push(" AND status = ");
        builder.push_bind(status.as_str());
    }
    if let Some(keyword) = non_blank(&filter.keyword) {
        push_keyword(builder, &["title", "location"], keyword);
    }
    if let Some(is_featured) = filter.is_featured {
        builder.push(" AND is_featured = ");
        builder.push_bind(is_featured);
    }
    if let Some(from) = filter.starts_from {
        builder.push(" AND starts_at >= ");
        builder.push_bind(from);
    }
    if let Some(to) = filter.starts_to {
        builder.push(" AND starts_at <= ");
        builder.push_bind(to);
    }
    if let Some(at) = filter.upcoming_from {
        builder.push(" AND ends_at > ");
        builder.push_bind(at);
    }
}

/// Lock the event row and load it with its current seat count.
async fn lock_event(tx: &mut Transaction<'_, Postgres>, id: EventId) -> Result<Event> {
    let row = sqlx::query(&format!(
        "SELECT {EVENT_COLUMNS}, {AUDIT_COLUMNS}, 0::BIGINT AS registered_count FROM events \
         WHERE id = $1 AND is_deleted = FALSE FOR UPDATE"
    ))
    .bind(id.as_uuid())
    .fetch_optional(&mut **tx)
    .await?;

    let mut event = match row {
        Some(row) => row_to_event(&row)?,
        None => return Err(Error::not_found("event", id)),
    };

    event.registered_count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM event_registrations WHERE event_id = $1 AND status <> 'cancelled'",
    )
    .bind(id.as_uuid())
    .fetch_one(&mut **tx)
    .await?;

    Ok(event)
}

#[async_trait]
impl EventRepository for PgEventRepository {
    #[instrument(skip(self, input), fields(title = %input.title))]
    async fn create(&self, input: NewEvent) -> Result<Event> {
        input.validate()?;
        input.check_schedule()?;

        let id = EventId::new();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO events (
                id, title, description, location, cover_url, starts_at, ends_at,
                registration_deadline, capacity, status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            "#,
        )
        .bind(id.as_uuid())
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.location)
        .bind(&input.cover_url)
        .bind(input.starts_at)
        .bind(input.ends_at)
        .bind(input.registration_deadline)
        .bind(input.capacity)
        .bind(input.status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(event_id = %id, "Event created");
        Ok(Event {
            id,
            title: input.title,
            description: input.description,
            location: input.location,
            cover_url: input.cover_url,
            starts_at: input.starts_at,
            ends_at: input.ends_at,
            registration_deadline: input.registration_deadline,
            capacity: input.capacity,
            status: input.status,
            is_featured: false,
            registered_count: 0,
            audit: Audit::new(now),
        })
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: EventId) -> Result<Event> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS}, {AUDIT_COLUMNS}, {REGISTERED_COUNT} FROM events \
             WHERE id = $1 AND is_deleted = FALSE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => row_to_event(&row),
            None => Err(Error::not_found("event", id)),
        }
    }

    #[instrument(skip(self, update))]
    async fn update(&self, id: EventId, update: EventUpdate) -> Result<Event> {
        update.validate()?;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let result: Result<()> = async {
            // Row lock shared with `register` while the seat count is checked
            let current = lock_event(&mut tx, id).await?;
            let merged = update.merged_into(&current);
            check_schedule(merged.starts_at, merged.ends_at, merged.registration_deadline)?;
            if let Some(capacity) = merged.capacity {
                if i64::from(capacity) < current.registered_count {
                    return Err(Error::Validation(format!(
                        "capacity {} is below the {} seats already taken",
                        capacity, current.registered_count
                    )));
                }
            }

            let mut builder = QueryBuilder::<Postgres>::new("UPDATE events SET updated_at = ");
            builder.push_bind(Utc::now());
            builder.push(", title = ");
            builder.push_bind(merged.title);
            builder.push(", description = ");
            builder.push_bind(merged.description);
            builder.push(", location = ");
            builder.push_bind(merged.location);
            builder.push(", cover_url = ");
            builder.push_bind(merged.cover_url);
            builder.push(", starts_at = ");
            builder.push_bind(merged.starts_at);
            builder.push(", ends_at = ");
            builder.push_bind(merged.ends_at);
            builder.push(", registration_deadline = ");
            builder.push_bind(merged.registration_deadline);
            builder.push(", capacity = ");
            builder.push_bind(merged.capacity);
            builder.push(", status = ");
            builder.push_bind(merged.status.as_str());
            builder.push(" WHERE id = ");
            builder.push_bind(id.into_uuid());

            builder.build().execute(&mut *tx).await?;
            Ok(())
        }
        .await;
        tx.commit_or_rollback(result).await?;

        debug!(event_id = %id, "Event updated");
        self.get_by_id(id).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: EventId) -> Result<bool> {
        query::soft_delete(&self.pool, "events", id.into_uuid()).await
    }

    #[instrument(skip(self, query))]
    async fn list(&self, query: EventQuery) -> Result<PaginatedResult<Event>> {
        let pagination = query.pagination.normalized();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM events");
        push_filter(&mut count, &query.filter);
        let total = query::fetch_count(&self.pool, count).await?;

        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {EVENT_COLUMNS}, {AUDIT_COLUMNS}, {REGISTERED_COUNT} FROM events"
        ));
        push_filter(&mut builder, &query.filter);
        query::push_order(&mut builder, &query.sort, &SORT_FIELDS, "starts_at");
        query::push_page(&mut builder, &pagination);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let events = rows.iter().map(row_to_event).collect::<Result<Vec<_>>>()?;
        Ok(PaginatedResult::from_params(events, &pagination, total))
    }

    #[instrument(skip(self, filter))]
    async fn count(&self, filter: &EventFilter) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM events");
        push_filter(&mut builder, filter);
        query::fetch_count(&self.pool, builder).await
    }

    #[instrument(skip(self))]
    async fn set_featured(&self, id: EventId) -> Result<()> {
        query::set_exclusive_flag(&self.pool, "events", "is_featured", "event", id.into_uuid()).await
    }

    #[instrument(skip(self))]
    async fn get_featured(&self) -> Result<Option<Event>> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS}, {AUDIT_COLUMNS}, {REGISTERED_COUNT} FROM events \
             WHERE is_featured = TRUE AND is_deleted = FALSE ORDER BY updated_at DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(row_to_event).transpose()
    }

    #[instrument(skip(self))]
    async fn register(&self, event_id: EventId, user_id: UserId) -> Result<Registration> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let result: Result<Registration> = async {
            let event = lock_event(&mut tx, event_id).await?;
            if !event.accepts_registrations_at(now) {
                return Err(Error::Validation(format!(
                    "event {} is not accepting registrations",
                    event_id
                )));
            }

            let user_exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = $1 AND is_deleted = FALSE)",
            )
            .bind(user_id.as_uuid())
            .fetch_one(&mut *tx)
            .await?;
            if !user_exists {
                return Err(Error::not_found("user", user_id));
            }

            let existing = sqlx::query(&format!(
                "SELECT {REGISTRATION_COLUMNS} FROM event_registrations \
                 WHERE event_id = $1 AND user_id = $2 FOR UPDATE"
            ))
            .bind(event_id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .as_ref()
            .map(row_to_registration)
            .transpose()?;

            if let Some(registration) = &existing {
                if registration.status.holds_seat() {
                    return Err(Error::Conflict(format!(
                        "user {} is already registered for event {}",
                        user_id, event_id
                    )));
                }
            }
            if event.is_full() {
                return Err(Error::Conflict(format!("event {} is full", event_id)));
            }

            let row = match existing {
                Some(registration) => {
                    sqlx::query(&format!(
                        "UPDATE event_registrations SET status = $2, registered_at = $3, \
                         checked_in_at = NULL, cancelled_at = NULL \
                         WHERE id = $1 RETURNING {REGISTRATION_COLUMNS}"
                    ))
                    .bind(registration.id.as_uuid())
                    .bind(RegistrationStatus::Registered.as_str())
                    .bind(now)
                    .fetch_one(&mut *tx)
                    .await?
                }
                None => {
                    sqlx::query(&format!(
                        "INSERT INTO event_registrations (id, event_id, user_id, status, registered_at) \
                         VALUES ($1, $2, $3, $4, $5) RETURNING {REGISTRATION_COLUMNS}"
                    ))
                    .bind(RegistrationId::new().into_uuid())
                    .bind(event_id.as_uuid())
                    .bind(user_id.as_uuid())
                    .bind(RegistrationStatus::Registered.as_str())
                    .bind(now)
                    .fetch_one(&mut *tx)
                    .await?
                }
            };
            row_to_registration(&row)
        }
        .await;

        if let Err(e) = &result {
            warn!(event_id = %event_id, user_id = %user_id, error = %e, "Registration rejected");
        }
        let registration = tx.commit_or_rollback(result).await?;

        debug!(registration_id = %registration.id, "Registration stored");
        Ok(registration)
    }

    #[instrument(skip(self))]
    async fn cancel_registration(&self, event_id: EventId, user_id: UserId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE event_registrations SET status = $3, cancelled_at = $4 \
             WHERE event_id = $1 AND user_id = $2 AND status = $5",
        )
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(RegistrationStatus::Cancelled.as_str())
        .bind(Utc::now())
        .bind(RegistrationStatus::Registered.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(%event_id, %user_id, cancelled = result.rows_affected(), "Registration cancel");
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn check_in(&self, event_id: EventId, user_id: UserId) -> Result<Registration> {
        let registration = self
            .find_registration(event_id, user_id)
            .await?
            .ok_or_else(|| Error::not_found("registration", format!("{}/{}", event_id, user_id)))?;

        match registration.status {
            RegistrationStatus::Cancelled => {
                return Err(Error::Validation(format!(
                    "registration {} was cancelled",
                    registration.id
                )))
            }
            RegistrationStatus::CheckedIn => return Ok(registration),
            RegistrationStatus::Registered => {}
        }

        let row = sqlx::query(&format!(
            "UPDATE event_registrations SET status = $2, checked_in_at = $3 \
             WHERE id = $1 AND status = $4 RETURNING {REGISTRATION_COLUMNS}"
        ))
        .bind(registration.id.as_uuid())
        .bind(RegistrationStatus::CheckedIn.as_str())
        .bind(Utc::now())
        .bind(RegistrationStatus::Registered.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => {
                debug!(registration_id = %registration.id, "Checked in");
                row_to_registration(&row)
            }
            // Status changed between the read and the update; report what is stored now.
            None => self
                .find_registration(event_id, user_id)
                .await?
                .ok_or_else(|| Error::not_found("registration", registration.id)),
        }
    }

    #[instrument(skip(self))]
    async fn list_registrations(
        &self,
        event_id: EventId,
        pagination: PaginationParams,
    ) -> Result<PaginatedResult<Registration>> {
        let pagination = pagination.normalized();

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM event_registrations WHERE event_id = $1")
                .bind(event_id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;

        let rows = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM event_registrations WHERE event_id = $1 \
             ORDER BY registered_at, id LIMIT $2 OFFSET $3"
        ))
        .bind(event_id.as_uuid())
        .bind(i64::from(pagination.limit()))
        .bind(pagination.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let registrations = rows.iter().map(row_to_registration).collect::<Result<Vec<_>>>()?;
        Ok(PaginatedResult::from_params(registrations, &pagination, total as u64))
    }

    #[instrument(skip(self))]
    async fn registration_stats(&self, event_id: EventId) -> Result<Vec<StatusCount<RegistrationStatus>>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM event_registrations \
             WHERE event_id = $1 GROUP BY status ORDER BY status",
        )
        .bind(event_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter()
            .map(|row| {
                Ok(StatusCount {
                    status: parse_enum(row.get::<String, _>("status").as_str())?,
                    count: row.get::<i64, _>("count") as u64,
                })
            })
            .collect()
    }
}
