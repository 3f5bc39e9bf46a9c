//! Helpers shared by the repositories for building dynamic SQL.
//!
//! Filters are appended to a `QueryBuilder` by one `push_filter` function per
//! entity so that the COUNT and the page query always see the same WHERE.

use std::str::FromStr;

use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;
use uuid::Uuid;

use cms_common::pagination::{DateRange, PaginationParams, SortParams};
use cms_common::validation::escape_like;
use cms_domain::{
    stats::{fill_daily_gaps, DailyCount},
    Audit, DomainError, StatusCount,
};

use crate::database::TransactionExt;
use crate::{Error, Result};

/// Audit columns, appended to every soft-deletable SELECT list.
pub(crate) const AUDIT_COLUMNS: &str = "is_deleted, created_at, updated_at, deleted_at";

/// Read the audit block; `prefix` selects aliased columns from a join.
pub(crate) fn read_audit(row: &PgRow, prefix: &str) -> Audit {
    Audit {
        created_at: row.get(format!("{prefix}created_at").as_str()),
        updated_at: row.get(format!("{prefix}updated_at").as_str()),
        deleted_at: row.get(format!("{prefix}deleted_at").as_str()),
        is_deleted: row.get(format!("{prefix}is_deleted").as_str()),
    }
}

/// `%keyword%` with LIKE wildcards in the keyword escaped.
pub(crate) fn like_pattern(keyword: &str) -> String {
    format!("%{}%", escape_like(keyword.trim()))
}

/// Keyword filters with blank input are ignored.
pub(crate) fn non_blank(keyword: &Option<String>) -> Option<&str> {
    keyword.as_deref().map(str::trim).filter(|k| !k.is_empty())
}

/// ` AND (c1 ILIKE $n OR c2 ILIKE $n+1 ...)`
pub(crate) fn push_keyword(builder: &mut QueryBuilder<'_, Postgres>, columns: &[&str], keyword: &str) {
    let pattern = like_pattern(keyword);
    builder.push(" AND (");
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            builder.push(" OR ");
        }
        builder.push(*column);
        builder.push(" ILIKE ");
        builder.push_bind(pattern.clone());
    }
    builder.push(")");
}

/// Resolve a requested sort field against the allowed columns.
pub(crate) fn order_column<'a>(sort: &SortParams, allowed: &[&'a str], default: &'a str) -> &'a str {
    allowed
        .iter()
        .copied()
        .find(|column| *column == sort.field)
        .unwrap_or(default)
}

/// ` ORDER BY <col> <dir>, id <dir>`; the id tiebreak keeps pages stable.
pub(crate) fn push_order(
    builder: &mut QueryBuilder<'_, Postgres>,
    sort: &SortParams,
    allowed: &[&str],
    default: &str,
) {
    let column = order_column(sort, allowed, default);
    let direction = sort.direction.as_sql();
    builder.push(format!(" ORDER BY {column} {direction}, id {direction}"));
}

/// ` LIMIT $n OFFSET $n+1`
pub(crate) fn push_page(builder: &mut QueryBuilder<'_, Postgres>, pagination: &PaginationParams) {
    builder.push(" LIMIT ");
    builder.push_bind(i64::from(pagination.limit()));
    builder.push(" OFFSET ");
    builder.push_bind(pagination.offset() as i64);
}

/// ` AND <column> >= $n AND <column> <= $n+1` for the bounds that are set.
pub(crate) fn push_date_range(builder: &mut QueryBuilder<'_, Postgres>, column: &str, range: &DateRange) {
    if let Some(start) = range.start {
        builder.push(format!(" AND {column} >= "));
        builder.push_bind(start);
    }
    if let Some(end) = range.end {
        builder.push(format!(" AND {column} <= "));
        builder.push_bind(end);
    }
}

/// Read `day`/`count` rows; a bounded range gets zero rows for missing days.
pub(crate) fn daily_counts(rows: &[PgRow], range: &DateRange) -> Vec<DailyCount> {
    let counts: Vec<DailyCount> = rows
        .iter()
        .map(|row| DailyCount {
            date: row.get("day"),
            count: row.get::<i64, _>("count") as u64,
        })
        .collect();

    match range.days() {
        Some((start, end)) => fill_daily_gaps(&counts, start, end),
        None => counts,
    }
}

/// Run a `SELECT COUNT(*) ...` builder.
pub(crate) async fn fetch_count(pool: &PgPool, mut builder: QueryBuilder<'_, Postgres>) -> Result<u64> {
    let total = builder
        .build_query_scalar::<i64>()
        .fetch_one(pool)
        .await
        .map_err(Error::Database)?;
    Ok(total as u64)
}

/// Parse a TEXT enum column.
pub(crate) fn parse_enum<T>(value: &str) -> Result<T>
where
    T: FromStr<Err = DomainError>,
{
    value.parse::<T>().map_err(|e| Error::InvalidData(e.to_string()))
}

/// Run a `SELECT <status>, COUNT(*) ... GROUP BY <status>` query whose
/// columns are named `status` and `count`.
pub(crate) async fn grouped_status_counts<S>(pool: &PgPool, sql: &str) -> Result<Vec<StatusCount<S>>>
where
    S: FromStr<Err = DomainError>,
{
    let rows = sqlx::query(sql)
        .fetch_all(pool)
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

/// Soft-delete one live row. Returns whether a row changed.
pub(crate) async fn soft_delete(pool: &PgPool, table: &'static str, id: Uuid) -> Result<bool> {
    let now = Utc::now();
    let result = sqlx::query(&format!(
        "UPDATE {table} SET is_deleted = TRUE, deleted_at = $2, updated_at = $2 \
         WHERE id = $1 AND is_deleted = FALSE"
    ))
    .bind(id)
    .bind(now)
    .execute(pool)
    .await
    .map_err(Error::Database)?;

    Ok(result.rows_affected() > 0)
}

/// Clear `flag` on every live row of `table`, then set it on `id`.
///
/// Both statements run in one transaction holding an advisory lock keyed on
/// `table.flag`, so calls for the same flag run one after another. When `id`
/// is missing or deleted the transaction is rolled back and the previous
/// holder keeps the flag. The schema also has a partial unique index per flag.
pub(crate) async fn set_exclusive_flag(
    pool: &PgPool,
    table: &'static str,
    flag: &'static str,
    entity: &'static str,
    id: Uuid,
) -> Result<()> {
    let mut tx = pool.begin().await.map_err(Error::Database)?;
    let result: Result<()> = async {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("{table}.{flag}"))
            .execute(&mut *tx)
            .await?;

        let now = Utc::now();
        let cleared = sqlx::query(&format!(
            "UPDATE {table} SET {flag} = FALSE, updated_at = $1 \
             WHERE {flag} = TRUE AND is_deleted = FALSE"
        ))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let set = sqlx::query(&format!(
            "UPDATE {table} SET {flag} = TRUE, updated_at = $2 \
             WHERE id = $1 AND is_deleted = FALSE"
        ))
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if set.rows_affected() == 0 {
            return Err(Error::not_found(entity, id));
        }
        debug!(table, flag, cleared = cleared.rows_affected(), %id, "Exclusive flag moved");
        Ok(())
    }
    .await;

    tx.commit_or_rollback(result).await
}

/// Clear `flag` on every live row; returns how many rows carried it.
pub(crate) async fn clear_flag(pool: &PgPool, table: &'static str, flag: &'static str) -> Result<u64> {
    let result = sqlx::query(&format!(
        "UPDATE {table} SET {flag} = FALSE, updated_at = $1 \
         WHERE {flag} = TRUE AND is_deleted = FALSE"
    ))
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(Error::Database)?;

    Ok(result.rows_affected())
}

/// Bump a counter column on a live row and return its new value.
pub(crate) async fn increment_counter(
    pool: &PgPool,
    table: &'static str,
    column: &'static str,
    entity: &'static str,
    id: Uuid,
) -> Result<i64> {
    let value: Option<i64> = sqlx::query_scalar(&format!(
        "UPDATE {table} SET {column} = {column} + 1 \
         WHERE id = $1 AND is_deleted = FALSE RETURNING {column}"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(Error::Database)?;

    value.ok_or_else(|| Error::not_found(entity, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cms_common::pagination::SortDirection;
    use proptest::prelude::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("  rust "), "%rust%");
        assert_eq!(like_pattern("50%"), r"%50\%%");
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(&Some("  ".to_string())), None);
        assert_eq!(non_blank(&Some(" news ".to_string())), Some("news"));
        assert_eq!(non_blank(&None), None);
    }

    #[test]
    fn test_push_keyword() {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT 1 FROM t WHERE is_deleted = FALSE");
        push_keyword(&mut builder, &["title", "summary"], "campus");
        assert_eq!(
            builder.sql(),
            "SELECT 1 FROM t WHERE is_deleted = FALSE AND (title ILIKE $1 OR summary ILIKE $2)"
        );
    }

    #[test]
    fn test_order_falls_back_to_default() {
        let allowed = ["created_at", "title"];
        assert_eq!(order_column(&SortParams::asc("title"), &allowed, "created_at"), "title");
        assert_eq!(
            order_column(&SortParams::asc("title; DROP TABLE t"), &allowed, "created_at"),
            "created_at"
        );
    }

    #[test]
    fn test_push_order_and_page() {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM t");
        push_order(
            &mut builder,
            &SortParams::new("view_count", SortDirection::Desc),
            &["view_count"],
            "created_at",
        );
        push_page(&mut builder, &PaginationParams::new(2, 10));
        assert_eq!(
            builder.sql(),
            "SELECT * FROM t ORDER BY view_count DESC, id DESC LIMIT $1 OFFSET $2"
        );
    }

    #[test]
    fn test_push_date_range() {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT 1 FROM hits WHERE TRUE");
        push_date_range(&mut builder, "created_at", &DateRange::new(Some(Utc::now()), None));
        assert_eq!(builder.sql(), "SELECT 1 FROM hits WHERE TRUE AND created_at >= $1");

        let mut builder = QueryBuilder::<Postgres>::new("SELECT 1 FROM hits WHERE TRUE");
        push_date_range(&mut builder, "created_at", &DateRange::last_days(Utc::now(), 7));
        assert_eq!(
            builder.sql(),
            "SELECT 1 FROM hits WHERE TRUE AND created_at >= $1 AND created_at <= $2"
        );
    }

    #[test]
    fn test_parse_enum() {
        let status: cms_domain::article::ArticleStatus = parse_enum("published").unwrap();
        assert_eq!(status, cms_domain::article::ArticleStatus::Published);
        assert!(parse_enum::<cms_domain::article::ArticleStatus>("gone").is_err());
    }

    proptest! {
        #[test]
        fn order_column_is_always_whitelisted(field in ".*") {
            let allowed = ["created_at", "title"];
            let sort = SortParams::desc(field);
            let column = order_column(&sort, &allowed, "created_at");
            prop_assert!(allowed.contains(&column));
        }
    }
}
