//! Pagination, sorting and date range filtering.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default page number (1-indexed)
const DEFAULT_PAGE: u32 = 1;

/// Default items per page
const DEFAULT_PER_PAGE: u32 = 20;

/// Maximum items per page
const MAX_PER_PAGE: u32 = 100;

/// Page request for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationParams {
    /// Page number (1-indexed)
    #[serde(default = "default_page")]
    pub page: u32,

    /// Items per page
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    DEFAULT_PAGE
}

fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl PaginationParams {
    /// Largest page size a caller can request
    pub const MAX_PAGE_SIZE: u32 = MAX_PER_PAGE;

    /// Create pagination parameters, clamping out-of-range values.
    pub fn new(page: u32, per_page: u32) -> Self {
        let page = if page == 0 { DEFAULT_PAGE } else { page };
        let per_page = if per_page == 0 {
            DEFAULT_PER_PAGE
        } else {
            per_page.min(MAX_PER_PAGE)
        };

        Self { page, per_page }
    }

    /// Re-apply the clamping rules; deserialized params skip `new`.
    pub fn normalized(self) -> Self {
        Self::new(self.page, self.per_page)
    }

    /// Row offset for `OFFSET` (0-indexed).
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.per_page)
    }

    /// Row count for `LIMIT`.
    pub fn limit(&self) -> u32 {
        self.per_page
    }
}

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Requested ordering. The field is matched against a per-entity whitelist
/// before it reaches SQL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortParams {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortParams {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Asc)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Desc)
    }
}

impl Default for SortParams {
    fn default() -> Self {
        Self::desc("created_at")
    }
}

/// One page of results plus the totals needed to render a pager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    /// Total number of matching rows across all pages
    pub total: u64,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> PaginatedResult<T> {
    pub fn new(items: Vec<T>, page: u32, per_page: u32, total: u64) -> Self {
        let total_pages = if per_page == 0 {
            0
        } else {
            total.div_ceil(u64::from(per_page)) as u32
        };

        Self {
            items,
            page,
            per_page,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }

    pub fn from_params(items: Vec<T>, params: &PaginationParams, total: u64) -> Self {
        Self::new(items, params.page, params.per_page, total)
    }
}

/// Time window filter; both bounds are inclusive and optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// Longest window [`DateRange::last_days`] will produce, about ten years.
    pub const MAX_DAYS: u32 = 3650;

    /// The last `days` calendar days up to and including `now`'s day.
    ///
    /// `days` is clamped to `1..=MAX_DAYS`.
    pub fn last_days(now: DateTime<Utc>, days: u32) -> Self {
        let today = crate::datetime::start_of_day(now.date_naive());
        let span = chrono::Duration::days(i64::from(days.clamp(1, Self::MAX_DAYS)) - 1);
        let start = today.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::new(Some(start), Some(now))
    }

    pub fn validate(&self) -> Result<(), String> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err("Start date must be before or equal to end date".to_string());
            }
        }
        Ok(())
    }

    /// Calendar days covered by a bounded range.
    pub fn days(&self) -> Option<(NaiveDate, NaiveDate)> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some((start.date_naive(), end.date_naive())),
            _ => None,
        }
    }
}
