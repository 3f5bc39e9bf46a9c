//! Shared utilities for the CMS backend crates.
//!
//! - Configuration loading
//! - Tracing setup
//! - Pagination, sorting and date ranges
//! - LIKE escaping and datetime helpers

pub mod config;
pub mod datetime;
pub mod pagination;
pub mod telemetry;
pub mod validation;

pub use config::{AppConfig, DatabaseSettings, TelemetryConfig};
pub use datetime::{days_between, now_utc, parse_datetime, start_of_day};
pub use pagination::{DateRange, PaginatedResult, PaginationParams, SortDirection, SortParams};
pub use telemetry::init_tracing;
pub use validation::escape_like;

/// Common error type used throughout the crate
pub type Result<T> = std::result::Result<T, anyhow::Error>;
