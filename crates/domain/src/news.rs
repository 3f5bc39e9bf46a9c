//! News items syndicated or written in-house.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::audit::Audit;
use crate::identifiers::NewsId;

/// News item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct News {
    pub id: NewsId,
    pub title: String,
    pub summary: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    /// Front-page headline; at most one live item carries it
    pub is_headline: bool,
    pub view_count: i64,
    pub published_at: DateTime<Utc>,
    pub audit: Audit,
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct NewNews {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 500))]
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub content: String,
    #[validate(length(max = 100))]
    pub source: Option<String>,
    #[validate(length(max = 512))]
    pub source_url: Option<String>,
    #[validate(length(max = 512))]
    pub cover_url: Option<String>,
    /// Defaults to the creation time
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Validate, Serialize, Deserialize)]
pub struct NewsUpdate {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 500))]
    pub summary: Option<String>,
    pub content: Option<String>,
    pub source: Option<Option<String>>,
    pub source_url: Option<Option<String>>,
    pub cover_url: Option<Option<String>>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct NewsFilter {
    pub keyword: Option<String>,
    pub source: Option<String>,
    pub is_headline: Option<bool>,
    pub published_from: Option<DateTime<Utc>>,
    pub published_to: Option<DateTime<Utc>>,
}

/// News count per source (`None` for items without a source)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCount {
    pub source: Option<String>,
    pub count: u64,
}
