//! Articles and their query types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::audit::Audit;
use crate::category::Category;
use crate::identifiers::{ArticleId, CategoryId, UserId};
use crate::user::UserSummary;

/// Editorial article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<CategoryId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<UserId>,
    pub title: String,
    pub summary: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    pub status: ArticleStatus,
    /// Pinned to the top of listings; at most one live article carries it
    pub is_top: bool,
    pub is_recommended: bool,
    pub view_count: i64,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub audit: Audit,
}

impl Article {
    pub fn is_published(&self) -> bool {
        self.status == ArticleStatus::Published
    }
}

/// Article with its associations preloaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleDetail {
    pub article: Article,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<UserSummary>,
}

define_str_enum! {
    /// Publication state of an article
    ArticleStatus {
        Draft => "draft",
        Published => "published",
        Archived => "archived",
    }
}

/// Input for creating an article
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct NewArticle {
    pub category_id: Option<CategoryId>,
    pub author_id: Option<UserId>,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 500))]
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub content: String,
    #[validate(length(max = 512))]
    pub cover_url: Option<String>,
    pub status: ArticleStatus,
    #[serde(default)]
    pub is_recommended: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Partial update; `None` leaves a field unchanged.
///
/// `category_id: Some(None)` detaches the article from its category and
/// `tags: Some(..)` replaces the whole tag set.
#[derive(Debug, Clone, Default, Validate, Serialize, Deserialize)]
pub struct ArticleUpdate {
    pub category_id: Option<Option<CategoryId>>,
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 500))]
    pub summary: Option<String>,
    pub content: Option<String>,
    pub cover_url: Option<Option<String>>,
    pub status: Option<ArticleStatus>,
    pub tags: Option<Vec<String>>,
}

/// Filter for article listings and counts
#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    pub category_id: Option<CategoryId>,
    /// Also match articles filed under descendants of `category_id`
    pub include_subcategories: bool,
    pub author_id: Option<UserId>,
    pub status: Option<ArticleStatus>,
    /// Matches title or summary
    pub keyword: Option<String>,
    pub tag: Option<String>,
    pub is_top: Option<bool>,
    pub is_recommended: Option<bool>,
    pub published_from: Option<DateTime<Utc>>,
    pub published_to: Option<DateTime<Utc>>,
}

/// Article count per category (`None` for uncategorised articles)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category_id: Option<CategoryId>,
    pub category_name: Option<String>,
    pub count: u64,
}

/// Trim, drop empties and de-duplicate tags while keeping their first order.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        assert_eq!(ArticleStatus::Published.to_string(), "published");
        assert_eq!("Draft".parse::<ArticleStatus>().unwrap(), ArticleStatus::Draft);
        assert_eq!(ArticleStatus::all().len(), 3);
    }

    #[test]
    fn test_normalize_tags() {
        let tags = vec![
            " Rust ".to_string(),
            "rust".to_string(),
            "".to_string(),
            "Web".to_string(),
        ];
        assert_eq!(normalize_tags(&tags), vec!["rust", "web"]);
    }

    #[test]
    fn test_new_article_title_required() {
        let input = NewArticle {
            category_id: None,
            author_id: None,
            title: String::new(),
            summary: String::new(),
            content: "body".to_string(),
            cover_url: None,
            status: ArticleStatus::Draft,
            is_recommended: false,
            tags: vec![],
        };
        assert!(input.validate().is_err());
    }
}
