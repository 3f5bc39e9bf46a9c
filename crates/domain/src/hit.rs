//! Page hit log.
//!
//! Hits are append-only rows; they are never soft-deleted, only purged once
//! they fall out of the retention window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::identifiers::{ArticleId, EventId, HitId, NewsId, SurveyId, UserId, VideoId};

define_str_enum! {
    /// Kind of content a hit points at
    TargetKind {
        Article => "article",
        News => "news",
        Video => "video",
        Event => "event",
        Survey => "survey",
    }
}

/// Polymorphic reference to the visited content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HitTarget {
    pub kind: TargetKind,
    pub id: Uuid,
}

impl HitTarget {
    pub fn new(kind: TargetKind, id: Uuid) -> Self {
        Self { kind, id }
    }
}

impl From<ArticleId> for HitTarget {
    fn from(id: ArticleId) -> Self {
        Self::new(TargetKind::Article, id.into_uuid())
    }
}

impl From<NewsId> for HitTarget {
    fn from(id: NewsId) -> Self {
        Self::new(TargetKind::News, id.into_uuid())
    }
}

impl From<VideoId> for HitTarget {
    fn from(id: VideoId) -> Self {
        Self::new(TargetKind::Video, id.into_uuid())
    }
}

impl From<EventId> for HitTarget {
    fn from(id: EventId) -> Self {
        Self::new(TargetKind::Event, id.into_uuid())
    }
}

impl From<SurveyId> for HitTarget {
    fn from(id: SurveyId) -> Self {
        Self::new(TargetKind::Survey, id.into_uuid())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hit {
    pub id: HitId,
    pub target: HitTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct NewHit {
    pub target: HitTarget,
    pub user_id: Option<UserId>,
    #[validate(length(max = 45))]
    pub ip: Option<String>,
    #[validate(length(max = 512))]
    pub user_agent: Option<String>,
    #[validate(length(max = 1024))]
    pub referer: Option<String>,
}

impl NewHit {
    pub fn anonymous(target: impl Into<HitTarget>) -> Self {
        Self {
            target: target.into(),
            user_id: None,
            ip: None,
            user_agent: None,
            referer: None,
        }
    }
}

/// Hit count for one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCount {
    pub target: HitTarget,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_from_ids() {
        let article = ArticleId::new();
        let target = HitTarget::from(article);
        assert_eq!(target.kind, TargetKind::Article);
        assert_eq!(target.id, article.into_uuid());

        let event = EventId::new();
        assert_eq!(HitTarget::from(event).kind, TargetKind::Event);
    }

    #[test]
    fn test_anonymous_hit() {
        let hit = NewHit::anonymous(NewsId::new());
        assert_eq!(hit.target.kind, TargetKind::News);
        assert!(hit.user_id.is_none());
    }

    #[test]
    fn test_target_kind_text() {
        for kind in TargetKind::all() {
            assert_eq!(kind.as_str().parse::<TargetKind>().unwrap(), *kind);
        }
    }
}
