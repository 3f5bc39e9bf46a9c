//! Strongly-typed identifier types for the CMS domain.
//!
//! Every table is keyed by a UUID; wrapping each one in its own newtype keeps
//! an `ArticleId` from being passed where a `CategoryId` is expected.
//! All IDs use UUID v7 so that primary keys sort by creation time.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new ID with a time-ordered UUID v7
            #[inline]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Create an ID from an existing UUID
            #[inline]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get a reference to the underlying UUID
            #[inline]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Convert to the underlying UUID
            #[inline]
            pub fn into_uuid(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_id!(UserId, "Unique identifier for user accounts");

define_id!(CategoryId, "Unique identifier for content categories");

define_id!(ArticleId, "Unique identifier for articles");

define_id!(NewsId, "Unique identifier for news items");

define_id!(ImageId, "Unique identifier for images in the media library");

define_id!(VideoId, "Unique identifier for videos");

define_id!(SurveyId, "Unique identifier for surveys");

define_id!(QuestionId, "Unique identifier for survey questions");

define_id!(OptionId, "Unique identifier for survey question options");

define_id!(ResponseId, "Unique identifier for submitted survey responses");

define_id!(WeChatUserId, "Unique identifier for WeChat followers");

define_id!(QrCodeId, "Unique identifier for WeChat QR codes");

define_id!(EventId, "Unique identifier for events");

define_id!(RegistrationId, "Unique identifier for event registrations");

define_id!(HitId, "Unique identifier for hit log rows");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_creation() {
        let id = ArticleId::new();
        assert_ne!(id.to_string(), "");
    }

    #[test]
    fn test_id_equality() {
        let uuid = Uuid::now_v7();
        assert_eq!(ArticleId::from_uuid(uuid), ArticleId::from_uuid(uuid));
    }

    #[test]
    fn test_id_from_string() {
        let id1 = SurveyId::new();
        let id2: SurveyId = id1.to_string().parse().unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_id_serialization_is_transparent() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
        let deserialized: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn test_ids_are_time_ordered() {
        let first = EventId::new();
        let second = EventId::new();
        assert!(first <= second);
    }
}
