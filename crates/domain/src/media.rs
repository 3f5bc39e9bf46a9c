//! Media library: images and videos.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::audit::Audit;
use crate::identifiers::{CategoryId, ImageId, UserId, VideoId};

/// Image stored in the media library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: ImageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    pub title: String,
    pub url: String,
    pub mime_type: String,
    pub width: i32,
    pub height: i32,
    pub size_bytes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
    pub audit: Audit,
}

impl Image {
    pub fn is_landscape(&self) -> bool {
        self.width > self.height
    }
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct NewImage {
    pub uploader_id: Option<UserId>,
    #[validate(length(max = 64))]
    pub album: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 512))]
    pub url: String,
    #[validate(custom = "validate_image_mime")]
    pub mime_type: String,
    #[validate(range(min = 0))]
    pub width: i32,
    #[validate(range(min = 0))]
    pub height: i32,
    #[validate(range(min = 0))]
    pub size_bytes: i64,
    #[validate(length(max = 255))]
    pub alt_text: Option<String>,
}

#[derive(Debug, Clone, Default, Validate, Serialize, Deserialize)]
pub struct ImageUpdate {
    pub album: Option<Option<String>>,
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    pub alt_text: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
    pub album: Option<String>,
    pub uploader_id: Option<UserId>,
    pub mime_type: Option<String>,
    /// Matches title or alt text
    pub keyword: Option<String>,
}

/// Storage usage for one MIME type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MimeTypeStat {
    pub mime_type: String,
    pub count: u64,
    pub total_bytes: i64,
}

/// Storage usage of the live image library
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_count: u64,
    pub total_bytes: i64,
    pub by_mime_type: Vec<MimeTypeStat>,
}

impl StorageStats {
    /// Totals are derived from the per-type rows
    pub fn from_breakdown(by_mime_type: Vec<MimeTypeStat>) -> Self {
        Self {
            total_count: by_mime_type.iter().map(|s| s.count).sum(),
            total_bytes: by_mime_type.iter().map(|s| s.total_bytes).sum(),
            by_mime_type,
        }
    }
}

fn validate_image_mime(mime: &str) -> Result<(), validator::ValidationError> {
    match mime.split_once('/') {
        Some(("image", subtype)) if !subtype.is_empty() => Ok(()),
        _ => Err(validator::ValidationError::new("image_mime_type")),
    }
}

/// Video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: VideoId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<CategoryId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader_id: Option<UserId>,
    pub title: String,
    pub description: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    pub duration_seconds: i32,
    pub status: VideoStatus,
    pub is_recommended: bool,
    pub play_count: i64,
    pub audit: Audit,
}

define_str_enum! {
    /// Transcoding / availability state
    VideoStatus {
        Processing => "processing",
        Ready => "ready",
        Failed => "failed",
        Offline => "offline",
    }
}

impl VideoStatus {
    pub fn is_playable(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct NewVideo {
    pub category_id: Option<CategoryId>,
    pub uploader_id: Option<UserId>,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[validate(length(min = 1, max = 512))]
    pub url: String,
    #[validate(length(max = 512))]
    pub cover_url: Option<String>,
    #[validate(range(min = 0))]
    pub duration_seconds: i32,
    pub status: VideoStatus,
}

#[derive(Debug, Clone, Default, Validate, Serialize, Deserialize)]
pub struct VideoUpdate {
    pub category_id: Option<Option<CategoryId>>,
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    pub description: Option<String>,
    pub cover_url: Option<Option<String>>,
    #[validate(range(min = 0))]
    pub duration_seconds: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct VideoFilter {
    pub category_id: Option<CategoryId>,
    pub status: Option<VideoStatus>,
    pub is_recommended: Option<bool>,
    pub keyword: Option<String>,
    pub min_duration: Option<i32>,
    pub max_duration: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_mime_validation() {
        assert!(validate_image_mime("image/png").is_ok());
        assert!(validate_image_mime("image/").is_err());
        assert!(validate_image_mime("video/mp4").is_err());
        assert!(validate_image_mime("png").is_err());
    }

    #[test]
    fn test_storage_stats_totals() {
        let stats = StorageStats::from_breakdown(vec![
            MimeTypeStat { mime_type: "image/png".into(), count: 2, total_bytes: 300 },
            MimeTypeStat { mime_type: "image/jpeg".into(), count: 3, total_bytes: 700 },
        ]);
        assert_eq!(stats.total_count, 5);
        assert_eq!(stats.total_bytes, 1000);
    }

    #[test]
    fn test_video_status() {
        assert!(VideoStatus::Ready.is_playable());
        assert!(!VideoStatus::Processing.is_playable());
        assert_eq!("offline".parse::<VideoStatus>().unwrap(), VideoStatus::Offline);
    }
}
