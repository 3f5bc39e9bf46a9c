//! WeChat official-account integration: followers and parametric QR codes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::audit::Audit;
use crate::errors::{DomainError, DomainResult};
use crate::identifiers::{EventId, QrCodeId, UserId, WeChatUserId};

/// Follower of the official account, keyed by `openid`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeChatUser {
    pub id: WeChatUserId,
    pub openid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unionid: Option<String>,
    /// Site account this follower is bound to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub nickname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub gender: Gender,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub subscribed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub audit: Audit,
}

impl WeChatUser {
    pub fn is_bound(&self) -> bool {
        self.user_id.is_some()
    }
}

define_str_enum! {
    /// Gender as reported by the WeChat user-info API
    Gender {
        Unknown => "unknown",
        Male => "male",
        Female => "female",
    }
}

impl Gender {
    /// Map the numeric `sex` field of the WeChat API (1 male, 2 female)
    pub fn from_wechat_code(code: i64) -> Self {
        match code {
            1 => Self::Male,
            2 => Self::Female,
            _ => Self::Unknown,
        }
    }
}

/// Profile pulled from WeChat; input of `upsert`
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct WeChatProfile {
    #[validate(length(min = 1, max = 64))]
    pub openid: String,
    #[validate(length(max = 64))]
    pub unionid: Option<String>,
    #[validate(length(max = 100))]
    #[serde(default)]
    pub nickname: String,
    #[validate(length(max = 512))]
    pub avatar_url: Option<String>,
    #[serde(default = "default_gender")]
    pub gender: Gender,
    pub city: Option<String>,
    pub province: Option<String>,
    pub country: Option<String>,
    #[serde(default = "default_subscribed")]
    pub subscribed: bool,
}

fn default_gender() -> Gender {
    Gender::Unknown
}

fn default_subscribed() -> bool {
    true
}

#[derive(Debug, Clone, Default)]
pub struct WeChatUserFilter {
    pub subscribed: Option<bool>,
    /// `Some(true)` only followers bound to an account
    pub bound: Option<bool>,
    /// Matches nickname or openid
    pub keyword: Option<String>,
}

/// Parametric QR code handed out by the official account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrCode {
    pub id: QrCodeId,
    /// Scene string echoed back by WeChat when the code is scanned
    pub scene: String,
    pub kind: QrCodeKind,
    pub ticket: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub scan_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub audit: Audit,
}

impl QrCode {
    /// Permanent codes never expire
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match (self.kind, self.expires_at) {
            (QrCodeKind::Permanent, _) => false,
            (QrCodeKind::Temporary, Some(expires_at)) => now >= expires_at,
            (QrCodeKind::Temporary, None) => false,
        }
    }
}

define_str_enum! {
    QrCodeKind {
        Temporary => "temporary",
        Permanent => "permanent",
    }
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct NewQrCode {
    #[validate(length(min = 1, max = 64))]
    pub scene: String,
    pub kind: QrCodeKind,
    #[validate(length(min = 1, max = 255))]
    pub ticket: String,
    #[validate(length(min = 1, max = 512))]
    pub url: String,
    pub event_id: Option<EventId>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewQrCode {
    /// Temporary codes need an expiry; permanent codes must not have one
    pub fn check_expiry(&self) -> DomainResult<()> {
        match (self.kind, self.expires_at) {
            (QrCodeKind::Temporary, None) => {
                Err(DomainError::field("expires_at", "temporary QR codes need an expiry"))
            }
            (QrCodeKind::Permanent, Some(_)) => {
                Err(DomainError::field("expires_at", "permanent QR codes do not expire"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QrCodeFilter {
    pub kind: Option<QrCodeKind>,
    pub event_id: Option<EventId>,
    /// Only codes still valid at this instant
    pub active_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn code(kind: QrCodeKind, expires_at: Option<DateTime<Utc>>) -> QrCode {
        QrCode {
            id: QrCodeId::new(),
            scene: "event-checkin".to_string(),
            kind,
            ticket: "gQH47joAAAAAAAAAASxodHRw".to_string(),
            url: "http://weixin.qq.com/q/kZgfwMTm72WWPkovabbI".to_string(),
            event_id: None,
            expires_at,
            scan_count: 0,
            last_scanned_at: None,
            audit: Audit::default(),
        }
    }

    #[test]
    fn test_qr_expiry() {
        let now = Utc::now();
        assert!(!code(QrCodeKind::Permanent, None).is_expired_at(now));
        assert!(code(QrCodeKind::Temporary, Some(now - Duration::seconds(1))).is_expired_at(now));
        assert!(!code(QrCodeKind::Temporary, Some(now + Duration::days(1))).is_expired_at(now));
    }

    #[test]
    fn test_new_qr_expiry_rules() {
        let mut input = NewQrCode {
            scene: "signup".to_string(),
            kind: QrCodeKind::Temporary,
            ticket: "ticket".to_string(),
            url: "http://weixin.qq.com/q/abc".to_string(),
            event_id: None,
            expires_at: None,
        };
        assert!(input.check_expiry().is_err());

        input.expires_at = Some(Utc::now() + Duration::days(30));
        assert!(input.check_expiry().is_ok());

        input.kind = QrCodeKind::Permanent;
        assert!(input.check_expiry().is_err());
    }

    #[test]
    fn test_gender_codes() {
        assert_eq!(Gender::from_wechat_code(1), Gender::Male);
        assert_eq!(Gender::from_wechat_code(2), Gender::Female);
        assert_eq!(Gender::from_wechat_code(0), Gender::Unknown);
    }
}
