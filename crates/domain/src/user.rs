//! User accounts.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::audit::Audit;
use crate::identifiers::UserId;

/// User account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub role: UserRole,
    pub status: UserStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
    pub audit: Audit,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active && self.audit.is_live()
    }

    /// Compact projection used when preloading authors
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// Author/owner projection joined into other entities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

define_str_enum! {
    /// Back-office role
    UserRole {
        Member => "member",
        Editor => "editor",
        Admin => "admin",
    }
}

impl UserRole {
    pub fn can_publish(&self) -> bool {
        matches!(self, Self::Editor | Self::Admin)
    }

    pub fn can_manage_users(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

define_str_enum! {
    /// Account state
    UserStatus {
        Active => "active",
        Disabled => "disabled",
    }
}

/// Input for creating a user; the password is already hashed by the caller.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct NewUser {
    #[validate(length(min = 3, max = 32))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    #[validate(custom = "validate_phone")]
    pub phone: Option<String>,
    #[validate(length(max = 64))]
    pub display_name: Option<String>,
    #[validate(length(min = 1))]
    pub password_hash: String,
    pub role: UserRole,
}

/// Partial profile update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Validate, Serialize, Deserialize)]
pub struct UserUpdate {
    #[validate(email)]
    pub email: Option<String>,
    #[validate(custom = "validate_phone")]
    pub phone: Option<String>,
    #[validate(length(max = 64))]
    pub display_name: Option<String>,
    #[validate(length(max = 512))]
    pub avatar_url: Option<String>,
    pub role: Option<UserRole>,
}

/// Filter for user listings
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<UserRole>,
    pub status: Option<UserStatus>,
    /// Matches username, email or display name
    pub keyword: Option<String>,
}

static PHONE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\+[0-9]{5,19}|[0-9]{6,20})$").expect("phone regex"));

/// Digits with an optional leading `+`, 6 to 20 characters in total
pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    if PHONE_REGEX.is_match(phone) {
        Ok(())
    } else {
        Err(ValidationError::new("phone"))
    }
}
