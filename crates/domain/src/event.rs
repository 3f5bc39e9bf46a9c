//! Events and attendee registrations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::audit::Audit;
use crate::errors::{DomainError, DomainResult};
use crate::identifiers::{EventId, RegistrationId, UserId};

/// Event open for registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub description: String,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_deadline: Option<DateTime<Utc>>,
    /// `None` means unlimited seats
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<i32>,
    pub status: EventStatus,
    /// Highlighted on the home page; at most one live event carries it
    pub is_featured: bool,
    /// Registrations that are not cancelled
    pub registered_count: i64,
    pub audit: Audit,
}

impl Event {
    /// Whether a new registration is accepted at `now`
    pub fn accepts_registrations_at(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Open
            && now < self.ends_at
            && self.registration_deadline.map_or(true, |deadline| now <= deadline)
    }

    pub fn is_full(&self) -> bool {
        self.capacity
            .map_or(false, |capacity| self.registered_count >= i64::from(capacity))
    }

    pub fn remaining_seats(&self) -> Option<i64> {
        self.capacity
            .map(|capacity| (i64::from(capacity) - self.registered_count).max(0))
    }
}

define_str_enum! {
    EventStatus {
        Draft => "draft",
        Open => "open",
        Closed => "closed",
        Cancelled => "cancelled",
    }
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct NewEvent {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[validate(length(max = 255))]
    #[serde(default)]
    pub location: String,
    #[validate(length(max = 512))]
    pub cover_url: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub registration_deadline: Option<DateTime<Utc>>,
    #[validate(range(min = 1))]
    pub capacity: Option<i32>,
    pub status: EventStatus,
}

impl NewEvent {
    pub fn check_schedule(&self) -> DomainResult<()> {
        check_schedule(self.starts_at, self.ends_at, self.registration_deadline)
    }
}

#[derive(Debug, Clone, Default, Validate, Serialize, Deserialize)]
pub struct EventUpdate {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    pub description: Option<String>,
    #[validate(length(max = 255))]
    pub location: Option<String>,
    pub cover_url: Option<Option<String>>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub registration_deadline: Option<Option<DateTime<Utc>>>,
    pub capacity: Option<Option<i32>>,
    pub status: Option<EventStatus>,
}

impl EventUpdate {
    /// Apply the update to a copy of `event`; used to check the merged schedule
    pub fn merged_into(&self, event: &Event) -> Event {
        let mut merged = event.clone();
        if let Some(title) = &self.title {
            merged.title = title.clone();
        }
        if let Some(description) = &self.description {
            merged.description = description.clone();
        }
        if let Some(location) = &self.location {
            merged.location = location.clone();
        }
        if let Some(cover_url) = &self.cover_url {
            merged.cover_url = cover_url.clone();
        }
        if let Some(starts_at) = self.starts_at {
            merged.starts_at = starts_at;
        }
        if let Some(ends_at) = self.ends_at {
            merged.ends_at = ends_at;
        }
        if let Some(deadline) = self.registration_deadline {
            merged.registration_deadline = deadline;
        }
        if let Some(capacity) = self.capacity {
            merged.capacity = capacity;
        }
        if let Some(status) = self.status {
            merged.status = status;
        }
        merged
    }
}

/// `ends_at` after `starts_at`, deadline no later than the end
pub fn check_schedule(
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    registration_deadline: Option<DateTime<Utc>>,
) -> DomainResult<()> {
    if ends_at <= starts_at {
        return Err(DomainError::field("ends_at", "must be after starts_at"));
    }
    if let Some(deadline) = registration_deadline {
        if deadline > ends_at {
            return Err(DomainError::field(
                "registration_deadline",
                "must not be after ends_at",
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub status: Option<EventStatus>,
    /// Matches title or location
    pub keyword: Option<String>,
    pub is_featured: Option<bool>,
    pub starts_from: Option<DateTime<Utc>>,
    pub starts_to: Option<DateTime<Utc>>,
    /// Only events that have not ended at this instant
    pub upcoming_from: Option<DateTime<Utc>>,
}

/// A user's registration for an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub id: RegistrationId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub status: RegistrationStatus,
    pub registered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_in_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

define_str_enum! {
    RegistrationStatus {
        Registered => "registered",
        CheckedIn => "checked_in",
        Cancelled => "cancelled",
    }
}

impl RegistrationStatus {
    /// Counts against capacity
    pub fn holds_seat(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}
