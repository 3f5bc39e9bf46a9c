//! Audit and soft-delete columns shared by every soft-deletable table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Creation, modification and deletion bookkeeping.
///
/// Rows are never physically removed; `is_deleted` hides them from every
/// repository query and `deleted_at` records when that happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audit {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
}

impl Audit {
    /// Audit block for a row created at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            deleted_at: None,
            is_deleted: false,
        }
    }

    /// Whether the row is visible to queries
    pub fn is_live(&self) -> bool {
        !self.is_deleted
    }

    /// Mark the row as soft-deleted at `now`
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.is_deleted = true;
        self.deleted_at = Some(now);
        self.updated_at = now;
    }
}

impl Default for Audit {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_audit_is_live() {
        let now = Utc::now();
        let audit = Audit::new(now);
        assert!(audit.is_live());
        assert_eq!(audit.created_at, audit.updated_at);
        assert!(audit.deleted_at.is_none());
    }

    #[test]
    fn test_mark_deleted() {
        let created = Utc::now();
        let mut audit = Audit::new(created);
        let later = created + chrono::Duration::minutes(5);
        audit.mark_deleted(later);

        assert!(!audit.is_live());
        assert_eq!(audit.deleted_at, Some(later));
        assert_eq!(audit.updated_at, later);
        assert_eq!(audit.created_at, created);
    }
}
