//! Append-only audit trail for conflicts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conflict::{ConflictId, ConflictStatus};

/// What kind of change a history entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    /// Conflict created.
    Detected,
    /// Moved to UNDER_REVIEW.
    Flagged,
    /// Moved to RESOLVED.
    Resolved,
    /// Moved back to ACTIVE.
    Reopened,
    /// Moved to DISMISSED.
    Dismissed,
    /// Evidence annotation; status unchanged.
    EvidenceUpdated,
}

impl ChangeType {
    /// The change type recorded when a conflict enters `status`.
    #[must_use]
    pub const fn for_target(status: ConflictStatus) -> Self {
        match status {
            ConflictStatus::Active => Self::Reopened,
            ConflictStatus::UnderReview => Self::Flagged,
            ConflictStatus::Resolved => Self::Resolved,
            ConflictStatus::Dismissed => Self::Dismissed,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Detected => "detected",
            Self::Flagged => "flagged",
            Self::Resolved => "resolved",
            Self::Reopened => "reopened",
            Self::Dismissed => "dismissed",
            Self::EvidenceUpdated => "evidence_updated",
        };
        f.write_str(s)
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Conflict the entry belongs to.
    pub conflict_id: ConflictId,

    /// Kind of change.
    pub change_type: ChangeType,

    /// Status before the change (`None` for the initial DETECTED entry).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_status: Option<ConflictStatus>,

    /// Status after the change.
    pub new_status: ConflictStatus,

    /// Who made the change ("engine" for automatic detections).
    pub actor: String,

    /// When the change happened.
    pub timestamp: DateTime<Utc>,

    /// Free-form notes.
    #[serde(default)]
    pub notes: String,
}

impl HistoryEntry {
    /// The first entry of every conflict.
    #[must_use]
    pub fn detected(conflict_id: ConflictId, actor: impl Into<String>, notes: impl Into<String>) -> Self {
        Self {
            conflict_id,
            change_type: ChangeType::Detected,
            old_status: None,
            new_status: ConflictStatus::Active,
            actor: actor.into(),
            timestamp: Utc::now(),
            notes: notes.into(),
        }
    }

    /// Entry for a status transition.
    #[must_use]
    pub fn transition(
        conflict_id: ConflictId,
        from: ConflictStatus,
        to: ConflictStatus,
        actor: impl Into<String>,
        notes: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            conflict_id,
            change_type: ChangeType::for_target(to),
            old_status: Some(from),
            new_status: to,
            actor: actor.into(),
            timestamp: at,
            notes: notes.into(),
        }
    }

    /// Annotation entry that leaves the status untouched.
    #[must_use]
    pub fn evidence_updated(
        conflict_id: ConflictId,
        status: ConflictStatus,
        actor: impl Into<String>,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            conflict_id,
            change_type: ChangeType::EvidenceUpdated,
            old_status: Some(status),
            new_status: status,
            actor: actor.into(),
            timestamp: Utc::now(),
            notes: notes.into(),
        }
    }

    /// True for entries that record a status change (or the initial detection).
    #[must_use]
    pub fn is_status_change(&self) -> bool {
        self.change_type != ChangeType::EvidenceUpdated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_type_follows_target_status() {
        assert_eq!(ChangeType::for_target(ConflictStatus::UnderReview), ChangeType::Flagged);
        assert_eq!(ChangeType::for_target(ConflictStatus::Resolved), ChangeType::Resolved);
        assert_eq!(ChangeType::for_target(ConflictStatus::Dismissed), ChangeType::Dismissed);
        assert_eq!(ChangeType::for_target(ConflictStatus::Active), ChangeType::Reopened);
    }

    #[test]
    fn detected_entry_has_no_old_status() {
        let entry = HistoryEntry::detected(ConflictId::new(), "engine", "pattern match");
        assert_eq!(entry.change_type, ChangeType::Detected);
        assert!(entry.old_status.is_none());
        assert_eq!(entry.new_status, ConflictStatus::Active);
        assert!(entry.is_status_change());
    }

    #[test]
    fn evidence_update_keeps_status() {
        let entry =
            HistoryEntry::evidence_updated(ConflictId::new(), ConflictStatus::UnderReview, "dr-lee", "new RCT");
        assert_eq!(entry.old_status, Some(ConflictStatus::UnderReview));
        assert_eq!(entry.new_status, ConflictStatus::UnderReview);
        assert!(!entry.is_status_change());
    }
}
