//! User-submitted candidate conflicts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conflict::ConflictId;
use crate::content::{UnitId, UnitPair};

/// Unique identifier for a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagId(Uuid);

impl FlagId {
    /// Creates a new random flag ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FlagId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FlagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Triage status of a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagStatus {
    /// Submitted, not yet looked at.
    Pending,
    /// Looked at, no decision yet.
    Reviewed,
    /// Accepted as a real conflict.
    Approved,
    /// Rejected.
    Rejected,
}

impl FlagStatus {
    /// Returns true if `self -> next` is a legal flag edge.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Reviewed | Self::Approved | Self::Rejected)
                | (Self::Reviewed, Self::Approved | Self::Rejected)
        )
    }
}

impl fmt::Display for FlagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Reviewed => "reviewed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Reviewer decision on a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagDecision {
    /// Mark as seen without deciding.
    MarkReviewed,
    /// Accept: the pair gets (or keeps) a conflict.
    Approve,
    /// Reject.
    Reject,
}

impl FlagDecision {
    /// Status the flag moves to.
    #[must_use]
    pub const fn target_status(self) -> FlagStatus {
        match self {
            Self::MarkReviewed => FlagStatus::Reviewed,
            Self::Approve => FlagStatus::Approved,
            Self::Reject => FlagStatus::Rejected,
        }
    }
}

/// A candidate conflict reported by an end user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    /// Unique identifier.
    pub id: FlagId,

    /// Conflict backing this flag, if one exists or was detected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_id: Option<ConflictId>,

    /// Who submitted it.
    pub reporter: String,

    /// First unit.
    pub unit_a: UnitId,

    /// Second unit.
    pub unit_b: UnitId,

    /// The reporter's description of the contradiction.
    pub description: String,

    /// Reviewer notes.
    #[serde(default)]
    pub notes: String,

    /// Triage status.
    pub status: FlagStatus,

    /// Submission time.
    pub created_at: DateTime<Utc>,
}

impl Flag {
    /// Creates a PENDING flag.
    #[must_use]
    pub fn new(
        unit_a: UnitId,
        unit_b: UnitId,
        description: impl Into<String>,
        reporter: impl Into<String>,
    ) -> Self {
        Self {
            id: FlagId::new(),
            conflict_id: None,
            reporter: reporter.into(),
            unit_a,
            unit_b,
            description: description.into(),
            notes: String::new(),
            status: FlagStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Canonical unit pair.
    #[must_use]
    pub fn pair(&self) -> UnitPair {
        UnitPair::new(self.unit_a, self.unit_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_transitions() {
        use FlagStatus::*;
        assert!(Pending.can_transition_to(Reviewed));
        assert!(Pending.can_transition_to(Approved));
        assert!(Reviewed.can_transition_to(Rejected));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Pending));
        assert!(!Reviewed.can_transition_to(Reviewed));
    }

    #[test]
    fn new_flag_is_pending() {
        let flag = Flag::new(UnitId::new(), UnitId::new(), "doses disagree", "student-7");
        assert_eq!(flag.status, FlagStatus::Pending);
        assert!(flag.conflict_id.is_none());
    }
}
