//! Committed resolutions.
//!
//! A conflict may collect several resolutions over time because resolved
//! conflicts can be reopened and resolved again. Resolutions are append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conflict::ConflictId;
use crate::source::SourceId;

/// A reviewer's decision on which source to trust for a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Conflict being resolved.
    pub conflict_id: ConflictId,

    /// Reviewer.
    pub resolved_by: String,

    /// Source the reviewer sided with.
    pub chosen_source_id: SourceId,

    /// Why that source was chosen.
    pub rationale: String,

    /// Supporting evidence, e.g. the guideline section consulted.
    #[serde(default)]
    pub evidence_note: String,

    /// When the resolution was recorded.
    pub resolved_at: DateTime<Utc>,
}

/// A resolution proposed by the recommender, not yet committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionDraft {
    /// Conflict the draft is for.
    pub conflict_id: ConflictId,

    /// Recommended source.
    pub chosen_source_id: SourceId,

    /// Generated rationale.
    pub rationale: String,

    /// Generated evidence summary.
    pub evidence_note: String,
}
