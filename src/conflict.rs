//! Conflict types for tracking contradictions.
//!
//! Conflicts are explicit records, never deleted. Once detected, a conflict
//! only moves through the status state machine; every move is audited by a
//! history entry.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::{UnitId, UnitPair};
use crate::pattern::PatternKind;
use crate::source::SourceId;

/// Unique identifier for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Creates a new random conflict ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Clinical category of a contradiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    /// Different doses for the same drug and indication.
    Dosage,
    /// Disagreement about whether something is contraindicated.
    Contraindication,
    /// Disagreement about a physiological or pharmacological mechanism.
    Mechanism,
    /// Disagreement about treatment choice or efficacy.
    Treatment,
    /// Disagreement about diagnostic criteria or findings.
    Diagnosis,
    /// Disagreement about outcomes, mortality or survival.
    Prognosis,
    /// Anything else.
    Other,
}

impl ConflictType {
    /// Parses a label leniently (case-insensitive, `-`/space tolerant).
    #[must_use]
    pub fn parse_lenient(label: &str) -> Option<Self> {
        let key: String = label
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "dosage" | "dose" | "dosing" => Some(Self::Dosage),
            "contraindication" | "contraindications" => Some(Self::Contraindication),
            "mechanism" => Some(Self::Mechanism),
            "treatment" | "therapy" => Some(Self::Treatment),
            "diagnosis" | "diagnostic" => Some(Self::Diagnosis),
            "prognosis" | "outcome" => Some(Self::Prognosis),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Dosage => "dosage",
            Self::Contraindication => "contraindication",
            Self::Mechanism => "mechanism",
            Self::Treatment => "treatment",
            Self::Diagnosis => "diagnosis",
            Self::Prognosis => "prognosis",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Clinical severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Minor discrepancy.
    Low,
    /// Worth reviewing.
    Medium,
    /// Could change clinical decisions.
    High,
    /// Dosage or contraindication disagreement with life-threatening risk.
    Critical,
}

impl Severity {
    /// Parses a label leniently (case-insensitive).
    #[must_use]
    pub fn parse_lenient(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" | "minor" => Some(Self::Low),
            "medium" | "moderate" => Some(Self::Medium),
            "high" | "major" | "severe" => Some(Self::High),
            "critical" | "life-threatening" | "life_threatening" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// The status of a conflict.
///
/// ```text
/// ACTIVE -> UNDER_REVIEW -> RESOLVED | DISMISSED
/// RESOLVED -> ACTIVE, DISMISSED -> ACTIVE   (reopen)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStatus {
    /// Detected and awaiting review.
    Active,

    /// A reviewer is looking at it.
    UnderReview,

    /// A side was chosen.
    Resolved,

    /// Deemed not a real conflict.
    Dismissed,
}

impl Default for ConflictStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl ConflictStatus {
    /// Returns true if `self -> next` is a legal edge.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::UnderReview)
                | (Self::UnderReview, Self::Resolved | Self::Dismissed)
                | (Self::Resolved | Self::Dismissed, Self::Active)
        )
    }

    /// ACTIVE and UNDER_REVIEW conflicts block duplicate creation for their pair.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Active | Self::UnderReview)
    }

    /// RESOLVED and DISMISSED.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        !self.is_open()
    }
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::UnderReview => write!(f, "under_review"),
            Self::Resolved => write!(f, "resolved"),
            Self::Dismissed => write!(f, "dismissed"),
        }
    }
}

/// How a conflict came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionOrigin {
    /// Found by the detection pipeline (single pair or batch scan).
    Engine,
    /// Found by the pipeline while triaging a user flag.
    UserFlag,
    /// Created when a reviewer approved a flag the pipeline did not confirm.
    FlagApproval,
}

/// A contradiction between two content units from different sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique identifier for this conflict.
    pub id: ConflictId,

    /// Concept both units were filed under, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,

    /// First unit.
    pub unit_a: UnitId,

    /// Second unit.
    pub unit_b: UnitId,

    /// Source of `unit_a`.
    pub source_a: SourceId,

    /// Source of `unit_b`.
    pub source_b: SourceId,

    /// Clinical category.
    pub conflict_type: ConflictType,

    /// Final severity.
    pub severity: Severity,

    /// Confidence in [0, 1] that this is a real contradiction.
    pub confidence: f32,

    /// Human-readable explanation.
    pub description: String,

    /// Suggested way to settle it, if the adjudicator offered one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_suggestion: Option<String>,

    /// Key differences between the two statements.
    #[serde(default)]
    pub key_differences: Vec<String>,

    /// Patterns that fired for this pair.
    #[serde(default)]
    pub patterns: Vec<PatternKind>,

    /// Whether the AI adjudicator contributed to the verdict.
    pub adjudicated: bool,

    /// How the conflict was found.
    pub origin: DetectionOrigin,

    /// Current status.
    pub status: ConflictStatus,

    /// When the conflict was detected.
    pub created_at: DateTime<Utc>,

    /// When it was last resolved or dismissed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Conflict {
    /// Creates an ACTIVE conflict between two units.
    #[must_use]
    pub fn new(
        (unit_a, source_a): (UnitId, SourceId),
        (unit_b, source_b): (UnitId, SourceId),
        conflict_type: ConflictType,
        severity: Severity,
        confidence: f32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            concept: None,
            unit_a,
            unit_b,
            source_a,
            source_b,
            conflict_type,
            severity,
            confidence: clamp_unit(confidence),
            description: description.into(),
            resolution_suggestion: None,
            key_differences: Vec::new(),
            patterns: Vec::new(),
            adjudicated: false,
            origin: DetectionOrigin::Engine,
            status: ConflictStatus::Active,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Sets the concept.
    #[must_use]
    pub fn with_concept(mut self, concept: Option<String>) -> Self {
        self.concept = concept;
        self
    }

    /// Sets the origin.
    #[must_use]
    pub fn with_origin(mut self, origin: DetectionOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Returns the canonical unit pair.
    #[must_use]
    pub fn pair(&self) -> UnitPair {
        UnitPair::new(self.unit_a, self.unit_b)
    }

    /// Returns true if the conflict is ACTIVE or UNDER_REVIEW.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Returns true if the conflict is resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.status == ConflictStatus::Resolved
    }

    /// Returns true if `source` is one of the two sides.
    #[must_use]
    pub fn involves_source(&self, source: SourceId) -> bool {
        self.source_a == source || self.source_b == source
    }

    /// Returns the copy of this conflict after moving to `next`.
    ///
    /// Legality is checked by the lifecycle manager, not here.
    #[must_use]
    pub fn with_status(&self, next: ConflictStatus, at: DateTime<Utc>) -> Self {
        let mut updated = self.clone();
        updated.status = next;
        updated.resolved_at = match next {
            ConflictStatus::Resolved | ConflictStatus::Dismissed => Some(at),
            ConflictStatus::Active | ConflictStatus::UnderReview => None,
        };
        updated
    }
}

impl PartialEq for Conflict {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Conflict {}

impl std::hash::Hash for Conflict {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

pub(crate) fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
