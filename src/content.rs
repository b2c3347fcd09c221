//! Content units: the statements that get compared for contradictions.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::evidence::EvidenceLevel;
use crate::source::SourceId;

/// Unique identifier for a content unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(Uuid);

impl UnitId {
    /// Creates a new random unit ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a unit sits inside its source document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationMeta {
    /// Document or chapter title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,

    /// Section heading.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,

    /// Page number, if paginated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// An immutable statement drawn from a source.
///
/// Units are owned by the external content store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    /// Unique identifier.
    pub id: UnitId,

    /// Owning source.
    pub source_id: SourceId,

    /// Raw statement text.
    pub text: String,

    /// Precomputed embedding, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Location inside the source.
    #[serde(default)]
    pub location: LocationMeta,

    /// Concept this unit was filed under, used as adjudication context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,

    /// Topic/specialty tags of the unit, matched against source specialties.
    #[serde(default)]
    pub topic_tags: Vec<String>,

    /// Explicit per-unit evidence level; overrides the level implied by the
    /// source type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_level: Option<EvidenceLevel>,
}

impl ContentUnit {
    /// Creates a unit with a fresh ID.
    #[must_use]
    pub fn new(source_id: SourceId, text: impl Into<String>) -> Self {
        Self {
            id: UnitId::new(),
            source_id,
            text: text.into(),
            embedding: None,
            location: LocationMeta::default(),
            concept: None,
            topic_tags: Vec::new(),
            evidence_level: None,
        }
    }

    /// Attaches a precomputed embedding.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Sets the concept context.
    #[must_use]
    pub fn with_concept(mut self, concept: impl Into<String>) -> Self {
        self.concept = Some(concept.into());
        self
    }

    /// Replaces the topic tags.
    #[must_use]
    pub fn with_topics<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topic_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the evidence level for this unit.
    #[must_use]
    pub fn with_evidence_level(mut self, level: EvidenceLevel) -> Self {
        self.evidence_level = Some(level);
        self
    }

    /// Sets the location metadata.
    #[must_use]
    pub fn at(mut self, location: LocationMeta) -> Self {
        self.location = location;
        self
    }
}

/// Canonical unordered pair of unit IDs.
///
/// `UnitPair::new(a, b) == UnitPair::new(b, a)`; every dedupe check keys on
/// this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitPair {
    low: UnitId,
    high: UnitId,
}

impl UnitPair {
    /// Builds the canonical pair.
    #[must_use]
    pub fn new(a: UnitId, b: UnitId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    /// Returns both members in canonical order.
    #[must_use]
    pub const fn members(&self) -> (UnitId, UnitId) {
        (self.low, self.high)
    }

    /// Returns true if the pair contains the unit.
    #[must_use]
    pub fn contains(&self, id: UnitId) -> bool {
        self.low == id || self.high == id
    }
}

impl fmt::Display for UnitPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.low, self.high)
    }
}
