//! Source and provenance types.
//!
//! Every content unit belongs to exactly one source. The source's type, base
//! credibility, publication date and peer-review status drive the evidence
//! ranking used to decide which side of a conflict to trust.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(Uuid);

impl SourceId {
    /// Creates a new random source ID.
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

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of publication a source is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    /// Clinical practice guideline.
    Guideline,
    /// Peer-reviewed journal article.
    Journal,
    /// Curated reference section (e.g. a maintained point-of-care summary).
    CuratedReference,
    /// Textbook chapter.
    Textbook,
    /// Lecture notes or slides.
    Lecture,
    /// Notes written by a learner.
    UserNotes,
}

impl SourceType {
    /// All source types, strongest evidence first.
    pub const ALL: [Self; 6] = [
        Self::Guideline,
        Self::Journal,
        Self::CuratedReference,
        Self::Textbook,
        Self::Lecture,
        Self::UserNotes,
    ];

    /// Returns a stable lowercase label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Guideline => "guideline",
            Self::Journal => "journal",
            Self::CuratedReference => "curated_reference",
            Self::Textbook => "textbook",
            Self::Lecture => "lecture",
            Self::UserNotes => "user_notes",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A publication that content units are drawn from.
///
/// Sources are owned by the external source registry; the engine only reads
/// them.
///
/// # Examples
///
/// ```
/// use medconflict::{Source, SourceType};
///
/// let source = Source::new("ESC Heart Failure Guideline", SourceType::Guideline, 90)
///     .with_peer_review(true)
///     .with_specialties(["cardiology"]);
/// assert_eq!(source.base_credibility, 90);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Unique identifier.
    pub id: SourceId,

    /// Human-readable title.
    pub title: String,

    /// Publication kind.
    pub source_type: SourceType,

    /// Registry-assigned credibility in [0, 100].
    pub base_credibility: u8,

    /// Publication date, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,

    /// Specialty tags (e.g. "cardiology").
    #[serde(default)]
    pub specialty_tags: Vec<String>,

    /// Whether the source went through peer review.
    #[serde(default)]
    pub peer_reviewed: bool,
}

impl Source {
    /// Creates a source with a fresh ID. Credibility is capped at 100.
    #[must_use]
    pub fn new(title: impl Into<String>, source_type: SourceType, base_credibility: u8) -> Self {
        Self {
            id: SourceId::new(),
            title: title.into(),
            source_type,
            base_credibility: base_credibility.min(100),
            published_at: None,
            specialty_tags: Vec::new(),
            peer_reviewed: false,
        }
    }

    /// Sets the publication date.
    #[must_use]
    pub fn published(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }

    /// Sets the peer-review flag.
    #[must_use]
    pub fn with_peer_review(mut self, peer_reviewed: bool) -> Self {
        self.peer_reviewed = peer_reviewed;
        self
    }

    /// Replaces the specialty tags.
    #[must_use]
    pub fn with_specialties<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.specialty_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if the source carries the given specialty tag (case-insensitive).
    #[must_use]
    pub fn has_specialty(&self, tag: &str) -> bool {
        self.specialty_tags
            .iter()
            .any(|t| t.trim().eq_ignore_ascii_case(tag.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credibility_is_capped() {
        let source = Source::new("notes", SourceType::UserNotes, 250);
        assert_eq!(source.base_credibility, 100);
    }

    #[test]
    fn specialty_match_ignores_case() {
        let source = Source::new("t", SourceType::Textbook, 70).with_specialties(["Cardiology"]);
        assert!(source.has_specialty("cardiology"));
        assert!(!source.has_specialty("nephrology"));
    }

    #[test]
    fn source_type_serializes_screaming_case() {
        let json = serde_json::to_string(&SourceType::CuratedReference).unwrap();
        assert_eq!(json, "\"CURATED_REFERENCE\"");
    }
}
