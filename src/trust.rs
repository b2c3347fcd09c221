//! Per-user source preferences.
//!
//! A preference shifts a source's evidence score for one user without touching
//! the registry credibility. BLOCKED removes the source from consideration.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::source::SourceId;

/// How much a user trusts a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustLevel {
    /// +10.
    High,
    /// No change.
    Medium,
    /// -10.
    Low,
    /// -100; the source is only considered if nothing else is left.
    Blocked,
}

impl TrustLevel {
    /// Score adjustment for this level.
    #[must_use]
    pub const fn adjustment(self) -> f64 {
        match self {
            Self::High => 10.0,
            Self::Medium => 0.0,
            Self::Low => -10.0,
            Self::Blocked => -100.0,
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// A user's override of the default ranking for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePreference {
    /// Owning user.
    pub user_id: String,
    /// Source the preference applies to.
    pub source_id: SourceId,
    /// Trust level.
    pub trust_level: TrustLevel,
    /// Rank among the user's preferences, 1 first.
    pub priority_rank: u32,
    /// Free-form notes.
    #[serde(default)]
    pub notes: String,
}

impl SourcePreference {
    /// Creates a preference with rank 1 and no notes.
    #[must_use]
    pub fn new(user_id: impl Into<String>, source_id: SourceId, trust_level: TrustLevel) -> Self {
        Self {
            user_id: user_id.into(),
            source_id,
            trust_level,
            priority_rank: 1,
            notes: String::new(),
        }
    }

    /// Sets the priority rank.
    #[must_use]
    pub fn ranked(mut self, priority_rank: u32) -> Self {
        self.priority_rank = priority_rank;
        self
    }
}

/// Adjustment applied to one side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceAdjustment {
    /// Adjusted source.
    pub source_id: SourceId,
    /// Trust level that applied (MEDIUM when the user has no preference).
    pub trust_level: TrustLevel,
    /// Priority rank of the preference that applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_rank: Option<u32>,
    /// Evidence score before adjustment.
    pub base_score: f64,
    /// Evidence score after adjustment.
    pub adjusted_score: f64,
}

/// A user's preferences indexed by source.
///
/// When several preferences name the same source, the one with the lowest
/// priority rank wins.
#[derive(Debug, Clone, Default)]
pub struct PreferenceSet {
    by_source: HashMap<SourceId, SourcePreference>,
}

impl PreferenceSet {
    /// Builds the index.
    #[must_use]
    pub fn new(preferences: Vec<SourcePreference>) -> Self {
        let mut by_source: HashMap<SourceId, SourcePreference> = HashMap::with_capacity(preferences.len());
        for pref in preferences {
            match by_source.get(&pref.source_id) {
                Some(existing) if existing.priority_rank <= pref.priority_rank => {}
                _ => {
                    by_source.insert(pref.source_id, pref);
                }
            }
        }
        Self { by_source }
    }

    /// Preference for a source, if any.
    #[must_use]
    pub fn get(&self, source: SourceId) -> Option<&SourcePreference> {
        self.by_source.get(&source)
    }

    /// Effective trust level (MEDIUM when unset).
    #[must_use]
    pub fn trust_level(&self, source: SourceId) -> TrustLevel {
        self.get(source).map_or(TrustLevel::Medium, |p| p.trust_level)
    }

    /// Applies the user's preference to a base score.
    #[must_use]
    pub fn adjust(&self, source: SourceId, base_score: f64) -> PreferenceAdjustment {
        let pref = self.get(source);
        let trust_level = pref.map_or(TrustLevel::Medium, |p| p.trust_level);
        PreferenceAdjustment {
            source_id: source,
            trust_level,
            priority_rank: pref.map(|p| p.priority_rank),
            base_score,
            adjusted_score: base_score + trust_level.adjustment(),
        }
    }

    /// True when the user has no preferences at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}
