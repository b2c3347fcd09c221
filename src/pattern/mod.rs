//! Contradiction pattern detectors.
//!
//! Each detector looks at two normalized statements and reports at most one
//! match. Detectors are independent: [`DetectorSet`] runs all of them over
//! the same pair and returns every match, so adding a detector never touches
//! the callers.

mod certainty;
mod dosage;
mod negation;
mod numeric;
mod opposing;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::PatternConfig;

pub use certainty::CertaintyDetector;
pub use dosage::{dose_mentions, DoseMention, DosageDetector};
pub use negation::NegationDetector;
pub use numeric::NumericDivergenceDetector;
pub use opposing::OpposingTermsDetector;

/// The shape of a contradiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternKind {
    /// "X" vs "not X", including indicated vs contraindicated.
    Negation,
    /// Antonyms about the same subject.
    OpposingTerms,
    /// Same unit, values more than the threshold apart.
    NumericDivergence,
    /// Same drug, different dose.
    DosageConflict,
    /// Frequency or certainty qualifiers that disagree.
    CertaintyConflict,
}

impl PatternKind {
    /// All kinds, in detector order.
    pub const ALL: [Self; 5] = [
        Self::Negation,
        Self::OpposingTerms,
        Self::NumericDivergence,
        Self::DosageConflict,
        Self::CertaintyConflict,
    ];
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Negation => "negation",
            Self::OpposingTerms => "opposing_terms",
            Self::NumericDivergence => "numeric_divergence",
            Self::DosageConflict => "dosage_conflict",
            Self::CertaintyConflict => "certainty_conflict",
        };
        f.write_str(s)
    }
}

/// One detector hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    /// Which detector fired.
    pub kind: PatternKind,
    /// Strength in [0, 1].
    pub strength: f32,
    /// Matched text in the first statement.
    pub spans_a: Vec<String>,
    /// Matched text in the second statement.
    pub spans_b: Vec<String>,
    /// True if one side contraindicates what the other allows.
    #[serde(default)]
    pub involves_contraindication: bool,
    /// Relative numeric difference, for numeric and dosage matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub divergence: Option<f64>,
}

impl PatternMatch {
    /// Creates a match with the strength clamped to [0, 1].
    #[must_use]
    pub fn new(kind: PatternKind, strength: f32) -> Self {
        Self {
            kind,
            strength: crate::conflict::clamp_unit(strength),
            spans_a: Vec::new(),
            spans_b: Vec::new(),
            involves_contraindication: false,
            divergence: None,
        }
    }

    /// Records the matched spans.
    #[must_use]
    pub fn with_spans(mut self, a: impl Into<String>, b: impl Into<String>) -> Self {
        self.spans_a.push(a.into());
        self.spans_b.push(b.into());
        self
    }

    /// Marks the match as a contraindication disagreement.
    #[must_use]
    pub fn contraindication(mut self) -> Self {
        self.involves_contraindication = true;
        self
    }

    /// Records the relative divergence.
    #[must_use]
    pub fn with_divergence(mut self, divergence: f64) -> Self {
        self.divergence = Some(divergence);
        self
    }
}

/// A contradiction heuristic.
pub trait Detector: Send + Sync {
    /// Kind reported by this detector.
    fn kind(&self) -> PatternKind;

    /// Inspects two normalized statements.
    fn detect(&self, text_a: &str, text_b: &str) -> Option<PatternMatch>;
}

/// The detectors run for every gated pair.
pub struct DetectorSet {
    detectors: Vec<Box<dyn Detector>>,
}

impl fmt::Debug for DetectorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.detectors.iter().map(|d| d.kind()))
            .finish()
    }
}

impl Default for DetectorSet {
    fn default() -> Self {
        Self::standard(&PatternConfig::default())
    }
}

impl DetectorSet {
    /// The five built-in detectors.
    #[must_use]
    pub fn standard(config: &PatternConfig) -> Self {
        Self::empty()
            .with(NegationDetector::new(config.subject_overlap_threshold))
            .with(OpposingTermsDetector::new(config.subject_overlap_threshold))
            .with(NumericDivergenceDetector::new(
                config.numeric_divergence_threshold,
                config.subject_overlap_threshold,
            ))
            .with(DosageDetector::new(
                config.dosage_min_relative_difference,
                config.subject_overlap_threshold,
            ))
            .with(CertaintyDetector::new(
                config.certainty_min_gap,
                config.subject_overlap_threshold,
            ))
    }

    /// A set with no detectors.
    #[must_use]
    pub fn empty() -> Self {
        Self { detectors: Vec::new() }
    }

    /// Adds a detector.
    #[must_use]
    pub fn with(mut self, detector: impl Detector + 'static) -> Self {
        self.detectors.push(Box::new(detector));
        self
    }

    /// Adds a boxed detector.
    pub fn push(&mut self, detector: Box<dyn Detector>) {
        self.detectors.push(detector);
    }

    /// Number of detectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    /// True if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Runs every detector; matches come back in detector order.
    #[must_use]
    pub fn detect_all(&self, text_a: &str, text_b: &str) -> Vec<PatternMatch> {
        self.detectors
            .iter()
            .filter_map(|d| d.detect(text_a, text_b))
            .collect()
    }
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "are", "was", "were", "been", "being", "has", "have", "had", "this", "that",
    "these", "those", "from", "into", "than", "then", "its", "their", "there", "which", "who", "whom", "when",
    "should", "would", "could", "will", "shall", "can", "does", "did", "doing", "per", "all", "any", "but",
    "not", "nor", "also", "very", "more", "most", "such", "use", "used", "using", "patients", "patient",
];

/// Crude plural stripping so "inhibitors" and "inhibitor" compare equal.
pub(crate) fn stem(word: &str) -> String {
    if word.len() > 4 && word.ends_with("ies") {
        format!("{}y", &word[..word.len() - 3])
    } else if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") && !word.ends_with("us") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// Lowercased, stemmed words longer than two letters, minus stop words,
/// numbers and anything in `exclude`.
pub(crate) fn content_words(text: &str, exclude: &[&str]) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|w| w.trim_matches('-'))
        .filter(|w| w.len() > 2)
        .filter(|w| !w.chars().any(|c| c.is_ascii_digit()))
        .filter(|w| !STOP_WORDS.contains(w))
        .map(stem)
        .filter(|w| !exclude.iter().any(|e| stem(e) == *w))
        .collect()
}

/// Share of the smaller word set found in the larger one.
pub(crate) fn overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    #[allow(clippy::cast_precision_loss)]
    let ratio = shared as f64 / a.len().min(b.len()) as f64;
    ratio
}

/// Overlap of the two statements' content words, ignoring `exclude`.
pub(crate) fn subject_overlap(text_a: &str, text_b: &str, exclude: &[&str]) -> f64 {
    overlap(&content_words(text_a, exclude), &content_words(text_b, exclude))
}

/// Relative difference `|a - b| / max(|a|, |b|)`, 0 when both are 0.
pub(crate) fn relative_difference(a: f64, b: f64) -> f64 {
    let scale = a.abs().max(b.abs());
    if scale <= f64::EPSILON {
        0.0
    } else {
        (a - b).abs() / scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_set_has_five_detectors() {
        let set = DetectorSet::default();
        assert_eq!(set.len(), 5);
        assert_eq!(format!("{set:?}"), format!("{:?}", PatternKind::ALL));
    }

    #[test]
    fn unrelated_statements_match_nothing() {
        let set = DetectorSet::default();
        let hits = set.detect_all(
            "Metformin is first-line therapy for type 2 diabetes mellitus",
            "Warfarin requires regular INR monitoring",
        );
        assert!(hits.is_empty());
    }

    #[test]
    fn content_words_stem_and_filter() {
        let words = content_words("ACE inhibitors are safe in pregnancy", &["safe"]);
        let expected: BTreeSet<String> = ["ace", "inhibitor", "pregnancy"].iter().map(|s| (*s).to_string()).collect();
        assert_eq!(words, expected);
    }

    #[test]
    fn overlap_uses_smaller_set() {
        let a = content_words("aspirin reduces stroke risk", &[]);
        let b = content_words("aspirin reduces stroke risk in elderly women with diabetes", &[]);
        assert!((overlap(&a, &b) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn relative_difference_is_symmetric() {
        assert!((relative_difference(30.0, 50.0) - 0.4).abs() < 1e-9);
        assert!((relative_difference(50.0, 30.0) - 0.4).abs() < 1e-9);
        assert_eq!(relative_difference(0.0, 0.0), 0.0);
    }

    #[test]
    fn normalized_durations_still_diverge() {
        let normalizer = crate::normalize::TextNormalizer::new();
        let a = normalizer.normalize("Give heparin infusion for 24 hr after PCI");
        let b = normalizer.normalize("Give heparin infusion for 72 hr after PCI");
        let hits = DetectorSet::default().detect_all(&a, &b);
        let numeric = hits
            .iter()
            .find(|m| m.kind == PatternKind::NumericDivergence)
            .expect("hour counts should diverge");
        assert_eq!(numeric.spans_a, vec!["24 hr".to_string()]);
    }

    struct Always;

    impl Detector for Always {
        fn kind(&self) -> PatternKind {
            PatternKind::CertaintyConflict
        }

        fn detect(&self, _: &str, _: &str) -> Option<PatternMatch> {
            Some(PatternMatch::new(self.kind(), 2.0))
        }
    }

    #[test]
    fn custom_detectors_plug_in() {
        let set = DetectorSet::empty().with(Always);
        let hits = set.detect_all("a", "b");
        assert_eq!(hits.len(), 1);
        assert!((hits[0].strength - 1.0).abs() < f32::EPSILON);
    }
}
