//! Frequency and certainty qualifier disagreement.

use std::sync::LazyLock;

use regex::Regex;

use super::{subject_overlap, Detector, PatternKind, PatternMatch};

/// Qualifiers and how certain they are, 1.0 = always.
const QUALIFIERS: &[(&str, f32)] = &[
    ("always", 1.0),
    ("invariably", 1.0),
    ("universally", 1.0),
    ("usually", 0.8),
    ("typically", 0.8),
    ("generally", 0.8),
    ("mostly", 0.8),
    ("commonly", 0.7),
    ("often", 0.7),
    ("frequently", 0.7),
    ("sometimes", 0.4),
    ("occasionally", 0.35),
    ("may", 0.3),
    ("might", 0.3),
    ("possibly", 0.3),
    ("rarely", 0.1),
    ("seldom", 0.1),
    ("uncommonly", 0.1),
    ("infrequently", 0.1),
    ("never", 0.0),
];

static RE_QUALIFIER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    let alternation = QUALIFIERS
        .iter()
        .map(|(q, _)| *q)
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b({alternation})\b")).ok()
});

fn weight(qualifier: &str) -> Option<f32> {
    let q = qualifier.to_lowercase();
    QUALIFIERS.iter().find(|(k, _)| *k == q).map(|(_, w)| *w)
}

/// First qualifier in the text and its weight.
fn qualifier(text: &str) -> Option<(String, f32)> {
    let m = RE_QUALIFIER.as_ref()?.find(text)?;
    let w = weight(m.as_str())?;
    Some((m.as_str().to_string(), w))
}

/// Detects "usually X" vs "rarely X".
#[derive(Debug, Clone)]
pub struct CertaintyDetector {
    min_gap: f32,
    subject_overlap: f64,
}

impl CertaintyDetector {
    /// Creates the detector.
    #[must_use]
    pub fn new(min_gap: f32, subject_overlap: f64) -> Self {
        Self {
            min_gap,
            subject_overlap,
        }
    }
}

impl Detector for CertaintyDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::CertaintyConflict
    }

    fn detect(&self, text_a: &str, text_b: &str) -> Option<PatternMatch> {
        let (qa, wa) = qualifier(text_a)?;
        let (qb, wb) = qualifier(text_b)?;
        let gap = (wa - wb).abs();
        if gap < self.min_gap {
            return None;
        }

        let qualifiers: Vec<&str> = QUALIFIERS.iter().map(|(q, _)| *q).collect();
        if subject_overlap(text_a, text_b, &qualifiers) < self.subject_overlap {
            return None;
        }

        Some(PatternMatch::new(PatternKind::CertaintyConflict, 0.5 + 0.5 * gap).with_spans(qa, qb))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_CERTAINTY_GAP, DEFAULT_SUBJECT_OVERLAP};

    fn detector() -> CertaintyDetector {
        CertaintyDetector::new(DEFAULT_CERTAINTY_GAP, DEFAULT_SUBJECT_OVERLAP)
    }

    #[test]
    fn usually_vs_rarely() {
        let m = detector()
            .detect("ACE inhibitors usually cause cough", "ACE inhibitors rarely cause cough")
            .unwrap();
        assert_eq!(m.spans_a, vec!["usually".to_string()]);
        assert_eq!(m.spans_b, vec!["rarely".to_string()]);
        assert!((m.strength - 0.85).abs() < 1e-6);
    }

    #[test]
    fn close_qualifiers_agree() {
        assert!(detector()
            .detect("Statins commonly cause myalgia", "Statins often cause myalgia")
            .is_none());
    }

    #[test]
    fn missing_qualifier_is_no_match() {
        assert!(detector()
            .detect("Statins cause myalgia", "Statins rarely cause myalgia")
            .is_none());
    }

    #[test]
    fn unrelated_claims_do_not_match() {
        assert!(detector()
            .detect("Migraine is usually unilateral", "Gout rarely affects the spine")
            .is_none());
    }
}
