//! Antonym detection ("increases mortality" vs "decreases mortality").

use std::sync::LazyLock;

use regex::Regex;

use super::{subject_overlap, Detector, PatternKind, PatternMatch};

/// Antonym pairs; each side is a regex fragment covering its word forms.
const ANTONYMS: &[(&str, &str)] = &[
    (r"increas(?:e|es|ed|ing)", r"decreas(?:e|es|ed|ing)"),
    (r"rais(?:e|es|ed|ing)", r"lower(?:s|ed|ing)?"),
    (r"elevat(?:e|es|ed|ing)", r"reduc(?:e|es|ed|ing)"),
    (r"higher", r"lower"),
    (r"safe", r"unsafe"),
    (r"effective", r"ineffective"),
    (r"beneficial", r"harmful"),
    (r"improv(?:e|es|ed|ing)", r"worsen(?:s|ed|ing)?"),
    (r"benign", r"malignant"),
    (r"stimulat(?:e|es|ed|ing)", r"inhibit(?:s|ed|ing)?"),
    (r"activat(?:e|es|ed|ing)", r"suppress(?:es|ed|ing)?"),
    (r"agonist", r"antagonist"),
    (r"vasodilation", r"vasoconstriction"),
    (r"hyperkalemia", r"hypokalemia"),
    (r"hypernatremia", r"hyponatremia"),
    (r"hyperglycemia", r"hypoglycemia"),
    (r"hypertension", r"hypotension"),
    (r"tachycardia", r"bradycardia"),
    (r"present", r"absent"),
    (r"positive", r"negative"),
    (r"sensitive", r"resistant"),
];

struct AntonymPair {
    left: Regex,
    right: Regex,
}

static PAIRS: LazyLock<Vec<AntonymPair>> = LazyLock::new(|| {
    ANTONYMS
        .iter()
        .filter_map(|(l, r)| {
            let left = Regex::new(&format!(r"(?i)\b{l}\b")).ok()?;
            let right = Regex::new(&format!(r"(?i)\b{r}\b")).ok()?;
            Some(AntonymPair { left, right })
        })
        .collect()
});

/// Detects antonym pairs about the same subject.
#[derive(Debug, Clone)]
pub struct OpposingTermsDetector {
    subject_overlap: f64,
}

impl OpposingTermsDetector {
    /// Creates the detector.
    #[must_use]
    pub fn new(subject_overlap: f64) -> Self {
        Self { subject_overlap }
    }
}

impl Detector for OpposingTermsDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::OpposingTerms
    }

    fn detect(&self, text_a: &str, text_b: &str) -> Option<PatternMatch> {
        for pair in PAIRS.iter() {
            // One side uses the left term and not the right, the other the reverse.
            let spans = match (
                pair.left.find(text_a),
                pair.right.find(text_a),
                pair.left.find(text_b),
                pair.right.find(text_b),
            ) {
                (Some(a), None, None, Some(b)) | (None, Some(a), Some(b), None) => {
                    (a.as_str().to_string(), b.as_str().to_string())
                }
                _ => continue,
            };

            let exclude = [spans.0.as_str(), spans.1.as_str()];
            let shared = subject_overlap(text_a, text_b, &exclude);
            if shared < self.subject_overlap {
                continue;
            }

            #[allow(clippy::cast_possible_truncation)]
            let strength = (0.6 + 0.3 * shared) as f32;
            return Some(PatternMatch::new(PatternKind::OpposingTerms, strength).with_spans(spans.0, spans.1));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SUBJECT_OVERLAP;

    fn detector() -> OpposingTermsDetector {
        OpposingTermsDetector::new(DEFAULT_SUBJECT_OVERLAP)
    }

    #[test]
    fn increases_vs_decreases() {
        let m = detector()
            .detect(
                "Early beta blockade increases mortality in cardiogenic shock",
                "Early beta blockade decreases mortality in cardiogenic shock",
            )
            .unwrap();
        assert_eq!(m.spans_a, vec!["increases".to_string()]);
        assert_eq!(m.spans_b, vec!["decreases".to_string()]);
        assert!(m.strength >= 0.85);
    }

    #[test]
    fn reversed_order_is_detected() {
        let m = detector()
            .detect("Spironolactone causes hypokalemia", "Spironolactone causes hyperkalemia")
            .unwrap();
        assert_eq!(m.spans_a, vec!["hypokalemia".to_string()]);
    }

    #[test]
    fn unsafe_does_not_match_safe_inside_word() {
        assert!(detector()
            .detect("Drug X is unsafe in renal failure", "Drug X is unsafe in hepatic failure")
            .is_none());
    }

    #[test]
    fn different_subjects_do_not_match() {
        assert!(detector()
            .detect("Exercise increases insulin sensitivity", "Smoking decreases life expectancy")
            .is_none());
    }
}
