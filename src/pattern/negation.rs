//! "X" vs "not X" detection.
//!
//! Two shapes are recognised: indication polarity (one statement allows or
//! recommends what the other contraindicates), and an explicit negator in
//! front of a predicate the other statement asserts.

use std::sync::LazyLock;

use regex::Regex;

use super::{stem, subject_overlap, Detector, PatternKind, PatternMatch};

static RE_CONTRA: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(contraindicated|contra-indicated|contraindication|should\s+be\s+avoided|must\s+be\s+avoided|avoid(?:ed)?|not\s+(?:be\s+)?(?:recommended|indicated|safe|used|given)|should\s+not\s+be\s+(?:used|given)|must\s+not\s+be\s+(?:used|given)|unsafe|never\s+be\s+(?:used|given))\b",
    )
    .ok()
});

static RE_INDICATED: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(indicated|recommended|safe|first[- ]line|preferred|appropriate|should\s+be\s+(?:used|given))\b")
        .ok()
});

const NEGATORS: &[&str] = &[
    "not", "no", "never", "without", "cannot", "isn't", "aren't", "doesn't", "don't", "didn't", "won't",
    "neither", "nor",
];

/// Words skipped between a negator and the predicate it negates.
const AUXILIARIES: &[&str] = &[
    "be", "been", "is", "are", "a", "an", "the", "any", "to", "do", "does", "typically", "usually", "always",
];

/// Polarity words never count as shared subject.
const POLARITY_TERMS: &[&str] = &[
    "contraindicated", "contra-indicated", "contraindication", "avoid", "avoided", "indicated", "recommended",
    "safe", "unsafe", "first-line", "preferred", "appropriate", "used", "given", "line", "first",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polarity {
    Indicated,
    Contraindicated,
}

fn polarity(text: &str) -> Option<(Polarity, String)> {
    if let Some(m) = RE_CONTRA.as_ref().and_then(|re| re.find(text)) {
        return Some((Polarity::Contraindicated, m.as_str().to_string()));
    }
    RE_INDICATED
        .as_ref()
        .and_then(|re| re.find(text))
        .map(|m| (Polarity::Indicated, m.as_str().to_string()))
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'' && c != '-')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Stemmed predicates that directly follow a negator.
fn negated_predicates(words: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for (i, w) in words.iter().enumerate() {
        if !NEGATORS.contains(&w.as_str()) {
            continue;
        }
        if let Some(pred) = words[i + 1..]
            .iter()
            .take(3)
            .find(|n| !AUXILIARIES.contains(&n.as_str()) && !NEGATORS.contains(&n.as_str()))
        {
            out.push(stem(pred));
        }
    }
    out
}

/// Stemmed words not preceded (within three words) by a negator.
fn affirmed(words: &[String]) -> Vec<String> {
    words
        .iter()
        .enumerate()
        .filter(|(i, w)| {
            !NEGATORS.contains(&w.as_str())
                && !words[i.saturating_sub(3)..*i]
                    .iter()
                    .any(|p| NEGATORS.contains(&p.as_str()))
        })
        .map(|(_, w)| stem(w))
        .collect()
}

/// Detects indication polarity flips and explicit negation.
#[derive(Debug, Clone)]
pub struct NegationDetector {
    subject_overlap: f64,
}

impl NegationDetector {
    /// Creates the detector.
    #[must_use]
    pub fn new(subject_overlap: f64) -> Self {
        Self { subject_overlap }
    }

    fn polarity_flip(&self, text_a: &str, text_b: &str) -> Option<PatternMatch> {
        let (pol_a, span_a) = polarity(text_a)?;
        let (pol_b, span_b) = polarity(text_b)?;
        if pol_a == pol_b {
            return None;
        }
        let shared = subject_overlap(text_a, text_b, POLARITY_TERMS);
        if shared < self.subject_overlap {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let strength = (0.8 + 0.15 * shared) as f32;
        Some(
            PatternMatch::new(PatternKind::Negation, strength)
                .with_spans(span_a, span_b)
                .contraindication(),
        )
    }

    fn explicit_negation(&self, text_a: &str, text_b: &str) -> Option<PatternMatch> {
        let words_a = words(text_a);
        let words_b = words(text_b);

        let check = |negated_side: &[String], other: &[String]| -> Option<String> {
            let other_affirmed = affirmed(other);
            negated_predicates(negated_side)
                .into_iter()
                .find(|pred| other_affirmed.contains(pred))
        };

        let (pred, a_negates) = match check(&words_a[..], &words_b[..]) {
            Some(p) => (p, true),
            None => (check(&words_b[..], &words_a[..])?, false),
        };

        let shared = subject_overlap(text_a, text_b, &[pred.as_str()]);
        if shared < self.subject_overlap {
            return None;
        }

        let (span_a, span_b) = if a_negates {
            (format!("not {pred}"), pred.clone())
        } else {
            (pred.clone(), format!("not {pred}"))
        };
        #[allow(clippy::cast_possible_truncation)]
        let strength = (0.65 + 0.25 * shared) as f32;
        Some(PatternMatch::new(PatternKind::Negation, strength).with_spans(span_a, span_b))
    }
}

impl Detector for NegationDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::Negation
    }

    fn detect(&self, text_a: &str, text_b: &str) -> Option<PatternMatch> {
        self.polarity_flip(text_a, text_b)
            .or_else(|| self.explicit_negation(text_a, text_b))
    }
}
