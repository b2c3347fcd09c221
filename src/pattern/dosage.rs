//! Dose disagreement for the same drug.
//!
//! A dose is a drug-like word directly followed by an amount and a mass or
//! unit suffix ("aspirin 81mg", "heparin 5000 units"), or the reverse order
//! ("81 mg of aspirin"). Masses are compared in milligrams.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::{relative_difference, subject_overlap, Detector, PatternKind, PatternMatch};

static RE_DRUG_DOSE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z][a-z\-]{2,})\s+(\d+(?:\.\d+)?)\s*(mg|mcg|g|units|iu)\b").ok()
});

static RE_DOSE_OF_DRUG: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+(?:\.\d+)?)\s*(mg|mcg|g|units|iu)\s+(?:of\s+)?([a-z][a-z\-]{2,})\b").ok()
});

/// Words that sit next to doses but are not drugs.
const NOT_DRUGS: &[&str] = &[
    "take", "takes", "taken", "give", "given", "dose", "doses", "dosage", "daily", "once", "twice", "per", "oral",
    "orally", "intravenous", "intramuscular", "and", "then", "from", "with", "start", "starting", "initial",
    "initially", "maximum", "max", "loading", "maintenance", "bolus", "about", "approximately", "over", "under",
    "than", "was", "were", "every", "each", "plus", "the", "for", "dosed", "total", "up", "least", "most",
    "weekly", "nightly", "hourly", "tablet", "tablets", "capsule", "capsules", "single", "subcutaneous",
    "subcutaneously", "intravenously", "intramuscularly", "morning", "evening", "night", "bedtime", "mouth", "day",
    "days", "week", "weeks", "hours", "immediately", "stat",
];

/// Dose unit class; masses and units are never compared with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum DoseClass {
    Mass,
    Units,
}

/// One drug dose found in a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct DoseMention {
    /// Lowercased drug word.
    pub drug: String,
    /// Amount in milligrams for masses, in units otherwise.
    pub amount: f64,
    /// Matched text.
    pub span: String,
    class: DoseClass,
}

fn normalize_amount(value: f64, unit: &str) -> (f64, DoseClass) {
    match unit.to_lowercase().as_str() {
        "mcg" => (value / 1000.0, DoseClass::Mass),
        "g" => (value * 1000.0, DoseClass::Mass),
        "units" | "iu" => (value, DoseClass::Units),
        _ => (value, DoseClass::Mass),
    }
}

/// Extracts every drug dose in a statement.
#[must_use]
pub fn dose_mentions(text: &str) -> Vec<DoseMention> {
    let mut out = Vec::new();
    let mut push = |drug: &str, value: &str, unit: &str, span: &str| {
        let drug = drug.to_lowercase();
        if NOT_DRUGS.contains(&drug.as_str()) {
            return;
        }
        let Ok(value) = value.parse::<f64>() else {
            return;
        };
        let (amount, class) = normalize_amount(value, unit);
        out.push(DoseMention {
            drug,
            amount,
            span: span.to_string(),
            class,
        });
    };

    if let Some(re) = RE_DRUG_DOSE.as_ref() {
        for caps in re.captures_iter(text) {
            if let (Some(d), Some(v), Some(u), Some(all)) = (caps.get(1), caps.get(2), caps.get(3), caps.get(0)) {
                push(d.as_str(), v.as_str(), u.as_str(), all.as_str());
            }
        }
    }
    if let Some(re) = RE_DOSE_OF_DRUG.as_ref() {
        for caps in re.captures_iter(text) {
            if let (Some(v), Some(u), Some(d), Some(all)) = (caps.get(1), caps.get(2), caps.get(3), caps.get(0)) {
                push(d.as_str(), v.as_str(), u.as_str(), all.as_str());
            }
        }
    }
    out
}

fn by_drug(mentions: Vec<DoseMention>) -> BTreeMap<(String, DoseClass), Vec<DoseMention>> {
    let mut map: BTreeMap<(String, DoseClass), Vec<DoseMention>> = BTreeMap::new();
    for m in mentions {
        map.entry((m.drug.clone(), m.class)).or_default().push(m);
    }
    map
}

/// Detects the same drug named with different doses.
///
/// The indication context does not gate the match: a shared context only
/// raises its strength, and telling "prophylactic vs acute" apart is left to
/// the adjudicator.
#[derive(Debug, Clone)]
pub struct DosageDetector {
    min_relative_difference: f64,
    subject_overlap: f64,
}

impl DosageDetector {
    /// Creates the detector.
    #[must_use]
    pub fn new(min_relative_difference: f64, subject_overlap: f64) -> Self {
        Self {
            min_relative_difference,
            subject_overlap,
        }
    }
}

impl Detector for DosageDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::DosageConflict
    }

    fn detect(&self, text_a: &str, text_b: &str) -> Option<PatternMatch> {
        let doses_a = by_drug(dose_mentions(text_a));
        let doses_b = by_drug(dose_mentions(text_b));

        let mut best: Option<(f64, &DoseMention, &DoseMention)> = None;
        for (key, list_a) in &doses_a {
            let Some(list_b) = doses_b.get(key) else {
                continue;
            };
            // Any identical dose on both sides means they agree on this drug.
            let closest = list_a
                .iter()
                .flat_map(|a| list_b.iter().map(move |b| (relative_difference(a.amount, b.amount), a, b)))
                .min_by(|x, y| x.0.total_cmp(&y.0));
            if let Some(candidate) = closest {
                if candidate.0 > self.min_relative_difference && best.map_or(true, |(d, _, _)| candidate.0 > d) {
                    best = Some(candidate);
                }
            }
        }

        let (difference, dose_a, dose_b) = best?;

        let mut exclude: Vec<&str> = vec![dose_a.drug.as_str(), "mg", "mcg", "units"];
        exclude.extend(NOT_DRUGS.iter().copied());
        let same_context = subject_overlap(text_a, text_b, &exclude) >= self.subject_overlap;

        let mut strength = 0.75f32;
        if same_context {
            strength += 0.15;
        }
        if difference >= 0.5 {
            strength += 0.1;
        }

        Some(
            PatternMatch::new(PatternKind::DosageConflict, strength)
                .with_spans(dose_a.span.clone(), dose_b.span.clone())
                .with_divergence(difference),
        )
    }
}
