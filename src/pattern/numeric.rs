//! Numeric divergence between measurements in the same unit.
//!
//! Doses are left to the dosage detector; this one covers rates, pressures,
//! concentrations and durations.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::{relative_difference, subject_overlap, Detector, PatternKind, PatternMatch};

static RE_QUANTITY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d+(?:\.\d+)?)\s*(%|percent\b|mmhg\b|bpm\b|beats per minute\b|mmol/l\b|mg/dl\b|meq/l\b|days?\b|weeks?\b|months?\b|years?\b|hours?\b|hrs?\b|minutes?\b|mins?\b)",
    )
    .ok()
});

/// Unit words ignored when comparing subjects.
const UNIT_WORDS: &[&str] = &[
    "percent", "mmhg", "bpm", "beats", "minute", "mmol", "meq", "day", "days", "week", "weeks", "month", "months",
    "year", "years", "hour", "hours", "hr", "hrs", "minutes", "mins",
];

fn canonical_unit(raw: &str) -> String {
    let unit = raw.to_lowercase();
    let unit = unit.trim();
    match unit {
        "%" | "percent" => "%".to_string(),
        "bpm" | "beats per minute" => "bpm".to_string(),
        "day" | "days" => "days".to_string(),
        "week" | "weeks" => "weeks".to_string(),
        "month" | "months" => "months".to_string(),
        "year" | "years" => "years".to_string(),
        "hour" | "hours" | "hr" | "hrs" => "hours".to_string(),
        "minute" | "minutes" | "min" | "mins" => "minutes".to_string(),
        other => other.to_string(),
    }
}

/// Values per canonical unit, with the matched text.
fn quantities(text: &str) -> BTreeMap<String, Vec<(f64, String)>> {
    let mut out: BTreeMap<String, Vec<(f64, String)>> = BTreeMap::new();
    let Some(re) = RE_QUANTITY.as_ref() else {
        return out;
    };
    for caps in re.captures_iter(text) {
        let (Some(value), Some(unit), Some(whole)) = (caps.get(1), caps.get(2), caps.get(0)) else {
            continue;
        };
        if let Ok(v) = value.as_str().parse::<f64>() {
            out.entry(canonical_unit(unit.as_str()))
                .or_default()
                .push((v, whole.as_str().to_string()));
        }
    }
    out
}

/// Detects same-unit values that differ by more than the threshold.
#[derive(Debug, Clone)]
pub struct NumericDivergenceDetector {
    threshold: f64,
    subject_overlap: f64,
}

impl NumericDivergenceDetector {
    /// Creates the detector; `threshold` is a relative difference (0.2 = 20%).
    #[must_use]
    pub fn new(threshold: f64, subject_overlap: f64) -> Self {
        Self {
            threshold,
            subject_overlap,
        }
    }
}

impl Detector for NumericDivergenceDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::NumericDivergence
    }

    fn detect(&self, text_a: &str, text_b: &str) -> Option<PatternMatch> {
        let qa = quantities(text_a);
        let qb = quantities(text_b);

        // Per unit, the closest pair of values; a unit only diverges if even
        // its closest pair is too far apart.
        let mut worst: Option<(f64, &str, &str)> = None;
        for (unit, values_a) in &qa {
            let Some(values_b) = qb.get(unit) else {
                continue;
            };
            let closest = values_a
                .iter()
                .flat_map(|(va, span_a)| {
                    values_b
                        .iter()
                        .map(move |(vb, span_b)| (relative_difference(*va, *vb), span_a.as_str(), span_b.as_str()))
                })
                .min_by(|x, y| x.0.total_cmp(&y.0));
            if let Some(candidate) = closest {
                if worst.map_or(true, |(w, _, _)| candidate.0 > w) {
                    worst = Some(candidate);
                }
            }
        }

        let (divergence, span_a, span_b) = worst?;
        if divergence <= self.threshold {
            return None;
        }
        if subject_overlap(text_a, text_b, UNIT_WORDS) < self.subject_overlap {
            return None;
        }

        #[allow(clippy::cast_possible_truncation)]
        let strength = (0.5 + 0.5 * divergence.min(1.0)) as f32;
        Some(
            PatternMatch::new(PatternKind::NumericDivergence, strength)
                .with_spans(span_a, span_b)
                .with_divergence(divergence),
        )
    }
}
