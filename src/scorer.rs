//! Merges pattern matches and the adjudicator verdict into a final
//! classification.
//!
//! Severity only ever moves up: each pattern kind implies a floor (see
//! [`severity_floor`]) that an adjudicator verdict cannot undercut. CRITICAL
//! is reserved for dosage and contraindication conflicts.

use serde::{Deserialize, Serialize};

use crate::adjudicator::Adjudication;
use crate::config::{ScoringConfig, DEFAULT_NUMERIC_MEDIUM_DIVERGENCE};
use crate::conflict::{clamp_unit, ConflictType, Severity};
use crate::pattern::{PatternKind, PatternMatch};

/// Words marking a life-threatening consequence.
const LIFE_THREAT_TERMS: &[&str] = &[
    "fatal",
    "death",
    "lethal",
    "life-threatening",
    "life threatening",
    "teratogenic",
    "fetal",
    "pregnancy",
    "anaphylaxis",
    "anaphylactic",
    "overdose",
    "toxicity",
    "respiratory depression",
    "cardiac arrest",
    "arrhythmia",
    "hemorrhage",
    "haemorrhage",
    "bleeding",
    "hyperkalemia",
    "serotonin syndrome",
];

const CONTRAINDICATION_TERMS: &[&str] = &["contraindicat", "avoid", "unsafe", "do not use", "should not be used"];
const MECHANISM_TERMS: &[&str] = &["mechanism", "inhibit", "receptor", "pathway", "mediated", "binds", "blocks", "enzyme"];
const PROGNOSIS_TERMS: &[&str] = &["mortality", "survival", "prognosis", "outcome", "recurrence", "relapse", "remission"];
const DIAGNOSIS_TERMS: &[&str] = &[
    "diagnos", "criteria", "sensitivity", "specificity", "test", "finding", "presents with", "sign", "symptom",
];
const TREATMENT_TERMS: &[&str] = &[
    "treat", "therapy", "first-line", "management", "drug of choice", "recommended", "indicated", "prescribe",
];

/// Severity implied by a match on its own. Numeric divergence counts as
/// MEDIUM above `numeric_medium_divergence`.
#[must_use]
pub fn implied_severity(m: &PatternMatch, numeric_medium_divergence: f64) -> Severity {
    match m.kind {
        PatternKind::DosageConflict | PatternKind::Negation => Severity::High,
        PatternKind::OpposingTerms | PatternKind::CertaintyConflict => Severity::Medium,
        PatternKind::NumericDivergence => {
            if m.divergence.is_some_and(|d| d > numeric_medium_divergence) {
                Severity::Medium
            } else {
                Severity::Low
            }
        }
    }
}

/// Floor a match puts under an adjudicated severity.
#[must_use]
pub fn severity_floor(m: &PatternMatch) -> Severity {
    match m.kind {
        PatternKind::DosageConflict => Severity::High,
        PatternKind::Negation if m.involves_contraindication => Severity::High,
        _ => Severity::Low,
    }
}

fn is_dosage_or_contraindication(m: &PatternMatch) -> bool {
    m.kind == PatternKind::DosageConflict || (m.kind == PatternKind::Negation && m.involves_contraindication)
}

fn mentions_any(text: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| text.contains(t))
}

/// True if either statement names a life-threatening consequence.
#[must_use]
pub fn mentions_life_threat(text_a: &str, text_b: &str) -> bool {
    let a = text_a.to_lowercase();
    let b = text_b.to_lowercase();
    mentions_any(&a, LIFE_THREAT_TERMS) || mentions_any(&b, LIFE_THREAT_TERMS)
}

/// Clinical category from the matches and the wording.
#[must_use]
pub fn infer_type(matches: &[PatternMatch], text_a: &str, text_b: &str) -> ConflictType {
    if matches.iter().any(|m| m.kind == PatternKind::DosageConflict) {
        return ConflictType::Dosage;
    }
    if matches.iter().any(|m| m.involves_contraindication) {
        return ConflictType::Contraindication;
    }

    let text = format!("{} {}", text_a.to_lowercase(), text_b.to_lowercase());
    if mentions_any(&text, CONTRAINDICATION_TERMS) {
        ConflictType::Contraindication
    } else if mentions_any(&text, MECHANISM_TERMS) {
        ConflictType::Mechanism
    } else if mentions_any(&text, PROGNOSIS_TERMS) {
        ConflictType::Prognosis
    } else if mentions_any(&text, DIAGNOSIS_TERMS) {
        ConflictType::Diagnosis
    } else if mentions_any(&text, TREATMENT_TERMS) {
        ConflictType::Treatment
    } else {
        ConflictType::Other
    }
}

/// Final classification of a pair judged to conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    /// Clinical category.
    pub conflict_type: ConflictType,
    /// Final severity.
    pub severity: Severity,
    /// Final confidence in [0, 1].
    pub confidence: f32,
    /// Human-readable explanation.
    pub description: String,
    /// Suggested resolution, from the adjudicator.
    pub resolution_suggestion: Option<String>,
    /// Key differences between the statements.
    pub key_differences: Vec<String>,
    /// Pattern kinds that fired.
    pub patterns: Vec<PatternKind>,
    /// True if the adjudicator verdict was used.
    pub adjudicated: bool,
}

/// Combines the pipeline signals into an [`Assessment`].
#[derive(Debug, Clone)]
pub struct ConflictScorer {
    config: ScoringConfig,
    numeric_medium_divergence: f64,
}

impl Default for ConflictScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default(), DEFAULT_NUMERIC_MEDIUM_DIVERGENCE)
    }
}

impl ConflictScorer {
    /// Creates a scorer.
    #[must_use]
    pub fn new(config: ScoringConfig, numeric_medium_divergence: f64) -> Self {
        Self {
            config,
            numeric_medium_divergence,
        }
    }

    /// Scores a pair. `None` means no conflict: the adjudicator said so, or
    /// it was unavailable and no pattern fired.
    #[must_use]
    pub fn score(
        &self,
        matches: &[PatternMatch],
        adjudication: &Adjudication,
        text_a: &str,
        text_b: &str,
    ) -> Option<Assessment> {
        match adjudication {
            Adjudication::Model(verdict) => {
                if !verdict.is_conflict {
                    return None;
                }
                let conflict_type = verdict
                    .conflict_type
                    .unwrap_or_else(|| infer_type(matches, text_a, text_b));

                let floor = matches.iter().map(severity_floor).max().unwrap_or(Severity::Low);
                let mut severity = verdict.severity.max(floor);
                let critical_allowed = matches!(conflict_type, ConflictType::Dosage | ConflictType::Contraindication)
                    || matches.iter().any(is_dosage_or_contraindication);
                if severity == Severity::Critical && !critical_allowed {
                    severity = Severity::High;
                }

                let key_differences = if verdict.key_differences.is_empty() {
                    span_differences(matches)
                } else {
                    verdict.key_differences.clone()
                };

                Some(Assessment {
                    conflict_type,
                    severity,
                    confidence: clamp_unit(verdict.confidence),
                    description: verdict.explanation.clone(),
                    resolution_suggestion: verdict.resolution_suggestion.clone(),
                    key_differences,
                    patterns: kinds(matches),
                    adjudicated: true,
                })
            }
            Adjudication::PatternOnly { .. } => self.fallback(matches, text_a, text_b),
        }
    }

    fn fallback(&self, matches: &[PatternMatch], text_a: &str, text_b: &str) -> Option<Assessment> {
        let strongest = matches.iter().max_by(|a, b| a.strength.total_cmp(&b.strength))?;

        #[allow(clippy::cast_precision_loss)]
        let corroborating = (matches.len() - 1) as f32;
        let confidence = (self.config.fallback_base_confidence + self.config.fallback_corroboration_step * corroborating)
            .min(self.config.fallback_confidence_cap);

        let mut severity = matches
            .iter()
            .map(|m| implied_severity(m, self.numeric_medium_divergence))
            .max()
            .unwrap_or(Severity::Low);
        if is_dosage_or_contraindication(strongest)
            && matches.len() >= self.config.critical_min_patterns
            && mentions_life_threat(text_a, text_b)
        {
            severity = Severity::Critical;
        }

        let described: Vec<String> = matches
            .iter()
            .map(|m| match (m.spans_a.first(), m.spans_b.first()) {
                (Some(a), Some(b)) => format!("{} ('{a}' vs '{b}')", m.kind),
                _ => m.kind.to_string(),
            })
            .collect();

        Some(Assessment {
            conflict_type: infer_type(matches, text_a, text_b),
            severity,
            confidence: clamp_unit(confidence),
            description: format!("Pattern-only detection: {}", described.join(", ")),
            resolution_suggestion: None,
            key_differences: span_differences(matches),
            patterns: kinds(matches),
            adjudicated: false,
        })
    }
}

fn kinds(matches: &[PatternMatch]) -> Vec<PatternKind> {
    matches.iter().map(|m| m.kind).collect()
}

fn span_differences(matches: &[PatternMatch]) -> Vec<String> {
    matches
        .iter()
        .filter_map(|m| match (m.spans_a.first(), m.spans_b.first()) {
            (Some(a), Some(b)) => Some(format!("{a} vs {b}")),
            _ => None,
        })
        .collect()
}
