//! Engine configuration.
//!
//! Every section deserializes with defaults, so an empty TOML document yields
//! the stock thresholds. Call [`EngineConfig::validate`] after loading by hand;
//! [`EngineConfig::from_toml`] and [`EngineConfig::from_file`] validate for you.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::evidence::CredibilityTables;

/// Minimum cosine similarity for two units to count as the same topic.
pub const DEFAULT_SIMILARITY_GATE: f32 = 0.85;
/// Similarity above which the adjudicator runs even without a pattern match.
pub const DEFAULT_HIGH_SIMILARITY: f32 = 0.92;
/// Relative numeric difference that counts as divergence.
pub const DEFAULT_NUMERIC_DIVERGENCE: f64 = 0.20;
/// Divergence above which a lone numeric match is MEDIUM instead of LOW.
pub const DEFAULT_NUMERIC_MEDIUM_DIVERGENCE: f64 = 0.50;
/// Relative dose difference below which two doses are treated as equal.
pub const DEFAULT_DOSAGE_MIN_DIFFERENCE: f64 = 0.01;
/// Share of content words two statements must share to be about the same subject.
pub const DEFAULT_SUBJECT_OVERLAP: f64 = 0.30;
/// Minimum gap between certainty qualifier weights to count as a disagreement.
pub const DEFAULT_CERTAINTY_GAP: f32 = 0.40;
/// Adjudication deadline.
pub const DEFAULT_ADJUDICATION_TIMEOUT_MS: u64 = 5_000;
/// Adjudication calls allowed to run at once, including ones past their deadline.
pub const DEFAULT_ADJUDICATION_MAX_IN_FLIGHT: usize = 16;
/// Default batch-scan worker count.
pub const DEFAULT_SCAN_CONCURRENCY: usize = 8;
/// Upper bound on batch-scan workers.
pub const DEFAULT_MAX_SCAN_CONCURRENCY: usize = 32;

/// Similarity gate thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Pairs below this cosine similarity are never analysed.
    pub gate_threshold: f32,
    /// Pairs at or above this similarity go to the adjudicator even with no pattern match.
    pub high_similarity_threshold: f32,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            gate_threshold: DEFAULT_SIMILARITY_GATE,
            high_similarity_threshold: DEFAULT_HIGH_SIMILARITY,
        }
    }
}

/// Pattern detector tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Share of content words two statements must share.
    pub subject_overlap_threshold: f64,
    /// Relative difference above which numbers diverge.
    pub numeric_divergence_threshold: f64,
    /// Divergence above which a lone numeric match is MEDIUM.
    pub numeric_medium_divergence: f64,
    /// Relative dose difference treated as "same dose".
    pub dosage_min_relative_difference: f64,
    /// Minimum certainty weight gap.
    pub certainty_min_gap: f32,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            subject_overlap_threshold: DEFAULT_SUBJECT_OVERLAP,
            numeric_divergence_threshold: DEFAULT_NUMERIC_DIVERGENCE,
            numeric_medium_divergence: DEFAULT_NUMERIC_MEDIUM_DIVERGENCE,
            dosage_min_relative_difference: DEFAULT_DOSAGE_MIN_DIFFERENCE,
            certainty_min_gap: DEFAULT_CERTAINTY_GAP,
        }
    }
}

/// Adjudication guard settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjudicationConfig {
    /// Skip the adjudicator entirely when false.
    pub enabled: bool,
    /// Hard deadline for one adjudication call.
    pub timeout_ms: u64,
    /// Cap on calls still running; further pairs fall back to the patterns.
    pub max_in_flight: usize,
}

impl Default for AdjudicationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: DEFAULT_ADJUDICATION_TIMEOUT_MS,
            max_in_flight: DEFAULT_ADJUDICATION_MAX_IN_FLIGHT,
        }
    }
}

/// Pattern-only fallback scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Confidence with a single matched pattern.
    pub fallback_base_confidence: f32,
    /// Added per additional corroborating pattern.
    pub fallback_corroboration_step: f32,
    /// Fallback confidence ceiling.
    pub fallback_confidence_cap: f32,
    /// Distinct patterns required before the fallback may assign CRITICAL.
    pub critical_min_patterns: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            fallback_base_confidence: 0.5,
            fallback_corroboration_step: 0.1,
            fallback_confidence_cap: 0.9,
            critical_min_patterns: 2,
        }
    }
}

/// Evidence comparison thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Score gaps below this always require manual review.
    pub manual_review_score_gap: f64,
    /// Comparisons below this confidence always require manual review.
    pub manual_review_min_confidence: f64,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            manual_review_score_gap: 10.0,
            manual_review_min_confidence: 0.5,
        }
    }
}

/// Batch scan settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Workers used when the caller passes zero.
    pub default_concurrency: usize,
    /// Hard ceiling on workers.
    pub max_concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_concurrency: DEFAULT_SCAN_CONCURRENCY,
            max_concurrency: DEFAULT_MAX_SCAN_CONCURRENCY,
        }
    }
}

impl ScanConfig {
    /// Clamps a requested worker count into `[1, max_concurrency]`.
    #[must_use]
    pub fn effective_concurrency(&self, requested: usize) -> usize {
        let requested = if requested == 0 {
            self.default_concurrency
        } else {
            requested
        };
        requested.clamp(1, self.max_concurrency.max(1))
    }
}

/// Flag intake settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagConfig {
    /// Run the detection pipeline on submitted pairs with no open conflict.
    pub detect_on_submit: bool,
}

impl Default for FlagConfig {
    fn default() -> Self {
        Self {
            detect_on_submit: true,
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Similarity gate.
    pub similarity: SimilarityConfig,
    /// Pattern detectors.
    pub patterns: PatternConfig,
    /// Adjudication guard.
    pub adjudication: AdjudicationConfig,
    /// Fallback scoring.
    pub scoring: ScoringConfig,
    /// Evidence comparison.
    pub evidence: EvidenceConfig,
    /// Credibility tables for the EBM evaluator.
    pub credibility: CredibilityTables,
    /// Batch scanning.
    pub scan: ScanConfig,
    /// Flag intake.
    pub flags: FlagConfig,
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml(source: &str) -> Result<Self, ValidationError> {
        let config: Self = toml::from_str(source).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_toml(&raw)
    }

    /// Checks that every threshold is in range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: String| Err(ValidationError::InvalidConfig { reason });

        let sim = &self.similarity;
        if !(0.0..=1.0).contains(&sim.gate_threshold) {
            return invalid(format!("similarity.gate_threshold {} not in [0, 1]", sim.gate_threshold));
        }
        if !(sim.gate_threshold..=1.0).contains(&sim.high_similarity_threshold) {
            return invalid(format!(
                "similarity.high_similarity_threshold {} must be in [gate_threshold, 1]",
                sim.high_similarity_threshold
            ));
        }

        let p = &self.patterns;
        for (name, value) in [
            ("patterns.subject_overlap_threshold", p.subject_overlap_threshold),
            ("patterns.numeric_divergence_threshold", p.numeric_divergence_threshold),
            ("patterns.numeric_medium_divergence", p.numeric_medium_divergence),
            ("patterns.dosage_min_relative_difference", p.dosage_min_relative_difference),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} {value} not in [0, 1]"));
            }
        }
        if !(0.0..=1.0).contains(&p.certainty_min_gap) {
            return invalid(format!("patterns.certainty_min_gap {} not in [0, 1]", p.certainty_min_gap));
        }

        if self.adjudication.timeout_ms == 0 {
            return invalid("adjudication.timeout_ms must be positive".to_string());
        }
        if self.adjudication.max_in_flight == 0 {
            return invalid("adjudication.max_in_flight must be at least 1".to_string());
        }

        let s = &self.scoring;
        if s.fallback_base_confidence > s.fallback_confidence_cap || s.fallback_confidence_cap > 1.0 {
            return invalid("scoring fallback confidences must satisfy base <= cap <= 1".to_string());
        }

        if self.scan.max_concurrency == 0 {
            return invalid("scan.max_concurrency must be at least 1".to_string());
        }

        self.credibility.validate()
    }
}
