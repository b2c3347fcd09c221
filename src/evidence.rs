//! Evidence-based-medicine ranking of sources.
//!
//! A source's credibility score is its registry credibility plus bonuses for
//! recency, specialty match and peer review. The evidence level comes from the
//! source type unless the unit carries an explicit override. Two sides of a
//! conflict are compared on score, with the evidence-level gap feeding the
//! comparison confidence.
//!
//! The lookup tables live in [`CredibilityTables`], an immutable value injected
//! into [`EbmEvaluator`], so alternate tables can be swapped in per evaluator.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EvidenceConfig;
use crate::error::ValidationError;
use crate::source::{Source, SourceId, SourceType};

/// Oxford-CEBM style evidence level, I strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EvidenceLevel {
    /// Systematic reviews and guidelines.
    I,
    /// Journal articles and curated references.
    II,
    /// Textbooks.
    III,
    /// Lectures.
    IV,
    /// Notes and expert opinion.
    V,
}

impl EvidenceLevel {
    /// Numeric rank, 1 (strongest) to 5.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::I => 1,
            Self::II => 2,
            Self::III => 3,
            Self::IV => 4,
            Self::V => 5,
        }
    }
}

impl fmt::Display for EvidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::I => "I",
            Self::II => "II",
            Self::III => "III",
            Self::IV => "IV",
            Self::V => "V",
        };
        f.write_str(s)
    }
}

/// Recommendation grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    /// Level I with score >= 90.
    A,
    /// Level II/III with score >= 75.
    B,
    /// Level IV with score >= 60.
    C,
    /// Everything else.
    D,
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        };
        f.write_str(s)
    }
}

/// Evidence level assigned to each source type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelTable {
    /// Level for guidelines.
    pub guideline: EvidenceLevel,
    /// Level for journal articles.
    pub journal: EvidenceLevel,
    /// Level for curated references.
    pub curated_reference: EvidenceLevel,
    /// Level for textbooks.
    pub textbook: EvidenceLevel,
    /// Level for lectures.
    pub lecture: EvidenceLevel,
    /// Level for user notes.
    pub user_notes: EvidenceLevel,
}

impl Default for LevelTable {
    fn default() -> Self {
        Self {
            guideline: EvidenceLevel::I,
            journal: EvidenceLevel::II,
            curated_reference: EvidenceLevel::II,
            textbook: EvidenceLevel::III,
            lecture: EvidenceLevel::IV,
            user_notes: EvidenceLevel::V,
        }
    }
}

impl LevelTable {
    /// Level for a source type.
    #[must_use]
    pub const fn level_for(&self, source_type: SourceType) -> EvidenceLevel {
        match source_type {
            SourceType::Guideline => self.guideline,
            SourceType::Journal => self.journal,
            SourceType::CuratedReference => self.curated_reference,
            SourceType::Textbook => self.textbook,
            SourceType::Lecture => self.lecture,
            SourceType::UserNotes => self.user_notes,
        }
    }
}

/// One step of the recency curve: sources younger than `max_age_years` get `bonus`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecencyBand {
    /// Exclusive upper age bound in years.
    pub max_age_years: f64,
    /// Bonus points.
    pub bonus: u8,
}

/// Immutable credibility tables consumed by [`EbmEvaluator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredibilityTables {
    /// Bonus when every context specialty matches the source.
    pub specialty_bonus_max: u8,
    /// Bonus for peer-reviewed sources.
    pub peer_review_bonus: u8,
    /// Source type to evidence level.
    pub levels: LevelTable,
    /// Recency curve, ascending by age. Older than the last band earns nothing.
    pub recency: Vec<RecencyBand>,
}

impl Default for CredibilityTables {
    fn default() -> Self {
        Self {
            specialty_bonus_max: 10,
            peer_review_bonus: 10,
            levels: LevelTable::default(),
            recency: vec![
                RecencyBand { max_age_years: 1.0, bonus: 10 },
                RecencyBand { max_age_years: 2.0, bonus: 7 },
                RecencyBand { max_age_years: 5.0, bonus: 4 },
                RecencyBand { max_age_years: 10.0, bonus: 2 },
            ],
        }
    }
}

impl CredibilityTables {
    /// Checks the recency curve is ascending and bonuses are within 0..=10.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.specialty_bonus_max > 10 || self.peer_review_bonus > 10 {
            return Err(ValidationError::InvalidConfig {
                reason: "specialty and peer-review bonuses must be within 0..=10".to_string(),
            });
        }
        let ascending = self
            .recency
            .windows(2)
            .all(|w| w[0].max_age_years < w[1].max_age_years);
        if !ascending {
            return Err(ValidationError::InvalidConfig {
                reason: "recency bands must be strictly ascending by age".to_string(),
            });
        }
        Ok(())
    }

    /// Recency bonus for a source of the given age.
    #[must_use]
    pub fn recency_bonus(&self, age_years: f64) -> u8 {
        let age = age_years.max(0.0);
        self.recency
            .iter()
            .find(|band| age < band.max_age_years)
            .map_or(0, |band| band.bonus)
    }
}

/// Score breakdown for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEvaluation {
    /// Evaluated source.
    pub source_id: SourceId,
    /// Evidence level (after any per-unit override).
    pub evidence_level: EvidenceLevel,
    /// Total score in [0, 100].
    pub score: u8,
    /// Recommendation grade.
    pub grade: Grade,
    /// Registry credibility.
    pub base_credibility: u8,
    /// Recency bonus.
    pub recency_bonus: u8,
    /// Specialty bonus.
    pub specialty_bonus: u8,
    /// Peer-review bonus.
    pub peer_review_bonus: u8,
}

/// Which side of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The conflict's `unit_a` side.
    A,
    /// The conflict's `unit_b` side.
    B,
}

/// Outcome of weighing two scored sides against each other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weighing {
    /// Winning side; `None` on an exact tie.
    pub preferred: Option<Side>,
    /// Absolute score gap.
    pub score_difference: f64,
    /// Absolute evidence-level gap.
    pub level_difference: u8,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// True when the call is too close to automate.
    pub requires_manual_review: bool,
}

/// Weighs two sides.
///
/// `confidence = score_gap / 100 + level_gap / 5`, clamped to [0, 1]. Higher
/// score wins; equal scores fall back to the stronger evidence level.
#[must_use]
pub fn weigh(
    (score_a, level_a): (f64, EvidenceLevel),
    (score_b, level_b): (f64, EvidenceLevel),
    config: &EvidenceConfig,
) -> Weighing {
    let score_difference = (score_a - score_b).abs();
    let level_difference = level_a.rank().abs_diff(level_b.rank());
    let confidence = (score_difference / 100.0 + f64::from(level_difference) / 5.0).clamp(0.0, 1.0);

    let preferred = if score_a > score_b {
        Some(Side::A)
    } else if score_b > score_a {
        Some(Side::B)
    } else if level_a < level_b {
        Some(Side::A)
    } else if level_b < level_a {
        Some(Side::B)
    } else {
        None
    };

    let requires_manual_review = preferred.is_none()
        || score_difference < config.manual_review_score_gap
        || confidence < config.manual_review_min_confidence;

    Weighing {
        preferred,
        score_difference,
        level_difference,
        confidence,
        requires_manual_review,
    }
}

/// Evidence comparison of the two sides of a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EbmComparison {
    /// Source to prefer; `None` when the sides cannot be separated.
    pub preferred_source_id: Option<SourceId>,
    /// Human-readable reasoning.
    pub reasoning: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// True when a reviewer must decide.
    pub requires_manual_review: bool,
    /// Absolute score gap the decision was based on.
    pub score_difference: f64,
    /// Absolute evidence-level gap.
    pub level_difference: u8,
    /// Evaluation of the `unit_a` side.
    pub evaluation_a: SourceEvaluation,
    /// Evaluation of the `unit_b` side.
    pub evaluation_b: SourceEvaluation,
    /// Per-user preference adjustments, when a user was given.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adjustments: Vec<crate::trust::PreferenceAdjustment>,
}

/// One side of a conflict as handed to the evaluator.
#[derive(Debug, Clone, Copy)]
pub struct EvidenceSide<'a> {
    /// The side's source.
    pub source: &'a Source,
    /// Per-unit evidence-level override.
    pub level_override: Option<EvidenceLevel>,
}

/// Evaluates and compares sources.
#[derive(Debug, Clone, Default)]
pub struct EbmEvaluator {
    tables: CredibilityTables,
    config: EvidenceConfig,
}

impl EbmEvaluator {
    /// Creates an evaluator over the given tables.
    #[must_use]
    pub fn new(tables: CredibilityTables, config: EvidenceConfig) -> Self {
        Self { tables, config }
    }

    /// The injected tables.
    #[must_use]
    pub fn tables(&self) -> &CredibilityTables {
        &self.tables
    }

    /// The comparison thresholds.
    #[must_use]
    pub fn config(&self) -> &EvidenceConfig {
        &self.config
    }

    /// Evidence level for a source, honouring a per-unit override.
    #[must_use]
    pub fn evidence_level(&self, source: &Source, level_override: Option<EvidenceLevel>) -> EvidenceLevel {
        level_override.unwrap_or_else(|| self.tables.levels.level_for(source.source_type))
    }

    /// Evaluates a source as of now, with no specialty context.
    #[must_use]
    pub fn evaluate_source(&self, source: &Source) -> SourceEvaluation {
        self.evaluate_at(source, None, &[], Utc::now())
    }

    /// Evaluates a source as of `now`.
    ///
    /// `specialties` is the topic context; the specialty bonus is proportional
    /// to how many of those tags the source carries.
    #[must_use]
    pub fn evaluate_at(
        &self,
        source: &Source,
        level_override: Option<EvidenceLevel>,
        specialties: &[String],
        now: DateTime<Utc>,
    ) -> SourceEvaluation {
        let evidence_level = self.evidence_level(source, level_override);

        let recency_bonus = source.published_at.map_or(0, |published| {
            #[allow(clippy::cast_precision_loss)]
            let age_years = (now - published).num_days() as f64 / 365.25;
            self.tables.recency_bonus(age_years)
        });

        let specialty_bonus = if specialties.is_empty() {
            0
        } else {
            let matched = specialties.iter().filter(|t| source.has_specialty(t)).count();
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let bonus = (f64::from(self.tables.specialty_bonus_max) * matched as f64 / specialties.len() as f64)
                .round() as u8;
            bonus
        };

        let peer_review_bonus = if source.peer_reviewed {
            self.tables.peer_review_bonus
        } else {
            0
        };

        let total = u16::from(source.base_credibility.min(100))
            + u16::from(recency_bonus)
            + u16::from(specialty_bonus)
            + u16::from(peer_review_bonus);
        #[allow(clippy::cast_possible_truncation)]
        let score = total.min(100) as u8;

        SourceEvaluation {
            source_id: source.id,
            evidence_level,
            score,
            grade: grade_for(evidence_level, score),
            base_credibility: source.base_credibility,
            recency_bonus,
            specialty_bonus,
            peer_review_bonus,
        }
    }

    /// Compares the two sides of a conflict.
    #[must_use]
    pub fn compare_at(
        &self,
        side_a: EvidenceSide<'_>,
        side_b: EvidenceSide<'_>,
        specialties: &[String],
        now: DateTime<Utc>,
    ) -> EbmComparison {
        let evaluation_a = self.evaluate_at(side_a.source, side_a.level_override, specialties, now);
        let evaluation_b = self.evaluate_at(side_b.source, side_b.level_override, specialties, now);

        let verdict = weigh(
            (f64::from(evaluation_a.score), evaluation_a.evidence_level),
            (f64::from(evaluation_b.score), evaluation_b.evidence_level),
            &self.config,
        );

        let reasoning = describe(
            &verdict,
            (side_a.source, &evaluation_a),
            (side_b.source, &evaluation_b),
            &self.config,
        );

        EbmComparison {
            preferred_source_id: verdict.preferred.map(|side| match side {
                Side::A => evaluation_a.source_id,
                Side::B => evaluation_b.source_id,
            }),
            reasoning,
            confidence: verdict.confidence,
            requires_manual_review: verdict.requires_manual_review,
            score_difference: verdict.score_difference,
            level_difference: verdict.level_difference,
            evaluation_a,
            evaluation_b,
            adjustments: Vec::new(),
        }
    }
}

/// Grade from level and score.
#[must_use]
pub const fn grade_for(level: EvidenceLevel, score: u8) -> Grade {
    match level {
        EvidenceLevel::I if score >= 90 => Grade::A,
        EvidenceLevel::II | EvidenceLevel::III if score >= 75 => Grade::B,
        EvidenceLevel::IV if score >= 60 => Grade::C,
        _ => Grade::D,
    }
}

fn label(source: &Source, eval: &SourceEvaluation) -> String {
    format!(
        "'{}' ({}, level {}, grade {}, score {})",
        source.title, source.source_type, eval.evidence_level, eval.grade, eval.score
    )
}

pub(crate) fn describe(
    verdict: &Weighing,
    (source_a, eval_a): (&Source, &SourceEvaluation),
    (source_b, eval_b): (&Source, &SourceEvaluation),
    config: &EvidenceConfig,
) -> String {
    let gaps = format!(
        "score gap {:.0}, evidence-level gap {}, confidence {:.2}",
        verdict.score_difference, verdict.level_difference, verdict.confidence
    );

    let Some(side) = verdict.preferred else {
        return format!(
            "Manual review required: {} and {} are indistinguishable ({gaps})",
            label(source_a, eval_a),
            label(source_b, eval_b)
        );
    };

    let (winner, loser) = match side {
        Side::A => (label(source_a, eval_a), label(source_b, eval_b)),
        Side::B => (label(source_b, eval_b), label(source_a, eval_a)),
    };

    if verdict.requires_manual_review {
        let why = if verdict.score_difference < config.manual_review_score_gap {
            format!("score gap below {:.0}", config.manual_review_score_gap)
        } else {
            format!("confidence below {:.2}", config.manual_review_min_confidence)
        };
        format!("Manual review required ({why}): {winner} leans ahead of {loser}; {gaps}")
    } else {
        format!("Prefer {winner} over {loser}; {gaps}")
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn years_ago(years: f64) -> DateTime<Utc> {
        #[allow(clippy::cast_possible_truncation)]
        let days = (years * 365.25) as i64;
        now() - Duration::days(days)
    }

    #[test]
    fn source_type_maps_to_level() {
        let eval = EbmEvaluator::default();
        for (ty, level) in [
            (SourceType::Guideline, EvidenceLevel::I),
            (SourceType::Journal, EvidenceLevel::II),
            (SourceType::CuratedReference, EvidenceLevel::II),
            (SourceType::Textbook, EvidenceLevel::III),
            (SourceType::Lecture, EvidenceLevel::IV),
            (SourceType::UserNotes, EvidenceLevel::V),
        ] {
            let source = Source::new("s", ty, 50);
            assert_eq!(eval.evidence_level(&source, None), level);
        }
    }

    #[test]
    fn unit_override_beats_source_type() {
        let eval = EbmEvaluator::default();
        let source = Source::new("lecture citing an RCT", SourceType::Lecture, 60);
        assert_eq!(eval.evidence_level(&source, Some(EvidenceLevel::II)), EvidenceLevel::II);
    }

    #[test]
    fn recency_curve() {
        let tables = CredibilityTables::default();
        assert_eq!(tables.recency_bonus(0.5), 10);
        assert_eq!(tables.recency_bonus(1.0), 7);
        assert_eq!(tables.recency_bonus(1.5), 7);
        assert_eq!(tables.recency_bonus(3.0), 4);
        assert_eq!(tables.recency_bonus(7.0), 2);
        assert_eq!(tables.recency_bonus(12.0), 0);
        assert_eq!(tables.recency_bonus(-0.1), 10);
    }

    #[test]
    fn score_sums_bonuses_and_caps_at_100() {
        let eval = EbmEvaluator::default();
        let source = Source::new("g", SourceType::Guideline, 85)
            .published(years_ago(0.5))
            .with_peer_review(true)
            .with_specialties(["cardiology"]);
        let result = eval.evaluate_at(&source, None, &["cardiology".to_string()], now());
        assert_eq!(result.recency_bonus, 10);
        assert_eq!(result.specialty_bonus, 10);
        assert_eq!(result.peer_review_bonus, 10);
        assert_eq!(result.score, 100);
        assert_eq!(result.grade, Grade::A);
    }

    #[test]
    fn specialty_bonus_is_proportional() {
        let eval = EbmEvaluator::default();
        let source = Source::new("t", SourceType::Textbook, 60).with_specialties(["cardiology"]);
        let ctx = vec!["cardiology".to_string(), "obstetrics".to_string()];
        let result = eval.evaluate_at(&source, None, &ctx, now());
        assert_eq!(result.specialty_bonus, 5);
    }

    #[test]
    fn grades() {
        assert_eq!(grade_for(EvidenceLevel::I, 90), Grade::A);
        assert_eq!(grade_for(EvidenceLevel::I, 89), Grade::D);
        assert_eq!(grade_for(EvidenceLevel::II, 75), Grade::B);
        assert_eq!(grade_for(EvidenceLevel::III, 80), Grade::B);
        assert_eq!(grade_for(EvidenceLevel::IV, 60), Grade::C);
        assert_eq!(grade_for(EvidenceLevel::IV, 59), Grade::D);
        assert_eq!(grade_for(EvidenceLevel::V, 100), Grade::D);
    }

    #[test]
    fn guideline_beats_old_lecture() {
        let eval = EbmEvaluator::default();
        // 77 + 10 recency + 10 peer review = 97
        let guideline = Source::new("guideline", SourceType::Guideline, 77)
            .published(years_ago(0.6))
            .with_peer_review(true);
        // 76 + 2 recency = 78
        let lecture = Source::new("lecture", SourceType::Lecture, 76).published(years_ago(6.0));

        let cmp = eval.compare_at(
            EvidenceSide { source: &guideline, level_override: None },
            EvidenceSide { source: &lecture, level_override: None },
            &[],
            now(),
        );
        assert_eq!(cmp.evaluation_a.score, 97);
        assert_eq!(cmp.evaluation_b.score, 78);
        assert_eq!(cmp.preferred_source_id, Some(guideline.id));
        assert!(!cmp.requires_manual_review);
        assert!(cmp.confidence >= 0.7);
        assert!(cmp.reasoning.starts_with("Prefer 'guideline'"));
    }

    #[test]
    fn close_lectures_need_manual_review() {
        let eval = EbmEvaluator::default();
        let a = Source::new("a", SourceType::Lecture, 75);
        let b = Source::new("b", SourceType::Lecture, 77);
        let cmp = eval.compare_at(
            EvidenceSide { source: &a, level_override: None },
            EvidenceSide { source: &b, level_override: None },
            &[],
            now(),
        );
        assert!((cmp.score_difference - 2.0).abs() < f64::EPSILON);
        assert!(cmp.requires_manual_review);
        assert!(cmp.reasoning.starts_with("Manual review required"));
    }

    #[test]
    fn exact_tie_has_no_preference() {
        let v = weigh((70.0, EvidenceLevel::III), (70.0, EvidenceLevel::III), &EvidenceConfig::default());
        assert_eq!(v.preferred, None);
        assert!(v.requires_manual_review);
        assert!(v.confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn equal_scores_fall_back_to_level() {
        let v = weigh((80.0, EvidenceLevel::IV), (80.0, EvidenceLevel::I), &EvidenceConfig::default());
        assert_eq!(v.preferred, Some(Side::B));
        assert!(v.requires_manual_review);
    }

    #[test]
    fn alternate_tables_can_be_injected() {
        let mut tables = CredibilityTables::default();
        tables.levels.lecture = EvidenceLevel::II;
        tables.peer_review_bonus = 0;
        let eval = EbmEvaluator::new(tables, EvidenceConfig::default());
        let source = Source::new("l", SourceType::Lecture, 50).with_peer_review(true);
        let result = eval.evaluate_at(&source, None, &[], now());
        assert_eq!(result.evidence_level, EvidenceLevel::II);
        assert_eq!(result.score, 50);
    }

    #[test]
    fn invalid_recency_curve_rejected() {
        let mut tables = CredibilityTables::default();
        tables.recency.reverse();
        assert!(tables.validate().is_err());
    }
}
