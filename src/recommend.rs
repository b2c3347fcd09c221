//! Turns an evidence comparison into a recommendation, applying a user's
//! source preferences on top of the evidence scores.
//!
//! The recommender never writes anything. When the call is clear it exposes
//! a [`ResolutionDraft`] that a reviewer may commit through the lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conflict::{Conflict, ConflictId};
use crate::evidence::{describe, weigh, EbmComparison, EbmEvaluator, EvidenceSide, Side};
use crate::resolution::ResolutionDraft;
use crate::source::SourceId;
use crate::trust::{PreferenceAdjustment, PreferenceSet, TrustLevel};

/// A recommendation for one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Conflict the recommendation is for.
    pub conflict_id: ConflictId,
    /// The (preference-adjusted) comparison.
    pub comparison: EbmComparison,
}

impl Recommendation {
    /// Recommended source, if any.
    #[must_use]
    pub fn preferred_source_id(&self) -> Option<SourceId> {
        self.comparison.preferred_source_id
    }

    /// True when a reviewer must decide.
    #[must_use]
    pub fn requires_manual_review(&self) -> bool {
        self.comparison.requires_manual_review
    }

    /// A resolution ready to commit; `None` when manual review is required.
    #[must_use]
    pub fn draft(&self) -> Option<ResolutionDraft> {
        if self.comparison.requires_manual_review {
            return None;
        }
        let chosen = self.comparison.preferred_source_id?;
        let eval = if chosen == self.comparison.evaluation_a.source_id {
            &self.comparison.evaluation_a
        } else {
            &self.comparison.evaluation_b
        };
        Some(ResolutionDraft {
            conflict_id: self.conflict_id,
            chosen_source_id: chosen,
            rationale: self.comparison.reasoning.clone(),
            evidence_note: format!(
                "Evidence level {}, grade {}, credibility score {}",
                eval.evidence_level, eval.grade, eval.score
            ),
        })
    }
}

/// Chooses a side for a conflict.
#[derive(Debug, Clone, Default)]
pub struct ResolutionRecommender {
    evaluator: EbmEvaluator,
}

impl ResolutionRecommender {
    /// Wraps an evaluator.
    #[must_use]
    pub fn new(evaluator: EbmEvaluator) -> Self {
        Self { evaluator }
    }

    /// The underlying evaluator.
    #[must_use]
    pub fn evaluator(&self) -> &EbmEvaluator {
        &self.evaluator
    }

    /// Recommends a side as of `now`.
    ///
    /// Without preferences this is the plain evidence comparison. With them,
    /// each side's score is shifted by its trust level before weighing. A
    /// blocked source drops out; if both are blocked nothing is preferred.
    #[must_use]
    pub fn recommend_at(
        &self,
        conflict: &Conflict,
        side_a: EvidenceSide<'_>,
        side_b: EvidenceSide<'_>,
        specialties: &[String],
        preferences: Option<&PreferenceSet>,
        now: DateTime<Utc>,
    ) -> Recommendation {
        let base = self.evaluator.compare_at(side_a, side_b, specialties, now);
        let comparison = match preferences {
            Some(prefs) if !prefs.is_empty() => self.apply_preferences(base, side_a, side_b, prefs),
            _ => base,
        };
        Recommendation {
            conflict_id: conflict.id,
            comparison,
        }
    }

    fn apply_preferences(
        &self,
        base: EbmComparison,
        side_a: EvidenceSide<'_>,
        side_b: EvidenceSide<'_>,
        prefs: &PreferenceSet,
    ) -> EbmComparison {
        let adj_a = prefs.adjust(base.evaluation_a.source_id, f64::from(base.evaluation_a.score));
        let adj_b = prefs.adjust(base.evaluation_b.source_id, f64::from(base.evaluation_b.score));
        let config = self.evaluator.config();

        let mut weighing = weigh(
            (adj_a.adjusted_score, base.evaluation_a.evidence_level),
            (adj_b.adjusted_score, base.evaluation_b.evidence_level),
            config,
        );

        let blocked_a = adj_a.trust_level == TrustLevel::Blocked;
        let blocked_b = adj_b.trust_level == TrustLevel::Blocked;
        // A blocked source is never recommended while the other side is open.
        let only_open = match (blocked_a, blocked_b) {
            (true, false) => Some((Side::B, side_b.source, side_a.source)),
            (false, true) => Some((Side::A, side_a.source, side_b.source)),
            _ => None,
        };

        let mut reasoning = if blocked_a && blocked_b {
            weighing.preferred = None;
            weighing.requires_manual_review = true;
            "Manual review required: both sources are blocked by user preferences".to_string()
        } else if let Some((open, kept, blocked)) = only_open.filter(|(open, ..)| weighing.preferred != Some(*open)) {
            // Evidence alone favored the blocked side, so a reviewer confirms.
            weighing.preferred = Some(open);
            weighing.requires_manual_review = true;
            format!(
                "Prefer '{}': '{}' is blocked by user preferences although its evidence scores higher",
                kept.title, blocked.title
            )
        } else {
            describe(
                &weighing,
                (side_a.source, &base.evaluation_a),
                (side_b.source, &base.evaluation_b),
                config,
            )
        };
        reasoning.push_str(&format!(
            "; user trust: '{}' {}, '{}' {}",
            side_a.source.title,
            trust_note(&adj_a),
            side_b.source.title,
            trust_note(&adj_b)
        ));

        EbmComparison {
            preferred_source_id: weighing.preferred.map(|side| match side {
                Side::A => base.evaluation_a.source_id,
                Side::B => base.evaluation_b.source_id,
            }),
            reasoning,
            confidence: weighing.confidence,
            requires_manual_review: weighing.requires_manual_review,
            score_difference: weighing.score_difference,
            level_difference: weighing.level_difference,
            evaluation_a: base.evaluation_a,
            evaluation_b: base.evaluation_b,
            adjustments: vec![adj_a, adj_b],
        }
    }
}

fn trust_note(adj: &PreferenceAdjustment) -> String {
    format!("{} ({:+.0})", adj.trust_level, adj.adjusted_score - adj.base_score)
}
