//! The conflict detection and resolution engine.
//!
//! [`ConflictEngine`] wires the pipeline together:
//!
//! 1. validate the pair and reuse any conflict already recorded for it
//! 2. similarity gate (short-circuits unrelated pairs)
//! 3. normalize both texts and run the pattern detectors
//! 4. adjudicate under a deadline, falling back to patterns
//! 5. score, then persist through the lifecycle manager
//!
//! Steps 1-4 are free of side effects; only the final insert writes, and it
//! collapses onto an existing record if another worker got there first.

mod scan;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::adjudicator::{Adjudication, AdjudicationGuard, AdjudicationRequest, Adjudicator};
use crate::config::EngineConfig;
use crate::conflict::{Conflict, ConflictId, ConflictStatus, DetectionOrigin, Severity};
use crate::content::{ContentUnit, UnitId, UnitPair};
use crate::error::{MedConflictResult, ValidationError};
use crate::evidence::{EbmComparison, EbmEvaluator, EvidenceSide};
use crate::flag::{Flag, FlagDecision, FlagId};
use crate::history::HistoryEntry;
use crate::lifecycle::{ConflictLifecycleManager, ENGINE_ACTOR};
use crate::normalize::TextNormalizer;
use crate::pattern::DetectorSet;
use crate::recommend::{Recommendation, ResolutionRecommender};
use crate::resolution::{Resolution, ResolutionDraft};
use crate::scorer::{infer_type, ConflictScorer};
use crate::similarity::SimilarityGate;
use crate::source::{Source, SourceId};
use crate::storage::{ConflictRepository, ContentStore, Insertion, PreferenceStore, SourceRegistry};
use crate::trust::PreferenceSet;

pub use scan::{BatchReport, CancellationToken, PairOutcome, PairReport};

const FLAG_DETECTION_NOTE: &str = "detected via user flag";

/// Result of running the side-effect-free part of the pipeline.
enum Evaluation {
    /// A conflict is already recorded for the pair.
    Existing(Conflict),
    /// Nothing to record.
    NoConflict { similarity: Option<f32> },
    /// A new conflict, not yet persisted.
    Detected(Conflict),
}

/// Builder for [`ConflictEngine`].
pub struct EngineBuilder {
    content: Arc<dyn ContentStore>,
    sources: Arc<dyn SourceRegistry>,
    repository: Arc<dyn ConflictRepository>,
    preferences: Option<Arc<dyn PreferenceStore>>,
    adjudicator: Option<Arc<dyn Adjudicator>>,
    normalizer: Option<TextNormalizer>,
    detectors: Option<DetectorSet>,
    config: EngineConfig,
}

impl EngineBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the adjudicator.
    #[must_use]
    pub fn adjudicator(mut self, adjudicator: Arc<dyn Adjudicator>) -> Self {
        self.adjudicator = Some(adjudicator);
        self
    }

    /// Sets the preference store used by evidence comparisons.
    #[must_use]
    pub fn preferences(mut self, preferences: Arc<dyn PreferenceStore>) -> Self {
        self.preferences = Some(preferences);
        self
    }

    /// Replaces the built-in normalizer.
    #[must_use]
    pub fn normalizer(mut self, normalizer: TextNormalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Replaces the standard detector set.
    #[must_use]
    pub fn detectors(mut self, detectors: DetectorSet) -> Self {
        self.detectors = Some(detectors);
        self
    }

    /// Validates the configuration and builds the engine.
    pub fn build(self) -> Result<ConflictEngine, ValidationError> {
        self.config.validate()?;
        let config = self.config;

        let adjudication = match self.adjudicator {
            Some(adjudicator) if config.adjudication.enabled => {
                AdjudicationGuard::new(adjudicator, Duration::from_millis(config.adjudication.timeout_ms))
                    .with_max_in_flight(config.adjudication.max_in_flight)
            }
            _ => AdjudicationGuard::disabled(),
        };
        let detectors = self
            .detectors
            .unwrap_or_else(|| DetectorSet::standard(&config.patterns));
        let evaluator = EbmEvaluator::new(config.credibility.clone(), config.evidence.clone());

        Ok(ConflictEngine {
            content: self.content,
            sources: self.sources,
            preferences: self.preferences,
            lifecycle: ConflictLifecycleManager::new(self.repository),
            normalizer: Arc::new(self.normalizer.unwrap_or_default()),
            gate: SimilarityGate::new(config.similarity.clone()),
            detectors: Arc::new(detectors),
            adjudication,
            scorer: ConflictScorer::new(config.scoring.clone(), config.patterns.numeric_medium_divergence),
            recommender: ResolutionRecommender::new(evaluator),
            config: Arc::new(config),
        })
    }
}

/// Detects, scores, compares and tracks conflicts between content units.
#[derive(Clone)]
pub struct ConflictEngine {
    content: Arc<dyn ContentStore>,
    sources: Arc<dyn SourceRegistry>,
    preferences: Option<Arc<dyn PreferenceStore>>,
    lifecycle: ConflictLifecycleManager,
    normalizer: Arc<TextNormalizer>,
    gate: SimilarityGate,
    detectors: Arc<DetectorSet>,
    adjudication: AdjudicationGuard,
    scorer: ConflictScorer,
    recommender: ResolutionRecommender,
    config: Arc<EngineConfig>,
}

impl std::fmt::Debug for ConflictEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictEngine")
            .field("detectors", &self.detectors)
            .field("adjudication", &self.adjudication)
            .field("gate_threshold", &self.gate.threshold())
            .finish_non_exhaustive()
    }
}

impl ConflictEngine {
    /// Starts building an engine over the given stores.
    #[must_use]
    pub fn builder(
        content: Arc<dyn ContentStore>,
        sources: Arc<dyn SourceRegistry>,
        repository: Arc<dyn ConflictRepository>,
    ) -> EngineBuilder {
        EngineBuilder {
            content,
            sources,
            repository,
            preferences: None,
            adjudicator: None,
            normalizer: None,
            detectors: None,
            config: EngineConfig::default(),
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The lifecycle manager.
    #[must_use]
    pub fn lifecycle(&self) -> &ConflictLifecycleManager {
        &self.lifecycle
    }

    /// Runs the pipeline on one pair and records a conflict if one is found.
    ///
    /// Returns the conflict already recorded for the pair, if any, without
    /// re-running the analysis. A pair whose embedding cannot be produced is
    /// logged and reported as no conflict.
    ///
    /// # Errors
    ///
    /// [`ValidationError`] for a same-unit or same-source pair, unknown units
    /// or empty text.
    pub fn detect_conflict(&self, unit_a: UnitId, unit_b: UnitId) -> MedConflictResult<Option<Conflict>> {
        match self.detect_with_origin(unit_a, unit_b, DetectionOrigin::Engine, ENGINE_ACTOR) {
            Ok(found) => Ok(found.map(Insertion::into_conflict)),
            Err(e) if e.is_embedding_unavailable() => {
                warn!(unit_a = %unit_a, unit_b = %unit_b, error = %e, "pair skipped");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Scans pairs on a bounded worker pool; see [`Self::scan_batch_with_cancel`].
    #[must_use]
    pub fn scan_batch(&self, pairs: &[(UnitId, UnitId)], concurrency: usize) -> BatchReport {
        self.scan_batch_with_cancel(pairs, concurrency, &CancellationToken::new())
    }

    /// Scans pairs on `concurrency` workers (0 = configured default).
    ///
    /// Each pair gets its own outcome; a failing pair never aborts the batch.
    /// Cancellation is checked before each pair, so pairs already being
    /// analysed finish and the rest are reported as cancelled.
    #[must_use]
    pub fn scan_batch_with_cancel(
        &self,
        pairs: &[(UnitId, UnitId)],
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let workers = self.config.scan.effective_concurrency(concurrency);
        let report = scan::run(self, pairs, workers, cancel);
        info!(
            pairs = pairs.len(),
            workers,
            detected = report.detected_count(),
            existing = report.existing_count(),
            no_conflict = report.no_conflict_count(),
            skipped = report.skipped_count(),
            failed = report.failed_count(),
            cancelled = report.cancelled_count(),
            "batch scan finished"
        );
        report
    }

    /// One pair of a batch, classified.
    fn scan_pair(&self, unit_a: UnitId, unit_b: UnitId) -> PairOutcome {
        let evaluation = self
            .evaluate(unit_a, unit_b, DetectionOrigin::Engine)
            .and_then(|evaluation| self.persist(evaluation, ENGINE_ACTOR, "detected by batch scan"));
        match evaluation {
            Ok(Persisted::Inserted(c)) => PairOutcome::Detected(c),
            Ok(Persisted::Existing(c)) => PairOutcome::Existing(c),
            Ok(Persisted::None { similarity }) => PairOutcome::NoConflict { similarity },
            Err(e) if e.is_embedding_unavailable() => {
                warn!(unit_a = %unit_a, unit_b = %unit_b, error = %e, "pair skipped");
                PairOutcome::Skipped { reason: e.to_string() }
            }
            Err(e) => {
                warn!(unit_a = %unit_a, unit_b = %unit_b, error = %e, "pair failed");
                PairOutcome::Failed { error: e.to_string() }
            }
        }
    }

    fn detect_with_origin(
        &self,
        unit_a: UnitId,
        unit_b: UnitId,
        origin: DetectionOrigin,
        actor: &str,
    ) -> MedConflictResult<Option<Insertion>> {
        let notes = match origin {
            DetectionOrigin::UserFlag => FLAG_DETECTION_NOTE,
            _ => "detected by pipeline",
        };
        let evaluation = self.evaluate(unit_a, unit_b, origin)?;
        Ok(match self.persist(evaluation, actor, notes)? {
            Persisted::Inserted(c) => Some(Insertion::Inserted(c)),
            Persisted::Existing(c) => Some(Insertion::Existing(c)),
            Persisted::None { .. } => None,
        })
    }

    fn persist(&self, evaluation: Evaluation, actor: &str, notes: &str) -> MedConflictResult<Persisted> {
        Ok(match evaluation {
            Evaluation::Existing(c) => Persisted::Existing(c),
            Evaluation::NoConflict { similarity } => Persisted::None { similarity },
            Evaluation::Detected(c) => match self.lifecycle.record_detection(c, actor, notes)? {
                Insertion::Inserted(c) => Persisted::Inserted(c),
                Insertion::Existing(c) => Persisted::Existing(c),
            },
        })
    }

    fn load_pair(&self, unit_a: UnitId, unit_b: UnitId) -> MedConflictResult<(ContentUnit, ContentUnit)> {
        if unit_a == unit_b {
            return Err(ValidationError::SameUnit { id: unit_a }.into());
        }
        let a = self.load_unit(unit_a)?;
        let b = self.load_unit(unit_b)?;
        if a.source_id == b.source_id {
            return Err(ValidationError::SameSource {
                unit_a,
                unit_b,
                source_id: a.source_id,
            }
            .into());
        }
        Ok((a, b))
    }

    fn load_unit(&self, id: UnitId) -> MedConflictResult<ContentUnit> {
        let unit = self
            .content
            .get_unit(id)?
            .ok_or(ValidationError::UnknownUnit { id })?;
        if unit.text.trim().is_empty() {
            return Err(ValidationError::EmptyText { id }.into());
        }
        Ok(unit)
    }

    fn load_source(&self, id: SourceId) -> MedConflictResult<Source> {
        Ok(self
            .sources
            .get_source(id)?
            .ok_or(ValidationError::UnknownSource { id })?)
    }

    fn evaluate(&self, unit_a: UnitId, unit_b: UnitId, origin: DetectionOrigin) -> MedConflictResult<Evaluation> {
        let (a, b) = self.load_pair(unit_a, unit_b)?;

        if let Some(existing) = self.lifecycle.repository().find_by_unit_pair(UnitPair::new(a.id, b.id))? {
            debug!(conflict_id = %existing.id, status = %existing.status, "pair already has a conflict");
            return Ok(Evaluation::Existing(existing));
        }

        let gate = self.gate.is_topically_related(self.content.as_ref(), &a, &b)?;
        if !gate.pass {
            debug!(unit_a = %a.id, unit_b = %b.id, similarity = gate.similarity, "pair below similarity gate");
            return Ok(Evaluation::NoConflict {
                similarity: Some(gate.similarity),
            });
        }

        let text_a = self.normalizer.normalize(&a.text);
        let text_b = self.normalizer.normalize(&b.text);
        let matches = self.detectors.detect_all(&text_a, &text_b);
        if !matches.is_empty() {
            let kinds: Vec<String> = matches.iter().map(|m| m.kind.to_string()).collect();
            debug!(unit_a = %a.id, unit_b = %b.id, patterns = %kinds.join(","), "patterns matched");
        }

        if matches.is_empty() && !gate.high_similarity {
            return Ok(Evaluation::NoConflict {
                similarity: Some(gate.similarity),
            });
        }

        let concept = a.concept.clone().or_else(|| b.concept.clone());
        let adjudication = if self.adjudication.is_enabled() {
            self.adjudication.run(AdjudicationRequest::new(
                text_a.clone(),
                text_b.clone(),
                concept.clone(),
                matches.iter().map(|m| m.kind).collect(),
                gate.similarity,
            ))
        } else {
            Adjudication::PatternOnly {
                reason: "adjudication disabled".to_string(),
            }
        };

        let Some(assessment) = self.scorer.score(&matches, &adjudication, &text_a, &text_b) else {
            debug!(unit_a = %a.id, unit_b = %b.id, adjudicated = adjudication.verdict().is_some(), "no conflict");
            return Ok(Evaluation::NoConflict {
                similarity: Some(gate.similarity),
            });
        };

        let mut conflict = Conflict::new(
            (a.id, a.source_id),
            (b.id, b.source_id),
            assessment.conflict_type,
            assessment.severity,
            assessment.confidence,
            assessment.description,
        )
        .with_concept(concept)
        .with_origin(origin);
        conflict.resolution_suggestion = assessment.resolution_suggestion;
        conflict.key_differences = assessment.key_differences;
        conflict.patterns = assessment.patterns;
        conflict.adjudicated = assessment.adjudicated;
        Ok(Evaluation::Detected(conflict))
    }

    /// Records a user-submitted candidate conflict.
    ///
    /// The flag is linked to the conflict already recorded for the pair, if
    /// any. Otherwise, when `flags.detect_on_submit` is set, the pipeline runs
    /// and a positive result is stored with a "detected via user flag" note.
    ///
    /// # Errors
    ///
    /// [`ValidationError`] for a same-unit or same-source pair or unknown
    /// units.
    pub fn submit_flag(
        &self,
        unit_a: UnitId,
        unit_b: UnitId,
        description: &str,
        reporter: &str,
    ) -> MedConflictResult<Flag> {
        let (a, b) = self.load_pair(unit_a, unit_b)?;
        let mut flag = Flag::new(a.id, b.id, description, reporter);

        if let Some(existing) = self.lifecycle.repository().find_by_unit_pair(flag.pair())? {
            debug!(flag_id = %flag.id, conflict_id = %existing.id, status = %existing.status, "flag linked to existing conflict");
            flag.conflict_id = Some(existing.id);
        } else if self.config.flags.detect_on_submit {
            match self.detect_with_origin(a.id, b.id, DetectionOrigin::UserFlag, reporter) {
                Ok(found) => flag.conflict_id = found.map(|i| i.into_conflict().id),
                Err(e) if e.is_embedding_unavailable() => {
                    warn!(flag_id = %flag.id, error = %e, "flag detection skipped");
                }
                Err(e) => return Err(e),
            }
        }

        self.lifecycle.save_flag(flag)
    }

    /// Applies a reviewer decision to a flag.
    ///
    /// Approval links the flag to a conflict: the one already recorded for
    /// the pair (reopened if closed), or a new one created from the flag.
    pub fn review_flag(
        &self,
        flag_id: FlagId,
        decision: FlagDecision,
        reviewer: &str,
        notes: &str,
    ) -> MedConflictResult<Flag> {
        let flag = self.lifecycle.require_flag(flag_id)?;
        if decision != FlagDecision::Approve {
            return self.lifecycle.decide_flag(&flag, decision, notes, None);
        }
        self.approve_flag(&flag, reviewer, notes)
    }

    /// Approves `flag` as read by the caller.
    ///
    /// The flag's status change is committed first, so when two reviewers
    /// approve the same snapshot only the winner touches the conflict.
    fn approve_flag(&self, flag: &Flag, reviewer: &str, notes: &str) -> MedConflictResult<Flag> {
        let linked = match flag.conflict_id {
            Some(id) => self.lifecycle.repository().get(id)?,
            None => self.lifecycle.repository().find_by_unit_pair(flag.pair())?,
        };
        let approved = self
            .lifecycle
            .decide_flag(flag, FlagDecision::Approve, notes, linked.as_ref().map(|c| c.id))?;

        match linked {
            Some(c) if c.status.is_closed() => {
                self.lifecycle.transition(
                    c.id,
                    ConflictStatus::Active,
                    reviewer,
                    &format!("reopened by approved flag {}", flag.id),
                )?;
                Ok(approved)
            }
            Some(_) => Ok(approved),
            None => {
                let conflict_id = self.conflict_from_flag(&approved, reviewer)?;
                self.lifecycle.link_flag(&approved, conflict_id)
            }
        }
    }

    fn conflict_from_flag(&self, flag: &Flag, reviewer: &str) -> MedConflictResult<ConflictId> {
        let (a, b) = self.load_pair(flag.unit_a, flag.unit_b)?;
        let text_a = self.normalizer.normalize(&a.text);
        let text_b = self.normalizer.normalize(&b.text);
        let conflict = Conflict::new(
            (a.id, a.source_id),
            (b.id, b.source_id),
            infer_type(&[], &text_a, &text_b),
            Severity::Medium,
            0.5,
            flag.description.clone(),
        )
        .with_concept(a.concept.clone().or_else(|| b.concept.clone()))
        .with_origin(DetectionOrigin::FlagApproval);

        let notes = format!("created from approved flag {}", flag.id);
        Ok(self.lifecycle.record_detection(conflict, reviewer, &notes)?.into_conflict().id)
    }

    /// Recommends a side for a conflict, applying the user's preferences if
    /// a user is given and a preference store is configured.
    pub fn recommend(&self, conflict_id: ConflictId, user_id: Option<&str>) -> MedConflictResult<Recommendation> {
        let conflict = self.lifecycle.require(conflict_id)?;
        let unit_a = self.content.get_unit(conflict.unit_a)?;
        let unit_b = self.content.get_unit(conflict.unit_b)?;
        let source_a = self.load_source(conflict.source_a)?;
        let source_b = self.load_source(conflict.source_b)?;

        let specialties: Vec<String> = unit_a
            .iter()
            .chain(unit_b.iter())
            .flat_map(|u| u.topic_tags.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let preferences = match (user_id, &self.preferences) {
            (Some(user), Some(store)) => Some(PreferenceSet::new(store.get_preferences(user)?)),
            _ => None,
        };

        let side_a = EvidenceSide {
            source: &source_a,
            level_override: unit_a.as_ref().and_then(|u| u.evidence_level),
        };
        let side_b = EvidenceSide {
            source: &source_b,
            level_override: unit_b.as_ref().and_then(|u| u.evidence_level),
        };

        Ok(self
            .recommender
            .recommend_at(&conflict, side_a, side_b, &specialties, preferences.as_ref(), Utc::now()))
    }

    /// Evidence comparison of the two sides of a conflict.
    pub fn compare_evidence(&self, conflict_id: ConflictId, user_id: Option<&str>) -> MedConflictResult<EbmComparison> {
        Ok(self.recommend(conflict_id, user_id)?.comparison)
    }

    /// Moves a conflict to a new status.
    pub fn transition(
        &self,
        conflict_id: ConflictId,
        next: ConflictStatus,
        actor: &str,
        notes: &str,
    ) -> MedConflictResult<HistoryEntry> {
        self.lifecycle.transition(conflict_id, next, actor, notes)
    }

    /// Records a reviewer's resolution of a conflict under review.
    pub fn record_resolution(
        &self,
        conflict_id: ConflictId,
        chosen_source_id: SourceId,
        rationale: &str,
        evidence_note: &str,
        resolved_by: &str,
    ) -> MedConflictResult<Resolution> {
        self.lifecycle
            .record_resolution(conflict_id, chosen_source_id, rationale, evidence_note, resolved_by)
    }

    /// Commits a recommender draft as a resolution.
    pub fn commit_draft(&self, draft: &ResolutionDraft, resolved_by: &str) -> MedConflictResult<Resolution> {
        self.record_resolution(
            draft.conflict_id,
            draft.chosen_source_id,
            &draft.rationale,
            &draft.evidence_note,
            resolved_by,
        )
    }

    /// Appends an evidence annotation to a conflict's history.
    pub fn record_evidence_update(
        &self,
        conflict_id: ConflictId,
        actor: &str,
        notes: &str,
    ) -> MedConflictResult<HistoryEntry> {
        self.lifecycle.record_evidence_update(conflict_id, actor, notes)
    }

    /// Audit trail of a conflict, oldest first.
    pub fn history(&self, conflict_id: ConflictId) -> MedConflictResult<Vec<HistoryEntry>> {
        self.lifecycle.history(conflict_id)
    }

    /// Resolutions of a conflict, oldest first.
    pub fn resolutions(&self, conflict_id: ConflictId) -> MedConflictResult<Vec<Resolution>> {
        self.lifecycle.resolutions(conflict_id)
    }

    /// A conflict by id.
    pub fn conflict(&self, conflict_id: ConflictId) -> MedConflictResult<Option<Conflict>> {
        Ok(self.lifecycle.repository().get(conflict_id)?)
    }

    /// Conflicts currently in `status`, oldest first.
    pub fn conflicts_by_status(&self, status: ConflictStatus) -> MedConflictResult<Vec<Conflict>> {
        Ok(self.lifecycle.repository().by_status(status)?)
    }

    /// A flag by id.
    pub fn flag(&self, flag_id: FlagId) -> MedConflictResult<Option<Flag>> {
        Ok(self.lifecycle.repository().get_flag(flag_id)?)
    }
}

/// Result of the persistence step.
enum Persisted {
    Inserted(Conflict),
    Existing(Conflict),
    None { similarity: Option<f32> },
}
