//! Conflict and flag state machines.
//!
//! Every status change goes through [`ConflictLifecycleManager`], which
//! checks the edge, then hands the updated conflict and its history entry
//! (and resolution, if any) to the repository as one compare-and-swap. A
//! concurrent writer that got there first turns into
//! [`LifecycleError::ConcurrentModification`]; nothing is half-applied.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::conflict::{Conflict, ConflictId, ConflictStatus};
use crate::error::{LifecycleError, MedConflictError, MedConflictResult, ValidationError};
use crate::flag::{Flag, FlagDecision, FlagId, FlagStatus};
use crate::history::HistoryEntry;
use crate::resolution::Resolution;
use crate::source::SourceId;
use crate::storage::{ConflictRepository, Insertion, StorageError};

/// Actor recorded for engine-made changes.
pub const ENGINE_ACTOR: &str = "engine";

/// Owns every write to conflicts, history, resolutions and flags.
#[derive(Clone)]
pub struct ConflictLifecycleManager {
    repository: Arc<dyn ConflictRepository>,
}

impl std::fmt::Debug for ConflictLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictLifecycleManager").finish_non_exhaustive()
    }
}

impl ConflictLifecycleManager {
    /// Creates a manager over a repository.
    #[must_use]
    pub fn new(repository: Arc<dyn ConflictRepository>) -> Self {
        Self { repository }
    }

    /// The underlying repository.
    #[must_use]
    pub fn repository(&self) -> &Arc<dyn ConflictRepository> {
        &self.repository
    }

    /// Stores a newly detected conflict with its DETECTED entry, or returns
    /// the conflict already recorded for the pair.
    pub fn record_detection(
        &self,
        conflict: Conflict,
        actor: &str,
        notes: &str,
    ) -> MedConflictResult<Insertion> {
        let entry = HistoryEntry::detected(conflict.id, actor, notes);
        let insertion = self.repository.insert_if_absent(conflict, entry)?;
        match &insertion {
            Insertion::Inserted(c) => info!(
                conflict_id = %c.id,
                conflict_type = %c.conflict_type,
                severity = %c.severity,
                confidence = c.confidence,
                "conflict detected"
            ),
            Insertion::Existing(c) => info!(conflict_id = %c.id, status = %c.status, "detection collapsed into existing conflict"),
        }
        Ok(insertion)
    }

    /// Loads a conflict or fails with [`LifecycleError::ConflictNotFound`].
    pub fn require(&self, conflict_id: ConflictId) -> MedConflictResult<Conflict> {
        self.repository
            .get(conflict_id)?
            .ok_or_else(|| LifecycleError::ConflictNotFound { id: conflict_id }.into())
    }

    /// Moves a conflict to `next` and returns the history entry written.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidTransition`] for an edge the state machine
    /// does not allow; the conflict is left unchanged.
    pub fn transition(
        &self,
        conflict_id: ConflictId,
        next: ConflictStatus,
        actor: &str,
        notes: &str,
    ) -> MedConflictResult<HistoryEntry> {
        let current = self.require(conflict_id)?;
        self.apply(&current, next, actor, notes, None)
    }

    /// Records a reviewer's resolution; the conflict must be UNDER_REVIEW and
    /// moves to RESOLVED in the same step.
    ///
    /// # Errors
    ///
    /// [`ValidationError::SourceNotInConflict`] if `chosen_source_id` is not
    /// one of the two sides, [`LifecycleError::InvalidTransition`] if the
    /// conflict is not under review.
    pub fn record_resolution(
        &self,
        conflict_id: ConflictId,
        chosen_source_id: SourceId,
        rationale: &str,
        evidence_note: &str,
        resolved_by: &str,
    ) -> MedConflictResult<Resolution> {
        let current = self.require(conflict_id)?;
        if !current.involves_source(chosen_source_id) {
            return Err(ValidationError::SourceNotInConflict {
                conflict_id,
                source_id: chosen_source_id,
            }
            .into());
        }

        let resolution = Resolution {
            conflict_id,
            resolved_by: resolved_by.to_string(),
            chosen_source_id,
            rationale: rationale.to_string(),
            evidence_note: evidence_note.to_string(),
            resolved_at: Utc::now(),
        };
        self.apply(&current, ConflictStatus::Resolved, resolved_by, rationale, Some(resolution.clone()))?;
        Ok(resolution)
    }

    /// Appends an EVIDENCE_UPDATED entry; the status is unchanged.
    pub fn record_evidence_update(
        &self,
        conflict_id: ConflictId,
        actor: &str,
        notes: &str,
    ) -> MedConflictResult<HistoryEntry> {
        let current = self.require(conflict_id)?;
        let entry = HistoryEntry::evidence_updated(conflict_id, current.status, actor, notes);
        self.repository.append_history(entry.clone()).map_err(|e| match e {
            StorageError::NotFound(_) => MedConflictError::from(LifecycleError::ConflictNotFound { id: conflict_id }),
            other => MedConflictError::from(other),
        })?;
        info!(conflict_id = %conflict_id, actor, "evidence updated");
        Ok(entry)
    }

    /// Audit trail, oldest first.
    pub fn history(&self, conflict_id: ConflictId) -> MedConflictResult<Vec<HistoryEntry>> {
        Ok(self.repository.history(conflict_id)?)
    }

    /// Resolutions, oldest first.
    pub fn resolutions(&self, conflict_id: ConflictId) -> MedConflictResult<Vec<Resolution>> {
        Ok(self.repository.resolutions(conflict_id)?)
    }

    fn apply(
        &self,
        current: &Conflict,
        next: ConflictStatus,
        actor: &str,
        notes: &str,
        resolution: Option<Resolution>,
    ) -> MedConflictResult<HistoryEntry> {
        let from = current.status;
        if !from.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                conflict_id: current.id,
                from,
                to: next,
            }
            .into());
        }

        let now = Utc::now();
        let updated = current.with_status(next, now);
        let entry = HistoryEntry::transition(current.id, from, next, actor, notes, now);
        self.repository
            .commit_transition(from, updated, entry.clone(), resolution)
            .map_err(|e| match e {
                StorageError::StaleState(_) => MedConflictError::from(LifecycleError::ConcurrentModification {
                    conflict_id: current.id,
                    expected: from,
                }),
                StorageError::NotFound(_) => LifecycleError::ConflictNotFound { id: current.id }.into(),
                other => MedConflictError::from(other),
            })?;

        info!(conflict_id = %current.id, from = %from, to = %next, actor, "conflict transitioned");
        Ok(entry)
    }

    /// Stores a new flag.
    pub fn save_flag(&self, flag: Flag) -> MedConflictResult<Flag> {
        self.repository.save_flag(flag.clone())?;
        info!(flag_id = %flag.id, reporter = %flag.reporter, linked = flag.conflict_id.is_some(), "flag submitted");
        Ok(flag)
    }

    /// Loads a flag or fails with [`LifecycleError::FlagNotFound`].
    pub fn require_flag(&self, flag_id: FlagId) -> MedConflictResult<Flag> {
        self.repository
            .get_flag(flag_id)?
            .ok_or_else(|| LifecycleError::FlagNotFound { id: flag_id }.into())
    }

    /// Applies a reviewer decision to a flag, optionally linking a conflict.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidFlagTransition`] if the flag is already
    /// closed or the decision does not follow from its status.
    pub fn decide_flag(
        &self,
        flag: &Flag,
        decision: FlagDecision,
        notes: &str,
        conflict_id: Option<ConflictId>,
    ) -> MedConflictResult<Flag> {
        let next = decision.target_status();
        if !flag.status.can_transition_to(next) {
            return Err(LifecycleError::InvalidFlagTransition {
                flag_id: flag.id,
                from: flag.status,
                to: next,
            }
            .into());
        }

        let mut updated = flag.clone();
        updated.status = next;
        if !notes.is_empty() {
            updated.notes = notes.to_string();
        }
        if conflict_id.is_some() {
            updated.conflict_id = conflict_id;
        }

        self.repository
            .update_flag(flag.status, updated.clone())
            .map_err(|e| match e {
                StorageError::StaleState(_) => MedConflictError::from(LifecycleError::InvalidFlagTransition {
                    flag_id: flag.id,
                    from: flag.status,
                    to: next,
                }),
                StorageError::NotFound(_) => LifecycleError::FlagNotFound { id: flag.id }.into(),
                other => MedConflictError::from(other),
            })?;

        info!(flag_id = %flag.id, from = %flag.status, to = %next, "flag reviewed");
        Ok(updated)
    }

    /// Points an approved flag at the conflict created for it.
    pub fn link_flag(&self, flag: &Flag, conflict_id: ConflictId) -> MedConflictResult<Flag> {
        let mut linked = flag.clone();
        linked.conflict_id = Some(conflict_id);
        self.repository
            .update_flag(FlagStatus::Approved, linked.clone())
            .map_err(|e| match e {
                StorageError::NotFound(_) => LifecycleError::FlagNotFound { id: flag.id }.into(),
                other => MedConflictError::from(other),
            })?;
        Ok(linked)
    }
}
