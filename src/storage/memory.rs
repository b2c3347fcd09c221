//! In-memory storage backend.
//!
//! Thread-safe implementations of the storage contracts. Intended for
//! embedded usage, tests, and as a reference for real backends.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::conflict::{Conflict, ConflictId, ConflictStatus};
use crate::content::{ContentUnit, UnitId, UnitPair};
use crate::embedding::{lexical_embedding_with_dim, DEFAULT_EMBEDDING_DIM};
use crate::flag::{Flag, FlagId, FlagStatus};
use crate::history::HistoryEntry;
use crate::resolution::Resolution;
use crate::source::{Source, SourceId};
use crate::storage::traits::{
    ConflictRepository, ContentStore, Insertion, PreferenceStore, SourceRegistry, StorageError,
};
use crate::trust::SourcePreference;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory content store.
///
/// Missing embeddings are produced with the lexical embedder unless the store
/// was built with [`InMemoryContentStore::without_embedder`].
#[derive(Debug)]
pub struct InMemoryContentStore {
    units: RwLock<HashMap<UnitId, ContentUnit>>,
    embedding_dim: Option<usize>,
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryContentStore {
    /// Create an empty store with the default lexical embedder.
    #[must_use]
    pub fn new() -> Self {
        Self::with_embedding_dim(DEFAULT_EMBEDDING_DIM)
    }

    /// Create an empty store whose embedder uses `dim` dimensions.
    #[must_use]
    pub fn with_embedding_dim(dim: usize) -> Self {
        Self {
            units: RwLock::new(HashMap::new()),
            embedding_dim: Some(dim),
        }
    }

    /// Create a store that cannot embed; units must carry embeddings.
    #[must_use]
    pub fn without_embedder() -> Self {
        Self {
            units: RwLock::new(HashMap::new()),
            embedding_dim: None,
        }
    }

    /// Add or replace a unit.
    pub fn insert(&self, unit: ContentUnit) -> Result<(), StorageError> {
        let mut units = self.units.write().map_err(|_| lock_err("content.insert"))?;
        units.insert(unit.id, unit);
        Ok(())
    }
}

impl ContentStore for InMemoryContentStore {
    fn get_unit(&self, id: UnitId) -> Result<Option<ContentUnit>, StorageError> {
        let units = self.units.read().map_err(|_| lock_err("content.get_unit"))?;
        Ok(units.get(&id).cloned())
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, StorageError> {
        match self.embedding_dim {
            Some(dim) => Ok(lexical_embedding_with_dim(text, dim)),
            None => Err(StorageError::BackendError("no embedder configured".to_string())),
        }
    }
}

/// Thread-safe in-memory source registry.
#[derive(Debug, Default)]
pub struct InMemorySourceRegistry {
    sources: RwLock<HashMap<SourceId, Source>>,
}

impl InMemorySourceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a source.
    pub fn insert(&self, source: Source) -> Result<(), StorageError> {
        let mut sources = self.sources.write().map_err(|_| lock_err("source.insert"))?;
        sources.insert(source.id, source);
        Ok(())
    }
}

impl SourceRegistry for InMemorySourceRegistry {
    fn get_source(&self, id: SourceId) -> Result<Option<Source>, StorageError> {
        let sources = self.sources.read().map_err(|_| lock_err("source.get_source"))?;
        Ok(sources.get(&id).cloned())
    }
}

/// Thread-safe in-memory preference store.
#[derive(Debug, Default)]
pub struct InMemoryPreferenceStore {
    by_user: RwLock<HashMap<String, Vec<SourcePreference>>>,
}

impl InMemoryPreferenceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a preference for its user.
    pub fn insert(&self, preference: SourcePreference) -> Result<(), StorageError> {
        let mut by_user = self.by_user.write().map_err(|_| lock_err("preference.insert"))?;
        by_user
            .entry(preference.user_id.clone())
            .or_default()
            .push(preference);
        Ok(())
    }
}

impl PreferenceStore for InMemoryPreferenceStore {
    fn get_preferences(&self, user_id: &str) -> Result<Vec<SourcePreference>, StorageError> {
        let by_user = self.by_user.read().map_err(|_| lock_err("preference.get"))?;
        Ok(by_user.get(user_id).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct RepositoryState {
    conflicts: HashMap<ConflictId, Conflict>,
    by_pair: HashMap<UnitPair, ConflictId>,
    history: HashMap<ConflictId, Vec<HistoryEntry>>,
    resolutions: HashMap<ConflictId, Vec<Resolution>>,
    flags: HashMap<FlagId, Flag>,
}

/// Thread-safe in-memory conflict repository.
///
/// All writes happen under one write lock, which gives insert-if-absent and
/// all-or-nothing transition commits for free.
#[derive(Debug, Default)]
pub struct InMemoryConflictRepository {
    state: RwLock<RepositoryState>,
}

impl InMemoryConflictRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored conflicts.
    pub fn conflict_count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("conflict.count"))?;
        Ok(state.conflicts.len())
    }
}

impl ConflictRepository for InMemoryConflictRepository {
    fn insert_if_absent(&self, conflict: Conflict, initial: HistoryEntry) -> Result<Insertion, StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("conflict.insert_if_absent"))?;

        let pair = conflict.pair();
        if let Some(existing) = state.by_pair.get(&pair).and_then(|id| state.conflicts.get(id)) {
            return Ok(Insertion::Existing(existing.clone()));
        }
        if state.conflicts.contains_key(&conflict.id) {
            return Err(StorageError::DuplicateKey(conflict.id.to_string()));
        }
        if initial.conflict_id != conflict.id {
            return Err(StorageError::BackendError(format!(
                "history entry for {} attached to conflict {}",
                initial.conflict_id, conflict.id
            )));
        }

        state.by_pair.insert(pair, conflict.id);
        state.history.insert(conflict.id, vec![initial]);
        state.conflicts.insert(conflict.id, conflict.clone());
        Ok(Insertion::Inserted(conflict))
    }

    fn find_by_unit_pair(&self, pair: UnitPair) -> Result<Option<Conflict>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("conflict.find_by_unit_pair"))?;
        Ok(state
            .by_pair
            .get(&pair)
            .and_then(|id| state.conflicts.get(id))
            .cloned())
    }

    fn get(&self, id: ConflictId) -> Result<Option<Conflict>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("conflict.get"))?;
        Ok(state.conflicts.get(&id).cloned())
    }

    fn commit_transition(
        &self,
        expected: ConflictStatus,
        updated: Conflict,
        entry: HistoryEntry,
        resolution: Option<Resolution>,
    ) -> Result<(), StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("conflict.commit_transition"))?;

        let id = updated.id;
        let current = state
            .conflicts
            .get(&id)
            .ok_or_else(|| StorageError::NotFound(format!("conflict {id}")))?;
        if current.status != expected {
            return Err(StorageError::StaleState(format!(
                "conflict {id} is {}, expected {expected}",
                current.status
            )));
        }
        if entry.conflict_id != id || resolution.as_ref().is_some_and(|r| r.conflict_id != id) {
            return Err(StorageError::BackendError(format!(
                "transition records do not belong to conflict {id}"
            )));
        }

        state.history.entry(id).or_default().push(entry);
        if let Some(resolution) = resolution {
            state.resolutions.entry(id).or_default().push(resolution);
        }
        state.conflicts.insert(id, updated);
        Ok(())
    }

    fn append_history(&self, entry: HistoryEntry) -> Result<(), StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("conflict.append_history"))?;
        if !state.conflicts.contains_key(&entry.conflict_id) {
            return Err(StorageError::NotFound(format!("conflict {}", entry.conflict_id)));
        }
        state.history.entry(entry.conflict_id).or_default().push(entry);
        Ok(())
    }

    fn history(&self, id: ConflictId) -> Result<Vec<HistoryEntry>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("conflict.history"))?;
        Ok(state.history.get(&id).cloned().unwrap_or_default())
    }

    fn resolutions(&self, id: ConflictId) -> Result<Vec<Resolution>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("conflict.resolutions"))?;
        Ok(state.resolutions.get(&id).cloned().unwrap_or_default())
    }

    fn by_status(&self, status: ConflictStatus) -> Result<Vec<Conflict>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("conflict.by_status"))?;
        let mut out: Vec<Conflict> = state
            .conflicts
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.created_at);
        Ok(out)
    }

    fn save_flag(&self, flag: Flag) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("flag.save"))?;
        if state.flags.contains_key(&flag.id) {
            return Err(StorageError::DuplicateKey(flag.id.to_string()));
        }
        state.flags.insert(flag.id, flag);
        Ok(())
    }

    fn get_flag(&self, id: FlagId) -> Result<Option<Flag>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("flag.get"))?;
        Ok(state.flags.get(&id).cloned())
    }

    fn update_flag(&self, expected: FlagStatus, flag: Flag) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("flag.update"))?;
        let current = state
            .flags
            .get(&flag.id)
            .ok_or_else(|| StorageError::NotFound(format!("flag {}", flag.id)))?;
        if current.status != expected {
            return Err(StorageError::StaleState(format!(
                "flag {} is {}, expected {expected}",
                flag.id, current.status
            )));
        }
        state.flags.insert(flag.id, flag);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::conflict::{ConflictType, Severity};

    fn conflict_for(a: UnitId, b: UnitId) -> Conflict {
        Conflict::new(
            (a, SourceId::new()),
            (b, SourceId::new()),
            ConflictType::Dosage,
            Severity::High,
            0.8,
            "dose differs",
        )
    }

    fn insert(repo: &InMemoryConflictRepository, conflict: Conflict) -> Insertion {
        let entry = HistoryEntry::detected(conflict.id, "engine", "detected");
        repo.insert_if_absent(conflict, entry).unwrap()
    }

    #[test]
    fn insert_if_absent_collapses_reversed_pair() {
        let repo = InMemoryConflictRepository::new();
        let (a, b) = (UnitId::new(), UnitId::new());

        let first = insert(&repo, conflict_for(a, b));
        assert!(first.is_inserted());
        let first_id = first.into_conflict().id;

        let second = insert(&repo, conflict_for(b, a));
        assert!(!second.is_inserted());
        assert_eq!(second.into_conflict().id, first_id);
        assert_eq!(repo.conflict_count().unwrap(), 1);
        assert_eq!(repo.history(first_id).unwrap().len(), 1);
    }

    #[test]
    fn commit_transition_is_compare_and_swap() {
        let repo = InMemoryConflictRepository::new();
        let conflict = insert(&repo, conflict_for(UnitId::new(), UnitId::new())).into_conflict();
        let now = Utc::now();

        let updated = conflict.with_status(ConflictStatus::UnderReview, now);
        let entry = HistoryEntry::transition(
            conflict.id,
            ConflictStatus::Active,
            ConflictStatus::UnderReview,
            "rev",
            "",
            now,
        );
        repo.commit_transition(ConflictStatus::Active, updated.clone(), entry.clone(), None)
            .unwrap();

        let err = repo
            .commit_transition(ConflictStatus::Active, updated, entry, None)
            .unwrap_err();
        assert!(matches!(err, StorageError::StaleState(_)));
        assert_eq!(repo.history(conflict.id).unwrap().len(), 2);
        assert_eq!(repo.by_status(ConflictStatus::UnderReview).unwrap().len(), 1);
    }

    #[test]
    fn failed_commit_leaves_nothing_behind() {
        let repo = InMemoryConflictRepository::new();
        let conflict = insert(&repo, conflict_for(UnitId::new(), UnitId::new())).into_conflict();
        let stranger = ConflictId::new();
        let entry = HistoryEntry::transition(
            stranger,
            ConflictStatus::Active,
            ConflictStatus::UnderReview,
            "rev",
            "",
            Utc::now(),
        );
        let updated = conflict.with_status(ConflictStatus::UnderReview, Utc::now());
        assert!(repo
            .commit_transition(ConflictStatus::Active, updated, entry, None)
            .is_err());
        assert_eq!(repo.get(conflict.id).unwrap().unwrap().status, ConflictStatus::Active);
        assert_eq!(repo.history(conflict.id).unwrap().len(), 1);
    }

    #[test]
    fn append_history_requires_conflict() {
        let repo = InMemoryConflictRepository::new();
        let entry = HistoryEntry::evidence_updated(ConflictId::new(), ConflictStatus::Active, "x", "y");
        assert!(matches!(repo.append_history(entry), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn content_store_embeds_on_demand() {
        let store = InMemoryContentStore::with_embedding_dim(32);
        assert_eq!(store.embed("aspirin").unwrap().len(), 32);
        assert!(InMemoryContentStore::without_embedder().embed("aspirin").is_err());
    }

    #[test]
    fn preferences_are_grouped_by_user() {
        use crate::trust::TrustLevel;
        let store = InMemoryPreferenceStore::new();
        store
            .insert(SourcePreference::new("u1", SourceId::new(), TrustLevel::High))
            .unwrap();
        assert_eq!(store.get_preferences("u1").unwrap().len(), 1);
        assert!(store.get_preferences("u2").unwrap().is_empty());
    }
}
