//! Storage contracts consumed and written by the engine.
//!
//! The engine never owns content or sources; it reads them through
//! [`ContentStore`] and [`SourceRegistry`]. Everything it produces goes
//! through [`ConflictRepository`], which must provide two guarantees:
//! - insert-if-absent on the unordered unit pair, so concurrent detections of
//!   the same pair collapse into one conflict
//! - status change and history entry (and resolution, if any) commit together
//!   or not at all

use thiserror::Error;

use crate::conflict::{Conflict, ConflictId, ConflictStatus};
use crate::content::{ContentUnit, UnitId, UnitPair};
use crate::flag::{Flag, FlagId, FlagStatus};
use crate::history::HistoryEntry;
use crate::resolution::Resolution;
use crate::source::{Source, SourceId};
use crate::trust::SourcePreference;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Record not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// A compare-and-swap saw a different state than expected.
    #[error("Stale state: {0}")]
    StaleState(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// Result of an insert-if-absent on a unit pair.
#[derive(Debug, Clone)]
pub enum Insertion {
    /// The conflict was stored.
    Inserted(Conflict),
    /// A conflict already existed for the pair; the new one was discarded.
    Existing(Conflict),
}

impl Insertion {
    /// The stored record, whichever branch was taken.
    #[must_use]
    pub fn into_conflict(self) -> Conflict {
        match self {
            Self::Inserted(c) | Self::Existing(c) => c,
        }
    }

    /// True if a new record was written.
    #[must_use]
    pub const fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Read access to content units.
pub trait ContentStore: Send + Sync {
    /// Get a unit by ID.
    fn get_unit(&self, id: UnitId) -> Result<Option<ContentUnit>, StorageError>;

    /// Produce an embedding for text.
    ///
    /// Only called for units without a precomputed embedding.
    fn embed(&self, text: &str) -> Result<Vec<f32>, StorageError>;
}

/// Read access to sources.
pub trait SourceRegistry: Send + Sync {
    /// Get a source by ID.
    fn get_source(&self, id: SourceId) -> Result<Option<Source>, StorageError>;
}

/// Read access to per-user source preferences.
pub trait PreferenceStore: Send + Sync {
    /// All preferences of a user, in any order.
    fn get_preferences(&self, user_id: &str) -> Result<Vec<SourcePreference>, StorageError>;
}

/// Persistence for conflicts, their audit trail, resolutions and flags.
///
/// # Safety Considerations
/// - `insert_if_absent` must check and insert under one critical section
/// - `commit_transition` must apply all of its writes or none
pub trait ConflictRepository: Send + Sync {
    /// Stores `conflict` with its DETECTED entry unless a conflict already
    /// exists for the same unordered unit pair.
    fn insert_if_absent(&self, conflict: Conflict, initial: HistoryEntry) -> Result<Insertion, StorageError>;

    /// Conflict recorded for a unit pair, in any status.
    fn find_by_unit_pair(&self, pair: UnitPair) -> Result<Option<Conflict>, StorageError>;

    /// Get a conflict by ID.
    fn get(&self, id: ConflictId) -> Result<Option<Conflict>, StorageError>;

    /// Replaces a conflict whose stored status equals `expected`, appending
    /// `entry` and `resolution` in the same step.
    ///
    /// Returns [`StorageError::StaleState`] if the stored status differs and
    /// [`StorageError::NotFound`] if the conflict does not exist.
    fn commit_transition(
        &self,
        expected: ConflictStatus,
        updated: Conflict,
        entry: HistoryEntry,
        resolution: Option<Resolution>,
    ) -> Result<(), StorageError>;

    /// Appends an entry that does not change status.
    fn append_history(&self, entry: HistoryEntry) -> Result<(), StorageError>;

    /// Audit trail of a conflict, oldest first.
    fn history(&self, id: ConflictId) -> Result<Vec<HistoryEntry>, StorageError>;

    /// Resolutions of a conflict, oldest first.
    fn resolutions(&self, id: ConflictId) -> Result<Vec<Resolution>, StorageError>;

    /// Conflicts currently in `status`.
    fn by_status(&self, status: ConflictStatus) -> Result<Vec<Conflict>, StorageError>;

    /// Stores a new flag.
    fn save_flag(&self, flag: Flag) -> Result<(), StorageError>;

    /// Get a flag by ID.
    fn get_flag(&self, id: FlagId) -> Result<Option<Flag>, StorageError>;

    /// Replaces a flag whose stored status equals `expected`.
    fn update_flag(&self, expected: FlagStatus, flag: Flag) -> Result<(), StorageError>;
}
