//! Error types for medconflict.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! the specific condition. Only validation and lifecycle errors are meant to
//! reach callers of single-pair APIs; embedding and adjudication failures are
//! absorbed by the engine (skip or fallback).

use thiserror::Error;

use crate::conflict::{ConflictId, ConflictStatus};
use crate::content::UnitId;
use crate::flag::{FlagId, FlagStatus};
use crate::source::SourceId;
use crate::storage::StorageError;

/// Validation errors raised before a pair or command enters the pipeline.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unit {id} cannot be compared with itself")]
    SameUnit {
        id: UnitId,
    },

    #[error("Units {unit_a} and {unit_b} belong to the same source {source_id}")]
    SameSource {
        unit_a: UnitId,
        unit_b: UnitId,
        source_id: SourceId,
    },

    #[error("Content unit not found: {id}")]
    UnknownUnit {
        id: UnitId,
    },

    #[error("Source not found: {id}")]
    UnknownSource {
        id: SourceId,
    },

    #[error("Content unit {id} has empty text")]
    EmptyText {
        id: UnitId,
    },

    #[error("Embedding has {actual} dimensions, expected {expected}")]
    InvalidEmbeddingDimension {
        actual: usize,
        expected: usize,
    },

    #[error("Source {source_id} is not part of conflict {conflict_id}")]
    SourceNotInConflict {
        conflict_id: ConflictId,
        source_id: SourceId,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors raised by the conflict and flag state machines.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Invalid transition for conflict {conflict_id}: {from} -> {to}")]
    InvalidTransition {
        conflict_id: ConflictId,
        from: ConflictStatus,
        to: ConflictStatus,
    },

    #[error("Conflict {conflict_id} was modified concurrently (expected status {expected})")]
    ConcurrentModification {
        conflict_id: ConflictId,
        expected: ConflictStatus,
    },

    #[error("Conflict not found: {id}")]
    ConflictNotFound {
        id: ConflictId,
    },

    #[error("Flag not found: {id}")]
    FlagNotFound {
        id: FlagId,
    },

    #[error("Invalid transition for flag {flag_id}: {from} -> {to}")]
    InvalidFlagTransition {
        flag_id: FlagId,
        from: FlagStatus,
        to: FlagStatus,
    },
}

/// The content store could not produce an embedding for a unit.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding unavailable for unit {unit_id}: {reason}")]
    Unavailable {
        unit_id: UnitId,
        reason: String,
    },
}

/// Failures of the external adjudication call.
///
/// These never escape the engine: the adjudication guard turns each of them
/// into a pattern-only fallback.
#[derive(Debug, Error)]
pub enum AdjudicationError {
    #[error("Adjudication timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Adjudicator unavailable: {reason}")]
    Unavailable {
        reason: String,
    },

    #[error("Malformed adjudication response: {reason}")]
    Malformed {
        reason: String,
    },

    #[error("Adjudication HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Top-level error type for medconflict.
#[derive(Debug, Error)]
pub enum MedConflictError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl MedConflictError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a lifecycle error.
    #[must_use]
    pub const fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Lifecycle(_))
    }

    /// Returns true if this is an illegal state-machine edge.
    #[must_use]
    pub const fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            Self::Lifecycle(
                LifecycleError::InvalidTransition { .. } | LifecycleError::InvalidFlagTransition { .. }
            )
        )
    }

    /// Returns true if the embedding for a unit could not be produced.
    #[must_use]
    pub const fn is_embedding_unavailable(&self) -> bool {
        matches!(self, Self::Embedding(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Internal { .. } => false,
            Self::Lifecycle(e) => matches!(e, LifecycleError::ConcurrentModification { .. }),
            Self::Embedding(_) => true,
            Self::Storage(e) => matches!(e, StorageError::BackendError(_) | StorageError::StaleState(_)),
        }
    }
}

/// Result type alias for medconflict operations.
pub type MedConflictResult<T> = Result<T, MedConflictError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_same_source() {
        let err = ValidationError::SameSource {
            unit_a: UnitId::new(),
            unit_b: UnitId::new(),
            source_id: SourceId::new(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("same source"));
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = LifecycleError::InvalidTransition {
            conflict_id: ConflictId::new(),
            from: ConflictStatus::Active,
            to: ConflictStatus::Resolved,
        };
        let msg = format!("{err}");
        assert!(msg.contains("active -> resolved"));
    }

    #[test]
    fn test_adjudication_timeout_message() {
        let err = AdjudicationError::Timeout { duration_ms: 5000 };
        assert!(format!("{err}").contains("5000ms"));
    }

    #[test]
    fn test_top_level_from_validation() {
        let err: MedConflictError = ValidationError::SameUnit { id: UnitId::new() }.into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_top_level_invalid_transition() {
        let err: MedConflictError = LifecycleError::InvalidTransition {
            conflict_id: ConflictId::new(),
            from: ConflictStatus::Dismissed,
            to: ConflictStatus::UnderReview,
        }
        .into();
        assert!(err.is_lifecycle());
        assert!(err.is_invalid_transition());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_embedding_unavailable_is_retryable() {
        let err: MedConflictError = EmbeddingError::Unavailable {
            unit_id: UnitId::new(),
            reason: "model offline".to_string(),
        }
        .into();
        assert!(err.is_embedding_unavailable());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_internal_error() {
        let err = MedConflictError::internal("unexpected state");
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("unexpected state"));
    }
}
