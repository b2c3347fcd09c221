//! # medconflict - Conflict detection and resolution for medical education content
//!
//! medconflict finds statements from independently authored sources (lecture
//! notes, textbooks, journals, guidelines) that contradict each other,
//! explains the contradiction, ranks which source is more trustworthy on an
//! evidence-based-medicine hierarchy, and tracks each contradiction from
//! detection to resolution with an append-only audit trail.
//!
//! ## Core Concepts
//!
//! - **ContentUnit**: One statement from one source, with an embedding
//! - **Similarity gate**: Pairs below 0.85 cosine similarity are never compared
//! - **Detectors**: Five contradiction heuristics over normalized text
//! - **Adjudicator**: Optional model call under a deadline, with pattern-only fallback
//! - **EBM evaluation**: Evidence level I-V, credibility score and grade A-D per source
//! - **Lifecycle**: ACTIVE -> UNDER_REVIEW -> RESOLVED / DISMISSED, reopenable
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use medconflict::{
//!     ConflictEngine, ContentUnit, InMemoryConflictRepository, InMemoryContentStore,
//!     InMemorySourceRegistry, Source, SourceType,
//! };
//!
//! let content = Arc::new(InMemoryContentStore::new());
//! let sources = Arc::new(InMemorySourceRegistry::new());
//! let engine = ConflictEngine::builder(content.clone(), sources.clone(), Arc::new(InMemoryConflictRepository::new()))
//!     .build()?;
//!
//! let guideline = Source::new("ACC/AHA 2024", SourceType::Guideline, 92);
//! let lecture = Source::new("Pharmacology lecture 7", SourceType::Lecture, 70);
//! let a = ContentUnit::new(guideline.id, "ACE inhibitors are contraindicated in pregnancy");
//! let b = ContentUnit::new(lecture.id, "ACE inhibitors are safe in pregnancy");
//! // insert sources and units, then:
//! let conflict = engine.detect_conflict(a.id, b.id)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod conflict;
pub mod content;
pub mod error;
pub mod flag;
pub mod history;
pub mod resolution;
pub mod source;
pub mod trust;

// Configuration and storage contracts
pub mod config;
pub mod storage;

// Pipeline
pub mod adjudicator;
pub mod embedding;
pub mod evidence;
pub mod normalize;
pub mod pattern;
pub mod recommend;
pub mod scorer;
pub mod similarity;

// Lifecycle and engine
pub mod engine;
pub mod lifecycle;

// Re-export primary types at crate root for convenience
pub use adjudicator::{
    Adjudication, AdjudicationGuard, AdjudicationRequest, Adjudicator, AdjudicatorConfig, HttpAdjudicator,
    Verdict,
};
pub use config::EngineConfig;
pub use conflict::{Conflict, ConflictId, ConflictStatus, ConflictType, DetectionOrigin, Severity};
pub use content::{ContentUnit, LocationMeta, UnitId, UnitPair};
pub use engine::{BatchReport, CancellationToken, ConflictEngine, EngineBuilder, PairOutcome, PairReport};
pub use error::{
    AdjudicationError, EmbeddingError, LifecycleError, MedConflictError, MedConflictResult, ValidationError,
};
pub use evidence::{
    CredibilityTables, EbmComparison, EbmEvaluator, EvidenceLevel, EvidenceSide, Grade, SourceEvaluation,
};
pub use flag::{Flag, FlagDecision, FlagId, FlagStatus};
pub use history::{ChangeType, HistoryEntry};
pub use lifecycle::ConflictLifecycleManager;
pub use normalize::TextNormalizer;
pub use pattern::{Detector, DetectorSet, PatternKind, PatternMatch};
pub use recommend::{Recommendation, ResolutionRecommender};
pub use resolution::{Resolution, ResolutionDraft};
pub use scorer::{Assessment, ConflictScorer};
pub use similarity::{GateDecision, SimilarityGate};
pub use source::{Source, SourceId, SourceType};
pub use storage::{
    ConflictRepository, ContentStore, InMemoryConflictRepository, InMemoryContentStore, InMemoryPreferenceStore,
    InMemorySourceRegistry, Insertion, PreferenceStore, SourceRegistry, StorageError,
};
pub use trust::{PreferenceSet, SourcePreference, TrustLevel};
