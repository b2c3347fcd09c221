//! Topical similarity gate.
//!
//! Contradiction detection only makes sense between statements about the same
//! topic, and the gate is what keeps N x M batch scans affordable: pairs below
//! the threshold never reach the pattern detectors or the adjudicator.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::config::SimilarityConfig;
use crate::content::ContentUnit;
use crate::embedding::cosine_similarity;
use crate::error::{EmbeddingError, MedConflictResult};
use crate::storage::ContentStore;

/// Outcome of the gate for one pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    /// Cosine similarity of the two embeddings.
    pub similarity: f32,
    /// True if the pair may proceed to analysis.
    pub pass: bool,
    /// True if the similarity is high enough to consult the adjudicator even
    /// without a pattern match.
    pub high_similarity: bool,
}

/// Cosine-similarity gate over unit embeddings.
#[derive(Debug, Clone, Default)]
pub struct SimilarityGate {
    config: SimilarityConfig,
}

impl SimilarityGate {
    /// Creates a gate with the given thresholds.
    #[must_use]
    pub fn new(config: SimilarityConfig) -> Self {
        Self { config }
    }

    /// Pass threshold.
    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.config.gate_threshold
    }

    /// Decides whether two units are about the same topic.
    ///
    /// Missing embeddings are generated through `store`. Failing to do so is
    /// an [`EmbeddingError`]; embeddings of different length are a
    /// validation error.
    pub fn is_topically_related(
        &self,
        store: &dyn ContentStore,
        unit_a: &ContentUnit,
        unit_b: &ContentUnit,
    ) -> MedConflictResult<GateDecision> {
        let a = embedding_of(store, unit_a)?;
        let b = embedding_of(store, unit_b)?;
        let similarity = cosine_similarity(&a, &b)?;
        Ok(self.decide(similarity))
    }

    /// Applies the thresholds to a precomputed similarity.
    #[must_use]
    pub fn decide(&self, similarity: f32) -> GateDecision {
        GateDecision {
            similarity,
            pass: similarity >= self.config.gate_threshold,
            high_similarity: similarity >= self.config.high_similarity_threshold,
        }
    }
}

fn embedding_of<'a>(store: &dyn ContentStore, unit: &'a ContentUnit) -> Result<Cow<'a, [f32]>, EmbeddingError> {
    if let Some(embedding) = unit.embedding.as_deref() {
        return Ok(Cow::Borrowed(embedding));
    }
    let embedding = store.embed(&unit.text).map_err(|e| EmbeddingError::Unavailable {
        unit_id: unit.id,
        reason: e.to_string(),
    })?;
    if embedding.is_empty() {
        return Err(EmbeddingError::Unavailable {
            unit_id: unit.id,
            reason: "embedder returned an empty vector".to_string(),
        });
    }
    Ok(Cow::Owned(embedding))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MedConflictError, ValidationError};
    use crate::source::SourceId;
    use crate::storage::InMemoryContentStore;

    fn unit(text: &str, embedding: Option<Vec<f32>>) -> ContentUnit {
        let u = ContentUnit::new(SourceId::new(), text);
        match embedding {
            Some(e) => u.with_embedding(e),
            None => u,
        }
    }

    #[test]
    fn precomputed_embeddings_are_used() {
        let gate = SimilarityGate::default();
        let store = InMemoryContentStore::without_embedder();
        let a = unit("a", Some(vec![1.0, 0.0]));
        let b = unit("b", Some(vec![0.9, 0.1]));
        let decision = gate.is_topically_related(&store, &a, &b).unwrap();
        assert!(decision.pass);
        assert!(decision.similarity > 0.99);
    }

    #[test]
    fn below_threshold_does_not_pass() {
        let gate = SimilarityGate::default();
        let store = InMemoryContentStore::without_embedder();
        let a = unit("a", Some(vec![1.0, 0.0]));
        let b = unit("b", Some(vec![0.0, 1.0]));
        let decision = gate.is_topically_related(&store, &a, &b).unwrap();
        assert!(!decision.pass);
        assert!(!decision.high_similarity);
    }

    #[test]
    fn threshold_is_inclusive() {
        let gate = SimilarityGate::default();
        assert!(gate.decide(0.85).pass);
        assert!(!gate.decide(0.8499).pass);
        assert!(gate.decide(0.92).high_similarity);
    }

    #[test]
    fn missing_embedding_is_generated() {
        let gate = SimilarityGate::default();
        let store = InMemoryContentStore::new();
        let a = unit("aspirin dose for prevention", None);
        let b = unit("aspirin dose for prevention", None);
        let decision = gate.is_topically_related(&store, &a, &b).unwrap();
        assert!(decision.pass);
    }

    #[test]
    fn unavailable_embedder_is_reported() {
        let gate = SimilarityGate::default();
        let store = InMemoryContentStore::without_embedder();
        let a = unit("a", None);
        let b = unit("b", Some(vec![1.0]));
        let err = gate.is_topically_related(&store, &a, &b).unwrap_err();
        assert!(err.is_embedding_unavailable());
    }

    #[test]
    fn dimension_mismatch_is_validation() {
        let gate = SimilarityGate::default();
        let store = InMemoryContentStore::without_embedder();
        let a = unit("a", Some(vec![1.0, 0.0]));
        let b = unit("b", Some(vec![1.0, 0.0, 0.0]));
        let err = gate.is_topically_related(&store, &a, &b).unwrap_err();
        assert!(matches!(
            err,
            MedConflictError::Validation(ValidationError::InvalidEmbeddingDimension { .. })
        ));
    }
}
