//! Deterministic lexical embedding and cosine similarity.
//!
//! Not a neural model: tokens and adjacent token pairs are feature-hashed with
//! blake3 into a fixed number of signed buckets, then L2-normalized. Two
//! statements that share most of their vocabulary land close together, which is
//! enough for offline use and tests. Production content stores are expected to
//! supply model embeddings through [`crate::storage::ContentStore::embed`].

use blake3::Hasher;

use crate::error::ValidationError;

/// Default embedding dimensionality.
pub const DEFAULT_EMBEDDING_DIM: usize = 256;

/// Words that carry no topical signal.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "of", "in", "on", "for", "to", "and", "or", "is", "are", "be", "with", "by", "as", "at",
];

fn tokenize(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !STOP_WORDS.contains(t))
}

fn bucket(feature: &[u8], dim: usize) -> (usize, f32) {
    let mut h = Hasher::new();
    h.update(feature);
    let hash = h.finalize();
    let bytes = hash.as_bytes();

    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    #[allow(clippy::cast_possible_truncation)]
    let idx = (u64::from_le_bytes(raw) % dim as u64) as usize;
    let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
    (idx, sign)
}

/// Embeds text with [`DEFAULT_EMBEDDING_DIM`] dimensions.
#[must_use]
pub fn lexical_embedding(text: &str) -> Vec<f32> {
    lexical_embedding_with_dim(text, DEFAULT_EMBEDDING_DIM)
}

/// Embeds text with a custom dimension.
///
/// Unigrams weigh 1.0, bigrams 0.5.
#[must_use]
pub fn lexical_embedding_with_dim(text: &str, dim: usize) -> Vec<f32> {
    if dim == 0 {
        return Vec::new();
    }

    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = tokenize(&lowered).collect();
    let mut vec = vec![0.0f32; dim];

    for token in &tokens {
        let (idx, sign) = bucket(token.as_bytes(), dim);
        vec[idx] += sign;
    }
    for pair in tokens.windows(2) {
        let feature = format!("{} {}", pair[0], pair[1]);
        let (idx, sign) = bucket(feature.as_bytes(), dim);
        vec[idx] += 0.5 * sign;
    }

    let norm2: f64 = vec.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
    if norm2 > 0.0 {
        #[allow(clippy::cast_possible_truncation)]
        let inv = norm2.sqrt().recip() as f32;
        for x in &mut vec {
            *x *= inv;
        }
    }

    vec
}

/// Cosine similarity of two vectors.
///
/// Empty or zero vectors are dissimilar to everything (0.0). Vectors of
/// different length are rejected.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, ValidationError> {
    if a.len() != b.len() {
        return Err(ValidationError::InvalidEmbeddingDimension {
            actual: b.len(),
            expected: a.len(),
        });
    }
    if a.is_empty() {
        return Ok(0.0);
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= 0.0 || norm_b <= 0.0 {
        return Ok(0.0);
    }

    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    if sim.is_finite() {
        #[allow(clippy::cast_possible_truncation)]
        Ok(sim.clamp(-1.0, 1.0) as f32)
    } else {
        Ok(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_embedding_is_deterministic() {
        let a = lexical_embedding("aspirin 81 mg daily");
        let b = lexical_embedding("aspirin 81 mg daily");
        assert_eq!(a, b);
    }

    #[test]
    fn lexical_embedding_dim_is_respected() {
        assert_eq!(lexical_embedding_with_dim("x", 13).len(), 13);
        assert!(lexical_embedding_with_dim("x", 0).is_empty());
    }

    #[test]
    fn identical_text_is_maximally_similar() {
        let a = lexical_embedding("ACE inhibitors in pregnancy");
        let sim = cosine_similarity(&a, &a).unwrap();
        assert!((sim - 1.0).abs() < 1e-5);
    }

    #[test]
    fn related_text_is_closer_than_unrelated() {
        let a = lexical_embedding("ace inhibitors are safe in pregnancy");
        let b = lexical_embedding("ace inhibitors are contraindicated in pregnancy");
        let c = lexical_embedding("insulin glargine titration schedule");
        let related = cosine_similarity(&a, &b).unwrap();
        let unrelated = cosine_similarity(&a, &c).unwrap();
        assert!(related > unrelated);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let err = cosine_similarity(&[1.0, 0.0], &[1.0]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidEmbeddingDimension { actual: 1, expected: 2 }));
    }

    #[test]
    fn zero_vector_is_dissimilar() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&[], &[]).unwrap(), 0.0);
    }
}
