//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, plus pure helpers for vector serialization, dimension checks
//! and similarity computation.
//!
//! Concrete HTTP providers (OpenAI, Ollama) live in the `groundwork` app
//! crate; tests supply their own deterministic providers.

use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::GroundworkError;

/// Trait for embedding providers.
///
/// The model identifier and dimension are recorded in the manifest at build
/// time; a later mismatch in `dims()` is a fatal configuration error.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Reject a vector whose length differs from the configured dimension.
///
/// Vectors are never padded or truncated.
pub fn check_dims(vector: &[f32], expected: usize) -> Result<(), GroundworkError> {
    if vector.len() != expected {
        return Err(GroundworkError::DimensionMismatch {
            stored: vector.len(),
            configured: expected,
        });
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use groundwork_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Base64 text form of [`vec_to_blob`], used by the vector cache file.
pub fn encode_vector(vec: &[f32]) -> String {
    BASE64.encode(vec_to_blob(vec))
}

pub fn decode_vector(text: &str) -> Result<Vec<f32>> {
    let blob = BASE64.decode(text)?;
    if blob.len() % 4 != 0 {
        anyhow::bail!("vector blob length {} is not a multiple of 4", blob.len());
    }
    Ok(blob_to_vec(&blob))
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, or zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_form_decodes() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(decode_vector(&encode_vector(&vec)).unwrap(), vec);
    }

    #[test]
    fn test_decode_rejects_ragged_blob() {
        let text = BASE64.encode([1u8, 2, 3]);
        assert!(decode_vector(&text).is_err());
    }

    #[test]
    fn test_check_dims() {
        assert!(check_dims(&[0.0; 4], 4).is_ok());
        assert!(matches!(
            check_dims(&[0.0; 3], 4),
            Err(GroundworkError::DimensionMismatch {
                stored: 3,
                configured: 4
            })
        ));
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
