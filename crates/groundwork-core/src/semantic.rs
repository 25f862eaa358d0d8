//! Semantic index: brute-force cosine similarity over chunk embeddings.
//!
//! Built off to the side from a complete vector set and never edited in
//! place; the query path publishes a fresh instance through
//! [`IndexHandle`](crate::index::IndexHandle).

use std::cmp::Ordering;

use crate::embedding::{check_dims, cosine_similarity};
use crate::error::Result;
use crate::models::{ranked, RetrievalCandidate};
use crate::store::ChunkStore;

#[derive(Debug, Clone)]
pub struct SemanticIndex {
    dim: usize,
    model_identifier: String,
    entries: Vec<(String, Vec<f32>)>,
}

impl SemanticIndex {
    /// Build from `(chunk_id, vector)` pairs. Every vector must have `dim` entries.
    pub fn build(
        dim: usize,
        model_identifier: impl Into<String>,
        vectors: Vec<(String, Vec<f32>)>,
    ) -> Result<Self> {
        for (_, v) in &vectors {
            check_dims(v, dim)?;
        }
        let mut entries = vectors;
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Self {
            dim,
            model_identifier: model_identifier.into(),
            entries,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn model_identifier(&self) -> &str {
        &self.model_identifier
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the index holds a vector for exactly the chunks in `store`.
    pub fn covers(&self, store: &ChunkStore) -> bool {
        if self.entries.len() != store.len() {
            return false;
        }
        store
            .chunks()
            .iter()
            .all(|c| self.entries.binary_search_by(|(id, _)| id.as_str().cmp(&c.id)).is_ok())
    }

    /// Top-`k` chunks by cosine similarity, ties broken by chunk ID.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievalCandidate>> {
        check_dims(vector, self.dim)?;

        let mut scored: Vec<(String, f64)> = self
            .entries
            .iter()
            .map(|(id, v)| (id.clone(), cosine_similarity(vector, v) as f64))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(ranked(scored))
    }
}
