//! Canonical chunk store.
//!
//! An append-ordered collection of [`Chunk`]s addressed by ID. Replacing a
//! document removes its prior range and appends the new one at the end;
//! record position carries no meaning beyond that.
//!
//! The store is owned by the ingestion orchestrator (single writer). Query
//! paths only ever read snapshots built from it.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::models::Chunk;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkStore {
    chunks: Vec<Chunk>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunks_for_doc<'a>(&'a self, doc_id: &'a str) -> impl Iterator<Item = &'a Chunk> + 'a {
        self.chunks.iter().filter(move |c| c.doc_id == doc_id)
    }

    pub fn doc_chunk_count(&self, doc_id: &str) -> usize {
        self.chunks_for_doc(doc_id).count()
    }

    /// Chunk counts per document ID.
    pub fn counts_by_doc(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for c in &self.chunks {
            *counts.entry(c.doc_id.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Remove every chunk of `doc_id` and append `chunks` in order.
    pub fn replace_document(&mut self, doc_id: &str, chunks: Vec<Chunk>) {
        self.purge_document(doc_id);
        self.chunks.extend(chunks);
    }

    /// Remove every chunk of `doc_id`, returning how many were removed.
    pub fn purge_document(&mut self, doc_id: &str) -> usize {
        let before = self.chunks.len();
        self.chunks.retain(|c| c.doc_id != doc_id);
        before - self.chunks.len()
    }

    /// True when `doc_id` owns exactly the chunks `0..count` and nothing else.
    pub fn has_contiguous_range(&self, doc_id: &str, count: usize) -> bool {
        let mut seen = vec![false; count];
        let mut total = 0usize;
        for c in self.chunks_for_doc(doc_id) {
            total += 1;
            match c.index() {
                Some(i) if i < count && !seen[i] => seen[i] = true,
                _ => return false,
            }
        }
        total == count && seen.into_iter().all(|s| s)
    }

    /// Serialize as JSON Lines, one record per chunk, in store order.
    pub fn to_jsonl(&self) -> Result<String> {
        let mut out = String::new();
        for chunk in &self.chunks {
            out.push_str(&serde_json::to_string(chunk)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Parse JSON Lines produced by [`to_jsonl`](Self::to_jsonl). Blank lines are skipped.
    pub fn from_jsonl(text: &str) -> Result<Self> {
        let mut chunks = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            chunks.push(serde_json::from_str(line)?);
        }
        Ok(Self { chunks })
    }
}
