//! Core data models that flow through ingestion and retrieval.

use serde::{Deserialize, Serialize};

/// How a source file is split into text units by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// One unit per page (PDF).
    Paged,
    /// One unit for the whole file.
    Flat,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Paged => "paged",
            SourceType::Flat => "flat",
        }
    }
}

/// A raw text unit extracted by the loader: a page, or a whole flat file.
#[derive(Debug, Clone, PartialEq)]
pub struct TextUnit {
    pub text: String,
    /// 1-based page number for paged sources.
    pub page: Option<u32>,
}

/// Identity of the document a chunk belongs to.
#[derive(Debug, Clone)]
pub struct DocumentRef<'a> {
    pub doc_id: &'a str,
    pub source_path: &'a str,
    pub source_type: SourceType,
}

/// Atomic retrievable unit of text. Serialized as one Chunk Store record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `{doc_id}#{index}`.
    pub id: String,
    pub doc_id: String,
    pub source_path: String,
    pub source_type: SourceType,
    pub page: Option<u32>,
    #[serde(default)]
    pub heading_path: Vec<String>,
    pub text: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

impl Chunk {
    pub fn make_id(doc_id: &str, index: usize) -> String {
        format!("{}#{}", doc_id, index)
    }

    /// Parse the document-order index out of the chunk ID.
    pub fn index(&self) -> Option<usize> {
        let (doc, idx) = self.id.rsplit_once('#')?;
        if doc != self.doc_id {
            return None;
        }
        idx.parse().ok()
    }
}

/// One entry of a single retrieval list (semantic or lexical).
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalCandidate {
    pub chunk_id: String,
    /// Backend score: cosine similarity or BM25.
    pub raw_score: f64,
    /// 1-based position within its source list.
    pub rank: usize,
}

/// A candidate after fusing the semantic and lexical lists.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub chunk_id: String,
    pub semantic_rank: Option<usize>,
    pub keyword_rank: Option<usize>,
    pub fused_score: f64,
}

/// A passage handed to the answer-synthesis step.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedPassage {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    pub score: f64,
    pub source_path: String,
    pub source_type: SourceType,
    pub page: Option<u32>,
    pub heading_path: Vec<String>,
    pub semantic_rank: Option<usize>,
    pub keyword_rank: Option<usize>,
    /// True when `score` came from the relevance judge.
    pub reranked: bool,
}

/// Assign 1-based ranks to an already sorted list of `(chunk_id, score)`.
pub fn ranked(scored: Vec<(String, f64)>) -> Vec<RetrievalCandidate> {
    scored
        .into_iter()
        .enumerate()
        .map(|(i, (chunk_id, raw_score))| RetrievalCandidate {
            chunk_id,
            raw_score,
            rank: i + 1,
        })
        .collect()
}
