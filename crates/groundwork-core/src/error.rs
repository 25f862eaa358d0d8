//! Typed errors for the ingestion and retrieval core.
//!
//! Callers branch on these: load errors are recovered per file, config and
//! dimension errors are fatal, rerank errors degrade to fused order, and an
//! unavailable index narrows the query to whatever index is present.

use thiserror::Error;

pub type Result<T, E = GroundworkError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum GroundworkError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(
        "embedding dimension mismatch: index has {stored}, configured model produces {configured}; \
         run a full reseed (`gw ingest --reseed`)"
    )]
    DimensionMismatch { stored: usize, configured: usize },

    #[error("{0} index is not available")]
    IndexUnavailable(&'static str),

    #[error("failed to load {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("manifest is inconsistent with the chunk store: {0}")]
    ManifestInvalid(String),

    #[error("rerank batch timed out after {0}ms")]
    RerankTimeout(u64),

    #[error("relevance judge failed: {0}")]
    RerankJudge(String),

    #[error("lexical index error: {0}")]
    Lexical(#[from] tantivy::TantivyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl GroundworkError {
    /// Fatal errors stop a run and must be surfaced to the operator.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GroundworkError::Config(_) | GroundworkError::DimensionMismatch { .. }
        )
    }
}
