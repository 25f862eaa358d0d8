//! # Groundwork Core
//!
//! Runtime-agnostic logic for Groundwork: data models, content hashing,
//! sentence-window chunking, the chunk store and manifest, change detection,
//! lexical and semantic indexes, rank fusion, and rerank merging.
//!
//! This crate contains no tokio, filesystem I/O, or network code. The
//! `groundwork` application crate supplies loaders, persistence, external
//! providers, and the time-bounded query pipeline on top of it.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`hash`] | Deterministic SHA-256 digests |
//! | [`models`] | Chunks, source types, candidates |
//! | [`chunk`] | Sentence-window chunker and its config |
//! | [`store`] | Append-ordered chunk store |
//! | [`manifest`] | Change-tracking ledger and change detector |
//! | [`embedding`] | Embedding provider trait and vector utilities |
//! | [`semantic`] | Brute-force cosine vector index |
//! | [`lexical`] | BM25 term index |
//! | [`fusion`] | Rank-normalized weighted fusion |
//! | [`rerank`] | Judge trait and rerank merge contract |
//! | [`index`] | Atomically swappable index handle |
//! | [`error`] | Typed domain errors |

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod hash;
pub mod index;
pub mod lexical;
pub mod manifest;
pub mod models;
pub mod rerank;
pub mod semantic;
pub mod store;

pub use error::{GroundworkError, Result};
