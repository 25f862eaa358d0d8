//! # Groundwork
//!
//! Incremental document ingestion and hybrid retrieval for grounding
//! answer generation.
//!
//! Groundwork keeps a chunk store in sync with a directory of documents,
//! re-chunking only what changed, and answers questions with passages
//! drawn from a semantic (embedding) index and a lexical (BM25) index,
//! fused by rank and optionally reordered by an external relevance judge.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────────┐
//! │   Sources   │──▶│  Orchestrator │──▶│  Store dir     │
//! │ md/txt/pdf/ │   │ hash+classify │   │ chunks.jsonl   │
//! │    docx     │   │ chunk+embed   │   │ manifest.json  │
//! └─────────────┘   └──────────────┘   │ vectors.jsonl  │
//!                                      └───────┬───────┘
//!                                              ▼
//!                   ┌──────────────────────────────────┐
//!                   │ Retriever: semantic + BM25 → fuse │
//!                   │            → rerank → top_k       │
//!                   └──────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! gw ingest                        # sync the store with sources.root
//! gw search "how do heat pumps work?" --mode hybrid
//! gw status                        # what is indexed
//! gw ingest --reseed               # rebuild everything from scratch
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`loader`] | Source scan and text/PDF/DOCX decoding |
//! | [`storage`] | Store directory layout and atomic persistence |
//! | [`lock`] | Single-writer ingestion lock |
//! | [`embedding`] | OpenAI and Ollama embedding providers |
//! | [`judge`] | LLM relevance judge |
//! | [`rerank`] | Time-bounded batched reranking |
//! | [`ingest`] | Incremental rebuild orchestrator |
//! | [`retrieve`] | Query pipeline |
//! | [`status`] | Store overview |
//!
//! Pure logic (chunking, manifest, indexes, fusion) lives in
//! [`groundwork_core`].

pub mod config;
pub mod embedding;
mod http;
pub mod ingest;
pub mod judge;
pub mod loader;
pub mod lock;
pub mod rerank;
pub mod retrieve;
pub mod status;
pub mod storage;
