//! Query pipeline: semantic + lexical retrieval, fusion, optional rerank.
//!
//! ```text
//! question ─┬─ embed ─ semantic top-k ─┐
//!           └──────── lexical top-k ───┴─ fuse ─ [rerank top_n] ─ truncate(top_k)
//! ```
//!
//! Which lists run and whether reranking happens is fixed when the
//! [`Retriever`] is built ([`RetrievalPlan`]). At query time the pipeline
//! only narrows: if the semantic side is unavailable (no index, no
//! embedder, embedding failure or timeout) it falls back to the lexical
//! list alone. A question with nothing to ground it returns an empty list.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use groundwork_core::embedding::EmbeddingProvider;
use groundwork_core::fusion::fuse;
use groundwork_core::index::{CorpusSnapshot, IndexHandle};
use groundwork_core::models::{FusedCandidate, RetrievalCandidate, RetrievedPassage};
use groundwork_core::rerank::{JudgeOutcome, RelevanceJudge};
use groundwork_core::semantic::SemanticIndex;
use tracing::{debug, info, warn};

use crate::config::{Config, RetrievalMode};
use crate::embedding::{create_provider, embed_query};
use crate::judge::create_judge;
use crate::rerank::{RerankSettings, Reranker};
use crate::storage::{self, StorePaths};

/// How the fused list is formed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionPlan {
    /// Semantic list alone (alpha = 1).
    Semantic,
    Hybrid { alpha: f64 },
}

/// Resolved once per [`Retriever`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalPlan {
    pub fusion: FusionPlan,
    pub semantic_k: usize,
    pub keyword_k: usize,
    pub default_top_k: usize,
}

impl RetrievalPlan {
    pub fn from_config(config: &Config, mode: RetrievalMode) -> Self {
        let r = &config.retrieval;
        let fusion = match mode {
            RetrievalMode::Semantic => FusionPlan::Semantic,
            RetrievalMode::Hybrid => FusionPlan::Hybrid {
                alpha: r.fusion.alpha,
            },
        };
        Self {
            fusion,
            semantic_k: r.semantic_k,
            keyword_k: r.keyword_k,
            default_top_k: r.default_top_k,
        }
    }
}

pub enum RerankPlan {
    Disabled,
    Enabled(Reranker),
}

pub struct Retriever {
    paths: StorePaths,
    snapshot: IndexHandle<CorpusSnapshot>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    plan: RetrievalPlan,
    rerank: RerankPlan,
    query_timeout: Duration,
}

impl Retriever {
    /// Build providers from config and load the current corpus.
    pub fn open(config: &Config, mode: RetrievalMode) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let judge = create_judge(&config.rerank)?;
        Self::with_providers(config, mode, embedder, judge)
    }

    pub fn with_providers(
        config: &Config,
        mode: RetrievalMode,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        judge: Option<Arc<dyn RelevanceJudge>>,
    ) -> Result<Self> {
        let paths = StorePaths::new(&config.store.dir);
        let rerank = match judge {
            Some(judge) if config.rerank.enabled => {
                RerankPlan::Enabled(Reranker::new(judge, RerankSettings::from(&config.rerank)))
            }
            _ => RerankPlan::Disabled,
        };
        let snapshot = load_snapshot(&paths, embedder.as_deref())?;
        info!(
            chunks = snapshot.len(),
            semantic = snapshot.semantic().is_ok(),
            "corpus loaded"
        );

        Ok(Self {
            paths,
            snapshot: IndexHandle::new(snapshot),
            embedder,
            plan: RetrievalPlan::from_config(config, mode),
            rerank,
            query_timeout: Duration::from_secs(config.embedding.timeout_secs),
        })
    }

    pub fn plan(&self) -> &RetrievalPlan {
        &self.plan
    }

    pub fn snapshot(&self) -> Arc<CorpusSnapshot> {
        self.snapshot.load()
    }

    /// Rebuild the snapshot from disk and swap it in. In-flight queries
    /// finish on the snapshot they started with.
    pub fn reload(&self) -> Result<()> {
        let next = load_snapshot(&self.paths, self.embedder.as_deref())?;
        info!(chunks = next.len(), "corpus reloaded");
        self.snapshot.publish(next);
        Ok(())
    }

    /// Ordered passages for `question`, at most `top_k` (default from config).
    pub async fn retrieve(&self, question: &str, top_k: Option<usize>) -> Vec<RetrievedPassage> {
        let question = question.trim();
        let top_k = top_k.unwrap_or(self.plan.default_top_k);
        if question.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let snapshot = self.snapshot.load();
        if snapshot.is_empty() {
            debug!("chunk store is empty; no grounding available");
            return Vec::new();
        }

        let mut fused = match self.plan.fusion {
            FusionPlan::Semantic => match self.semantic_candidates(&snapshot, question).await {
                Some(semantic) => fuse(&semantic, &[], 1.0),
                None => {
                    info!("semantic retrieval unavailable; narrowing to lexical");
                    self.lexical_only(&snapshot, question)
                }
            },
            FusionPlan::Hybrid { alpha } => {
                let (semantic, lexical) = tokio::join!(
                    self.semantic_candidates(&snapshot, question),
                    async { self.lexical_candidates(&snapshot, question) }
                );
                match (semantic, lexical) {
                    (Some(s), Some(l)) => fuse(&s, &l, alpha),
                    (Some(s), None) => fuse(&s, &[], 1.0),
                    (None, Some(l)) => {
                        info!("semantic retrieval unavailable; narrowing to lexical");
                        fuse(&[], &l, 0.0)
                    }
                    (None, None) => Vec::new(),
                }
            }
        };

        if fused.is_empty() {
            return Vec::new();
        }
        if let Some(top) = fused.first() {
            debug!(
                candidates = fused.len(),
                top = %top.chunk_id,
                score = top.fused_score,
                "fused"
            );
        }

        let mut ranked: Vec<(FusedCandidate, JudgeOutcome)> = match &self.rerank {
            RerankPlan::Disabled => fused
                .into_iter()
                .map(|c| (c, JudgeOutcome::Unscored))
                .collect(),
            RerankPlan::Enabled(reranker) => {
                let split = reranker.settings().top_n.min(fused.len());
                let tail = fused.split_off(split);
                let mut merged = reranker
                    .rerank(question, fused, |id| {
                        snapshot.chunk(id).map(|c| c.text.as_str())
                    })
                    .await;
                merged.extend(tail.into_iter().map(|c| (c, JudgeOutcome::Unscored)));
                merged
            }
        };
        ranked.truncate(top_k);

        ranked
            .into_iter()
            .filter_map(|(candidate, outcome)| {
                let chunk = snapshot.chunk(&candidate.chunk_id)?;
                Some(RetrievedPassage {
                    chunk_id: candidate.chunk_id,
                    doc_id: chunk.doc_id.clone(),
                    text: chunk.text.clone(),
                    score: outcome.score().unwrap_or(candidate.fused_score),
                    source_path: chunk.source_path.clone(),
                    source_type: chunk.source_type,
                    page: chunk.page,
                    heading_path: chunk.heading_path.clone(),
                    semantic_rank: candidate.semantic_rank,
                    keyword_rank: candidate.keyword_rank,
                    reranked: outcome.score().is_some(),
                })
            })
            .collect()
    }

    /// `None` when the semantic side cannot answer this query.
    async fn semantic_candidates(
        &self,
        snapshot: &CorpusSnapshot,
        question: &str,
    ) -> Option<Vec<RetrievalCandidate>> {
        let index = match snapshot.semantic() {
            Ok(index) => index,
            Err(e) => {
                debug!(error = %e, "skipping semantic retrieval");
                return None;
            }
        };
        let embedder = self.embedder.as_deref()?;

        let vector =
            match tokio::time::timeout(self.query_timeout, embed_query(embedder, question)).await {
                Ok(Ok(vector)) => vector,
                Ok(Err(e)) => {
                    warn!(error = %format!("{:#}", e), "query embedding failed");
                    return None;
                }
                Err(_) => {
                    warn!(
                        timeout_secs = self.query_timeout.as_secs(),
                        "query embedding timed out"
                    );
                    return None;
                }
            };

        match index.query(&vector, self.plan.semantic_k) {
            Ok(hits) => Some(hits),
            Err(e) => {
                warn!(error = %e, "semantic query failed");
                None
            }
        }
    }

    fn lexical_candidates(
        &self,
        snapshot: &CorpusSnapshot,
        question: &str,
    ) -> Option<Vec<RetrievalCandidate>> {
        let index = match snapshot.lexical() {
            Ok(index) => index,
            Err(e) => {
                debug!(error = %e, "skipping lexical retrieval");
                return None;
            }
        };
        match index.query(question, self.plan.keyword_k) {
            Ok(candidates) => Some(candidates),
            Err(e) => {
                warn!(error = %e, "lexical query failed");
                None
            }
        }
    }

    fn lexical_only(&self, snapshot: &CorpusSnapshot, question: &str) -> Vec<FusedCandidate> {
        self.lexical_candidates(snapshot, question)
            .map(|lexical| fuse(&[], &lexical, 0.0))
            .unwrap_or_default()
    }
}

/// Read chunk store, manifest and vectors into a fresh snapshot.
///
/// Fails only on a dimension mismatch between the recorded index and the
/// configured model, or on unreadable files. A semantic index built by a
/// different model, or one that no longer covers the store, is left out.
pub fn load_snapshot(
    paths: &StorePaths,
    embedder: Option<&dyn EmbeddingProvider>,
) -> Result<CorpusSnapshot> {
    let Some(manifest) = storage::load_manifest(paths)? else {
        return Ok(CorpusSnapshot::empty());
    };
    let store = storage::load_chunk_store(paths)?;
    if let Err(e) = manifest.validate(&store) {
        warn!(error = %e, "manifest does not match chunk store; run `gw ingest`");
    }

    let semantic = match (embedder, &manifest.semantic_index) {
        (Some(embedder), Some(record)) => {
            manifest.check_dimension(embedder.dims())?;
            if record.model_identifier == embedder.model_name() {
                let cache = storage::load_vectors(paths)?;
                let vectors = store
                    .chunks()
                    .iter()
                    .filter_map(|c| {
                        cache
                            .get(&c.id, &c.hash)
                            .map(|v| (c.id.clone(), v.to_vec()))
                    })
                    .collect();
                Some(SemanticIndex::build(
                    record.embedding_dim,
                    record.model_identifier.clone(),
                    vectors,
                )?)
            } else {
                warn!(
                    indexed_with = %record.model_identifier,
                    configured = embedder.model_name(),
                    "semantic index was built with a different model; run `gw ingest`"
                );
                None
            }
        }
        _ => None,
    };

    Ok(CorpusSnapshot::build(&store, semantic))
}

fn one_line(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((pos, _)) => format!("{}...", &flat[..pos]),
        None => flat,
    }
}

/// `gw search`: run one query and print the passages.
pub async fn run_search(
    config: &Config,
    question: &str,
    mode: Option<RetrievalMode>,
    top_k: Option<usize>,
    json: bool,
) -> Result<()> {
    let mode = mode.unwrap_or(config.retrieval.mode);
    let retriever = Retriever::open(config, mode)?;
    let passages = retriever.retrieve(question, top_k).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&passages)?);
        return Ok(());
    }

    if passages.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, p) in passages.iter().enumerate() {
        let location = match p.page {
            Some(page) => format!("{} (page {})", p.source_path, page),
            None => p.source_path.clone(),
        };
        println!("{}. [{:.2}] {}", i + 1, p.score, location);
        if !p.heading_path.is_empty() {
            println!("    section: {}", p.heading_path.join(" > "));
        }
        let ranks = [
            p.semantic_rank.map(|r| format!("semantic #{}", r)),
            p.keyword_rank.map(|r| format!("keyword #{}", r)),
            p.reranked.then(|| "reranked".to_string()),
        ];
        let ranks: Vec<String> = ranks.into_iter().flatten().collect();
        if !ranks.is_empty() {
            println!("    via: {}", ranks.join(", "));
        }
        println!("    excerpt: \"{}\"", one_line(&p.text, 240));
        println!("    id: {}", p.chunk_id);
        println!();
    }

    Ok(())
}
