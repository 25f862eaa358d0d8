//! Query pipeline over an ingested store.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{HashEmbedder, TestEnv};
use groundwork::config::{Config, RetrievalMode};
use groundwork::ingest::{IngestOptions, Ingestor};
use groundwork::retrieve::{FusionPlan, Retriever};
use groundwork_core::embedding::EmbeddingProvider;
use groundwork_core::rerank::{JudgeCandidate, RelevanceJudge};
use groundwork_core::GroundworkError;

const QUESTION: &str = "How does Tokio schedule tasks?";

/// Prefers anything about pasta; optionally stalls first.
struct PastaJudge {
    delay: Duration,
}

#[async_trait]
impl RelevanceJudge for PastaJudge {
    fn name(&self) -> &str {
        "pasta"
    }

    async fn score_batch(
        &self,
        _question: &str,
        candidates: &[JudgeCandidate],
    ) -> anyhow::Result<HashMap<String, f64>> {
        tokio::time::sleep(self.delay).await;
        Ok(candidates
            .iter()
            .map(|c| {
                let score = if c.preview.contains("Pasta") { 0.9 } else { 0.1 };
                (c.id.clone(), score)
            })
            .collect())
    }
}

fn hash_embedder() -> Option<Arc<dyn EmbeddingProvider>> {
    Some(Arc::new(HashEmbedder::new()))
}

async fn ingested(with_vectors: bool) -> TestEnv {
    let env = TestEnv::new();
    let embedder = if with_vectors { hash_embedder() } else { None };
    Ingestor::new(env.config(), embedder)
        .run(IngestOptions::default())
        .await
        .unwrap();
    env
}

fn retriever(config: &Config, mode: RetrievalMode, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Retriever {
    Retriever::with_providers(config, mode, embedder, None).unwrap()
}

#[tokio::test]
async fn test_hybrid_uses_both_lists() {
    let env = ingested(true).await;
    let r = retriever(&env.config(), RetrievalMode::Hybrid, hash_embedder());
    assert_eq!(r.plan().fusion, FusionPlan::Hybrid { alpha: 0.6 });

    let passages = r.retrieve(QUESTION, None).await;
    assert_eq!(passages.len(), 3);
    assert_eq!(passages[0].source_path, "beta.txt");
    assert!(passages
        .iter()
        .any(|p| p.semantic_rank.is_some() && p.keyword_rank.is_some()));
    assert!(passages.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(passages.iter().all(|p| !p.reranked));
}

#[tokio::test]
async fn test_semantic_mode_ignores_keywords() {
    let env = ingested(true).await;
    let r = retriever(&env.config(), RetrievalMode::Semantic, hash_embedder());
    let passages = r.retrieve(QUESTION, Some(4)).await;
    assert_eq!(passages.len(), 4);
    assert!(passages
        .iter()
        .all(|p| p.semantic_rank.is_some() && p.keyword_rank.is_none()));
}

#[tokio::test]
async fn test_no_embedder_narrows_to_lexical() {
    let env = ingested(false).await;
    let r = retriever(&env.config(), RetrievalMode::Semantic, None);
    let passages = r.retrieve(QUESTION, None).await;

    // Only the two beta.txt windows mention tasks or Tokio.
    assert_eq!(passages.len(), 2);
    assert!(passages.iter().all(|p| p.semantic_rank.is_none()));
    assert!(passages[0].chunk_id.ends_with("#0"));
    assert_eq!(passages[0].keyword_rank, Some(1));
    assert_eq!(passages[0].score, 1.0);
}

#[tokio::test]
async fn test_failing_query_embedding_narrows_to_lexical() {
    let env = ingested(true).await;
    let failing: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::failing());
    let r = retriever(&env.config(), RetrievalMode::Hybrid, Some(failing));
    assert!(r.snapshot().semantic().is_ok());

    let passages = r.retrieve(QUESTION, None).await;
    assert!(!passages.is_empty());
    assert!(passages.iter().all(|p| p.semantic_rank.is_none()));
    assert!(passages.iter().all(|p| p.source_path == "beta.txt"));
}

#[tokio::test]
async fn test_query_model_with_other_dimension_is_refused() {
    let env = ingested(true).await;
    let wider: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::with_dims(32));
    let Err(err) = Retriever::with_providers(&env.config(), RetrievalMode::Hybrid, Some(wider), None)
    else {
        panic!("a 32-dim query model must not load a 16-dim index");
    };
    assert!(matches!(
        err.downcast_ref::<GroundworkError>(),
        Some(GroundworkError::DimensionMismatch {
            stored: 16,
            configured: 32
        })
    ));
}

#[tokio::test]
async fn test_ungroundable_questions_return_nothing() {
    let env = ingested(false).await;
    let r = retriever(&env.config(), RetrievalMode::Hybrid, None);
    assert!(r.retrieve("", None).await.is_empty());
    assert!(r.retrieve("   ", None).await.is_empty());
    assert!(r.retrieve(QUESTION, Some(0)).await.is_empty());
    assert!(r.retrieve("zebra xylophone", None).await.is_empty());
}

#[tokio::test]
async fn test_empty_store_returns_nothing() {
    let env = TestEnv::new();
    let r = retriever(&env.config(), RetrievalMode::Hybrid, hash_embedder());
    assert!(r.snapshot().is_empty());
    assert!(r.retrieve(QUESTION, None).await.is_empty());
}

#[tokio::test]
async fn test_top_k_bounds_results() {
    let env = ingested(true).await;
    let r = retriever(&env.config(), RetrievalMode::Hybrid, hash_embedder());
    assert_eq!(r.retrieve(QUESTION, Some(1)).await.len(), 1);
    // Every chunk is a semantic candidate, so the union covers the corpus.
    assert_eq!(r.retrieve(QUESTION, Some(50)).await.len(), 6);
}

#[tokio::test]
async fn test_rerank_reorders_by_judge() {
    let env = ingested(true).await;
    let mut config = env.config();
    config.rerank.enabled = true;
    let judge: Arc<dyn RelevanceJudge> = Arc::new(PastaJudge {
        delay: Duration::ZERO,
    });
    let r = Retriever::with_providers(&config, RetrievalMode::Hybrid, hash_embedder(), Some(judge))
        .unwrap();

    let passages = r.retrieve(QUESTION, None).await;
    assert_eq!(passages[0].source_path, "notes/gamma.md");
    assert!(passages[0].text.contains("Pasta"));
    assert!(passages[0].reranked);
    assert_eq!(passages[0].score, 0.9);
    assert_eq!(passages[0].heading_path, vec!["Cooking".to_string()]);
}

#[tokio::test]
async fn test_rerank_timeout_keeps_fused_order() {
    let env = ingested(true).await;
    let plain = retriever(&env.config(), RetrievalMode::Hybrid, hash_embedder());
    let expected: Vec<String> = plain
        .retrieve(QUESTION, None)
        .await
        .into_iter()
        .map(|p| p.chunk_id)
        .collect();

    let mut config = env.config();
    config.rerank.enabled = true;
    config.rerank.timeout_ms = 50;
    config.rerank.total_timeout_ms = 200;
    let judge: Arc<dyn RelevanceJudge> = Arc::new(PastaJudge {
        delay: Duration::from_secs(5),
    });
    let r = Retriever::with_providers(&config, RetrievalMode::Hybrid, hash_embedder(), Some(judge))
        .unwrap();

    let started = std::time::Instant::now();
    let passages = r.retrieve(QUESTION, None).await;
    assert!(started.elapsed() < Duration::from_secs(3));
    let got: Vec<String> = passages.iter().map(|p| p.chunk_id.clone()).collect();
    assert_eq!(got, expected);
    assert!(passages.iter().all(|p| !p.reranked));
}

#[tokio::test]
async fn test_reload_publishes_new_snapshot() {
    let env = ingested(false).await;
    let config = env.config();
    let r = retriever(&config, RetrievalMode::Hybrid, None);
    let before = r.snapshot();

    env.write("delta.txt", "Zebras graze on the savanna. They run fast.");
    Ingestor::new(config, None)
        .run(IngestOptions::default())
        .await
        .unwrap();
    assert!(r.retrieve("zebras", None).await.is_empty());

    r.reload().unwrap();
    let passages = r.retrieve("zebras", None).await;
    assert_eq!(passages.len(), 1);
    assert_eq!(passages[0].source_path, "delta.txt");
    assert_eq!(before.len(), 6);
    assert_eq!(r.snapshot().len(), 7);
}
