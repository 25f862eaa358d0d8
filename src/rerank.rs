//! Time-bounded, batched reranking.
//!
//! The fused prefix is split into batches of `batch_size`, each sent to the
//! [`RelevanceJudge`] with a per-batch timeout. At most `max_concurrency`
//! batches are in flight, and the whole step stops at `total_timeout`:
//! batches still running then are aborted and their candidates stay
//! [`JudgeOutcome::Unscored`]. Nothing here fails the query.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use groundwork_core::models::FusedCandidate;
use groundwork_core::rerank::{
    merge_reranked, normalize_judge_scores, truncate_preview, JudgeCandidate, JudgeOutcome,
    RelevanceJudge,
};
use groundwork_core::GroundworkError;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RerankConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct RerankSettings {
    pub top_n: usize,
    pub batch_size: usize,
    pub preview_chars: usize,
    pub batch_timeout: Duration,
    pub total_timeout: Duration,
    pub max_concurrency: usize,
}

impl From<&RerankConfig> for RerankSettings {
    fn from(config: &RerankConfig) -> Self {
        Self {
            top_n: config.top_n,
            batch_size: config.batch_size,
            preview_chars: config.preview_chars,
            batch_timeout: Duration::from_millis(config.timeout_ms),
            total_timeout: Duration::from_millis(config.total_timeout_ms),
            max_concurrency: config.max_concurrency,
        }
    }
}

pub struct Reranker {
    judge: Arc<dyn RelevanceJudge>,
    settings: RerankSettings,
}

type BatchResult = (Vec<String>, Result<HashMap<String, f64>, GroundworkError>);

impl Reranker {
    pub fn new(judge: Arc<dyn RelevanceJudge>, settings: RerankSettings) -> Self {
        Self { judge, settings }
    }

    pub fn settings(&self) -> &RerankSettings {
        &self.settings
    }

    /// Reorder `prefix` (in fused order) by judge score.
    ///
    /// `text_of` resolves a chunk ID to the text the judge should see.
    pub async fn rerank<'a>(
        &self,
        question: &str,
        prefix: Vec<FusedCandidate>,
        text_of: impl Fn(&str) -> Option<&'a str>,
    ) -> Vec<(FusedCandidate, JudgeOutcome)> {
        let candidates: Vec<JudgeCandidate> = prefix
            .iter()
            .map(|c| JudgeCandidate {
                id: c.chunk_id.clone(),
                preview: truncate_preview(
                    text_of(&c.chunk_id).unwrap_or_default(),
                    self.settings.preview_chars,
                ),
            })
            .collect();

        let outcomes = self.score(question, candidates).await;
        merge_reranked(prefix, &outcomes)
    }

    /// Judge every candidate within the configured budgets.
    ///
    /// The returned map has an entry for every candidate.
    pub async fn score(
        &self,
        question: &str,
        candidates: Vec<JudgeCandidate>,
    ) -> HashMap<String, JudgeOutcome> {
        let mut outcomes: HashMap<String, JudgeOutcome> = candidates
            .iter()
            .map(|c| (c.id.clone(), JudgeOutcome::Unscored))
            .collect();
        if candidates.is_empty() {
            return outcomes;
        }

        let deadline = Instant::now() + self.settings.total_timeout;
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let question: Arc<str> = Arc::from(question);
        let batch_timeout = self.settings.batch_timeout;

        let mut tasks: JoinSet<BatchResult> = JoinSet::new();
        for batch in candidates.chunks(self.settings.batch_size.max(1)) {
            let batch = batch.to_vec();
            let judge = Arc::clone(&self.judge);
            let semaphore = Arc::clone(&semaphore);
            let question = Arc::clone(&question);

            tasks.spawn(async move {
                let ids: Vec<String> = batch.iter().map(|c| c.id.clone()).collect();
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (ids, Err(GroundworkError::RerankJudge("closed".to_string())))
                    }
                };
                let result = match tokio::time::timeout(
                    batch_timeout,
                    judge.score_batch(&question, &batch),
                )
                .await
                {
                    Ok(Ok(scores)) => Ok(scores),
                    Ok(Err(e)) => Err(GroundworkError::RerankJudge(format!("{:#}", e))),
                    Err(_) => Err(GroundworkError::RerankTimeout(
                        batch_timeout.as_millis() as u64,
                    )),
                };
                (ids, result)
            });
        }

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((ids, Ok(scores))))) => {
                    // Third-party judges may answer outside [0, 1].
                    let scores = normalize_judge_scores(scores);
                    debug!(
                        judge = self.judge.name(),
                        batch = ids.len(),
                        scored = scores.len(),
                        "rerank batch scored"
                    );
                    for id in ids {
                        if let Some(score) = scores.get(&id) {
                            outcomes.insert(id, JudgeOutcome::Scored(*score));
                        }
                    }
                }
                Ok(Some(Ok((ids, Err(e))))) => {
                    warn!(batch = ids.len(), error = %e, "rerank batch failed; keeping fused order");
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "rerank task failed; keeping fused order");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        pending = tasks.len(),
                        budget_ms = self.settings.total_timeout.as_millis() as u64,
                        "rerank budget exhausted; unscored candidates keep fused order"
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        outcomes
    }
}
