//! Relevance judge contract and rerank merging.
//!
//! The judge is an external, best-effort collaborator. Each candidate ends
//! up either [`JudgeOutcome::Scored`] or [`JudgeOutcome::Unscored`]; the
//! merge puts scored candidates first by judge score (stable for ties) and
//! leaves unscored ones after them in their fused order. If nothing was
//! scored, the output is exactly the fused order.
//!
//! Timeouts, batching and concurrency are the caller's job; see the
//! `groundwork::rerank` module.

use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::FusedCandidate;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JudgeOutcome {
    Scored(f64),
    Unscored,
}

impl JudgeOutcome {
    pub fn score(&self) -> Option<f64> {
        match self {
            JudgeOutcome::Scored(s) => Some(*s),
            JudgeOutcome::Unscored => None,
        }
    }
}

/// What the judge sees for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeCandidate {
    pub id: String,
    pub preview: String,
}

/// External relevance judge, called once per batch.
#[async_trait]
pub trait RelevanceJudge: Send + Sync {
    fn name(&self) -> &str;

    /// Score each candidate's relevance to `question`.
    ///
    /// Returns scores keyed by candidate ID. IDs absent from the map are
    /// treated as unscored.
    async fn score_batch(
        &self,
        question: &str,
        candidates: &[JudgeCandidate],
    ) -> Result<HashMap<String, f64>>;
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((pos, _)) => text[..pos].to_string(),
        None => text.to_string(),
    }
}

/// Bring raw judge scores into `[0, 1]`.
///
/// A batch whose maximum lies in `(1, 10]` is read as a 0–10 scale and
/// divided by ten. Every score is then clamped; non-finite scores are dropped.
pub fn normalize_judge_scores(raw: HashMap<String, f64>) -> HashMap<String, f64> {
    let finite: HashMap<String, f64> = raw.into_iter().filter(|(_, v)| v.is_finite()).collect();
    let max = finite.values().copied().fold(f64::NEG_INFINITY, f64::max);
    let scale = if max > 1.0 && max <= 10.0 { 10.0 } else { 1.0 };
    finite
        .into_iter()
        .map(|(id, v)| (id, (v / scale).clamp(0.0, 1.0)))
        .collect()
}

/// Reorder a fused prefix by judge outcome.
///
/// `prefix` must be in fused order. Scored candidates come first sorted by
/// judge score descending (stable, so ties keep fused order); unscored
/// candidates follow in fused order.
pub fn merge_reranked(
    prefix: Vec<FusedCandidate>,
    outcomes: &HashMap<String, JudgeOutcome>,
) -> Vec<(FusedCandidate, JudgeOutcome)> {
    let (mut scored, unscored): (Vec<_>, Vec<_>) = prefix
        .into_iter()
        .map(|c| {
            let outcome = outcomes
                .get(&c.chunk_id)
                .copied()
                .unwrap_or(JudgeOutcome::Unscored);
            (c, outcome)
        })
        .partition(|(_, o)| matches!(o, JudgeOutcome::Scored(_)));

    scored.sort_by(|a, b| {
        let sa = a.1.score().unwrap_or(0.0);
        let sb = b.1.score().unwrap_or(0.0);
        sb.partial_cmp(&sa).unwrap_or(Ordering::Equal)
    });

    scored.extend(unscored);
    scored
}
