//! LLM relevance judge over an OpenAI-compatible chat completions endpoint.
//!
//! The model is asked for a bare JSON array of `{id, score}` objects. Scores
//! are normalized with
//! [`normalize_judge_scores`](groundwork_core::rerank::normalize_judge_scores)
//! and IDs the judge was not asked about are dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use groundwork_core::rerank::{normalize_judge_scores, JudgeCandidate, RelevanceJudge};
use groundwork_core::GroundworkError;
use serde::Serialize;

use crate::config::RerankConfig;
use crate::http;

const SYSTEM_PROMPT: &str = "You are a ranking assistant. Score each candidate's relevance \
to the user question from 0.0 to 1.0. Return ONLY a JSON array of objects with fields \
{id, score}. No prose, no extra keys.";

/// Build the configured judge, or `None` when reranking is off.
pub fn create_judge(config: &RerankConfig) -> Result<Option<Arc<dyn RelevanceJudge>>> {
    if !config.enabled || config.judge.provider == "disabled" {
        return Ok(None);
    }
    Ok(Some(Arc::new(LlmJudge::new(config)?)))
}

pub struct LlmJudge {
    model: String,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl LlmJudge {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set (required by rerank.judge)")?;
        Ok(Self {
            model: config.judge.model.clone(),
            url: config.judge.url.clone(),
            api_key,
            client: http::client(Duration::from_millis(config.timeout_ms))?,
        })
    }
}

#[derive(Serialize)]
struct PromptCandidate<'a> {
    id: &'a str,
    preview: &'a str,
}

fn user_message(question: &str, candidates: &[JudgeCandidate]) -> Result<String> {
    let payload: Vec<PromptCandidate<'_>> = candidates
        .iter()
        .map(|c| PromptCandidate {
            id: &c.id,
            preview: &c.preview,
        })
        .collect();
    Ok(format!(
        "Question:\n{}\n\nCandidates (JSON array):\n{}",
        question,
        serde_json::to_string(&payload)?
    ))
}

#[async_trait]
impl RelevanceJudge for LlmJudge {
    fn name(&self) -> &str {
        &self.model
    }

    async fn score_batch(
        &self,
        question: &str,
        candidates: &[JudgeCandidate],
    ) -> Result<HashMap<String, f64>> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_message(question, candidates)?},
            ],
        });

        // Not retried; the reranker's batch timeout bounds the call.
        let json = http::post_json_with_retry("Judge", 0, || {
            self.client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow!("judge response has no message content"))?;

        let asked: HashSet<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        let raw = parse_judge_output(content)?
            .into_iter()
            .filter(|(id, _)| asked.contains(id.as_str()))
            .collect();
        Ok(normalize_judge_scores(raw))
    }
}

/// Pull `{id, score}` pairs out of the model's reply.
///
/// Tolerates code fences and surrounding prose by reading the outermost
/// `[...]`. Items without a string `id` or a numeric `score` are skipped.
pub fn parse_judge_output(content: &str) -> Result<HashMap<String, f64>, GroundworkError> {
    let start = content.find('[');
    let end = content.rfind(']');
    let slice = match (start, end) {
        (Some(s), Some(e)) if s < e => &content[s..=e],
        _ => {
            return Err(GroundworkError::RerankJudge(
                "judge output contains no JSON array".to_string(),
            ))
        }
    };

    let items: Vec<serde_json::Value> = serde_json::from_str(slice)
        .map_err(|e| GroundworkError::RerankJudge(format!("judge output is not JSON: {}", e)))?;

    let mut scores = HashMap::new();
    for item in items {
        let id = match item.get("id") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => continue,
        };
        let score = match item.get("score") {
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        if let Some(score) = score {
            scores.insert(id, score);
        }
    }
    Ok(scores)
}
