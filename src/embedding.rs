//! Embedding providers backed by external HTTP services.
//!
//! - **[`OpenAIProvider`]**: `POST https://api.openai.com/v1/embeddings`,
//!   key from `OPENAI_API_KEY`.
//! - **[`OllamaProvider`]**: `POST {url}/api/embed` on a local Ollama.
//!
//! Both implement [`EmbeddingProvider`] from the core crate. Use
//! [`create_provider`] to pick one from config; `provider = "disabled"`
//! yields `None` and no semantic index is built.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use groundwork_core::embedding::{check_dims, EmbeddingProvider};

use crate::config::EmbeddingConfig;
use crate::http;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Instantiate the configured provider, or `None` when embeddings are disabled.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Arc::new(OpenAIProvider::new(config)?))),
        "ollama" => Ok(Some(Arc::new(OllamaProvider::new(config)?))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn model_and_dims(config: &EmbeddingConfig) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model required for provider '{}'", config.provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow!("embedding.dims required for provider '{}'", config.provider))?;
    Ok((model, dims))
}

pub struct OpenAIProvider {
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config)?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        Ok(Self {
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
            client: http::client(Duration::from_secs(config.timeout_secs))?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = http::post_json_with_retry("OpenAI", self.max_retries, || {
            self.client
                .post(OPENAI_EMBEDDINGS_URL)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(pos, |i| i as usize);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, json_to_vector(embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config)?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            client: http::client(Duration::from_secs(config.timeout_secs))?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let endpoint = format!("{}/api/embed", self.url);
        let json = http::post_json_with_retry("Ollama", self.max_retries, || {
            self.client.post(&endpoint).json(&body)
        })
        .await
        .with_context(|| format!("is Ollama running at {}?", self.url))?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(json_to_vector)
        .collect()
}

fn json_to_vector(value: &serde_json::Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| anyhow!("embedding is not an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("embedding contains a non-numeric value"))
        })
        .collect()
}

/// Embed `texts` in batches of `batch_size`, checking count and dimension.
///
/// A vector whose length differs from `provider.dims()` is an error; it is
/// never padded or truncated.
pub async fn embed_in_batches(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = provider.embed(batch).await?;
        if vectors.len() != batch.len() {
            bail!(
                "embedding provider returned {} vectors for {} inputs",
                vectors.len(),
                batch.len()
            );
        }
        for v in &vectors {
            check_dims(v, provider.dims())?;
        }
        out.extend(vectors);
    }
    Ok(out)
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let mut vectors = provider.embed(&[text.to_string()]).await?;
    let vector = vectors
        .pop()
        .ok_or_else(|| anyhow!("Empty embedding response"))?;
    check_dims(&vector, provider.dims())?;
    Ok(vector)
}
