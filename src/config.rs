//! Configuration parsing and validation.
//!
//! Groundwork is configured via a TOML file (default `./config/gw.toml`).
//! Every section except `[sources]` has defaults, so a minimal config only
//! names the directory to ingest:
//!
//! ```toml
//! [sources]
//! root = "./docs"
//! ```
//!
//! Invalid chunking parameters, out-of-range fusion weights and an enabled
//! embedding provider without a model or dimension are configuration errors
//! and stop the binary before any work is done.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use groundwork_core::chunk::ChunkingConfig;
use groundwork_core::GroundworkError;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    pub sources: SourcesConfig,
    #[serde(default)]
    pub splitter: SplitterConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Holds `chunks.jsonl`, `manifest.json`, `vectors.jsonl` and the run lock.
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
        }
    }
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    ["**/*.md", "**/*.txt", "**/*.pdf", "**/*.docx"]
        .iter()
        .map(|g| g.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SplitterConfig {
    #[serde(default = "default_sent_window_size")]
    pub sent_window_size: usize,
    #[serde(default = "default_sent_window_overlap")]
    pub sent_window_overlap: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            sent_window_size: default_sent_window_size(),
            sent_window_overlap: default_sent_window_overlap(),
        }
    }
}

fn default_sent_window_size() -> usize {
    5
}
fn default_sent_window_overlap() -> usize {
    1
}

impl SplitterConfig {
    pub fn chunking(&self) -> Result<ChunkingConfig, GroundworkError> {
        ChunkingConfig::new(self.sent_window_size, self.sent_window_overlap)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `openai` or `ollama`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for Ollama.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Which retrieval lists feed fusion.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    #[default]
    Semantic,
    Hybrid,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub mode: RetrievalMode,
    #[serde(default = "default_k")]
    pub semantic_k: usize,
    #[serde(default = "default_k")]
    pub keyword_k: usize,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default)]
    pub fusion: FusionConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::default(),
            semantic_k: default_k(),
            keyword_k: default_k(),
            default_top_k: default_top_k(),
            fusion: FusionConfig::default(),
        }
    }
}

fn default_k() -> usize {
    6
}
fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct FusionConfig {
    /// Weight on the semantic side, in `[0, 1]`.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
        }
    }
}

fn default_alpha() -> f64 {
    0.6
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Budget for a single judge batch.
    #[serde(default = "default_rerank_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_rerank_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Budget for the whole rerank step across all batches.
    #[serde(default = "default_total_timeout_ms")]
    pub total_timeout_ms: u64,
    #[serde(default)]
    pub judge: JudgeConfig,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            top_n: default_top_n(),
            timeout_ms: default_rerank_timeout_ms(),
            batch_size: default_rerank_batch_size(),
            preview_chars: default_preview_chars(),
            max_concurrency: default_max_concurrency(),
            total_timeout_ms: default_total_timeout_ms(),
            judge: JudgeConfig::default(),
        }
    }
}

fn default_top_n() -> usize {
    10
}
fn default_rerank_timeout_ms() -> u64 {
    3500
}
fn default_rerank_batch_size() -> usize {
    8
}
fn default_preview_chars() -> usize {
    600
}
fn default_max_concurrency() -> usize {
    2
}
fn default_total_timeout_ms() -> u64 {
    7000
}

#[derive(Debug, Deserialize, Clone)]
pub struct JudgeConfig {
    /// `openai` or `disabled`.
    #[serde(default = "default_judge_provider")]
    pub provider: String,
    #[serde(default = "default_judge_model")]
    pub model: String,
    /// OpenAI-compatible chat completions endpoint.
    #[serde(default = "default_judge_url")]
    pub url: String,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            provider: default_judge_provider(),
            model: default_judge_model(),
            url: default_judge_url(),
        }
    }
}

fn default_judge_provider() -> String {
    "openai".to_string()
}
fn default_judge_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_judge_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

impl Config {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), GroundworkError> {
        let bad = |msg: String| Err(GroundworkError::Config(msg));

        self.splitter.chunking()?;

        let r = &self.retrieval;
        if !(0.0..=1.0).contains(&r.fusion.alpha) {
            return bad(format!(
                "retrieval.fusion.alpha must be in [0.0, 1.0], got {}",
                r.fusion.alpha
            ));
        }
        for (name, value) in [
            ("retrieval.semantic_k", r.semantic_k),
            ("retrieval.keyword_k", r.keyword_k),
            ("retrieval.default_top_k", r.default_top_k),
        ] {
            if value == 0 {
                return bad(format!("{} must be >= 1", name));
            }
        }

        let rr = &self.rerank;
        for (name, value) in [
            ("rerank.top_n", rr.top_n as u64),
            ("rerank.batch_size", rr.batch_size as u64),
            ("rerank.preview_chars", rr.preview_chars as u64),
            ("rerank.timeout_ms", rr.timeout_ms),
            ("rerank.max_concurrency", rr.max_concurrency as u64),
            ("rerank.total_timeout_ms", rr.total_timeout_ms),
        ] {
            if value == 0 {
                return bad(format!("{} must be >= 1", name));
            }
        }
        match rr.judge.provider.as_str() {
            "openai" | "disabled" => {}
            other => {
                return bad(format!(
                    "Unknown rerank judge provider: '{}'. Must be openai or disabled.",
                    other
                ))
            }
        }

        let e = &self.embedding;
        match e.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => {
                return bad(format!(
                    "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
                    other
                ))
            }
        }
        if e.is_enabled() {
            if e.dims.unwrap_or(0) == 0 {
                return bad(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    e.provider
                ));
            }
            if e.model.as_deref().map_or(true, str::is_empty) {
                return bad(format!(
                    "embedding.model must be specified when provider is '{}'",
                    e.provider
                ));
            }
            if e.batch_size == 0 {
                return bad("embedding.batch_size must be >= 1".to_string());
            }
        }

        Ok(())
    }

    pub fn chunking(&self) -> Result<ChunkingConfig, GroundworkError> {
        self.splitter.chunking()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml_str(&content)
        .with_context(|| format!("Invalid config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "[sources]\nroot = \"./docs\"\n";

    #[test]
    fn test_minimal_config_takes_defaults() {
        let cfg = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.store.dir, PathBuf::from("./data"));
        assert_eq!(cfg.splitter.sent_window_size, 5);
        assert_eq!(cfg.splitter.sent_window_overlap, 1);
        assert_eq!(cfg.retrieval.mode, RetrievalMode::Semantic);
        assert_eq!(cfg.retrieval.semantic_k, 6);
        assert_eq!(cfg.retrieval.keyword_k, 6);
        assert_eq!(cfg.retrieval.default_top_k, 3);
        assert!((cfg.retrieval.fusion.alpha - 0.6).abs() < 1e-12);
        assert!(!cfg.rerank.enabled);
        assert_eq!(cfg.rerank.top_n, 10);
        assert_eq!(cfg.rerank.timeout_ms, 3500);
        assert_eq!(cfg.rerank.batch_size, 8);
        assert_eq!(cfg.rerank.preview_chars, 600);
        assert_eq!(cfg.rerank.judge.model, "gpt-4o-mini");
        assert!(!cfg.embedding.is_enabled());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_window() {
        let toml = format!("{}[splitter]\nsent_window_size = 3\nsent_window_overlap = 3\n", MINIMAL);
        let err = Config::from_toml_str(&toml).unwrap_err();
        assert!(format!("{:#}", err).contains("sent_window_overlap"));
    }

    #[test]
    fn test_alpha_out_of_range_rejected() {
        let toml = format!("{}[retrieval.fusion]\nalpha = 1.5\n", MINIMAL);
        assert!(Config::from_toml_str(&toml).is_err());
    }

    #[test]
    fn test_enabled_embedding_requires_dims() {
        let toml = format!(
            "{}[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\n",
            MINIMAL
        );
        let err = Config::from_toml_str(&toml).unwrap_err();
        assert!(format!("{:#}", err).contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let toml = format!("{}[embedding]\nprovider = \"magic\"\n", MINIMAL);
        assert!(Config::from_toml_str(&toml).is_err());
    }

    #[test]
    fn test_hybrid_mode_parses() {
        let toml = format!("{}[retrieval]\nmode = \"hybrid\"\nkeyword_k = 4\n", MINIMAL);
        let cfg = Config::from_toml_str(&toml).unwrap();
        assert_eq!(cfg.retrieval.mode, RetrievalMode::Hybrid);
        assert_eq!(cfg.retrieval.keyword_k, 4);
    }

    #[test]
    fn test_validation_error_is_typed_config_error() {
        let mut cfg = Config::from_toml_str(MINIMAL).unwrap();
        cfg.rerank.top_n = 0;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, GroundworkError::Config(_)));
        assert!(err.is_fatal());
    }
}
