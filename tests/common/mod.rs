//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::bail;
use async_trait::async_trait;
use groundwork::config::Config;
use groundwork_core::embedding::EmbeddingProvider;
use groundwork_core::lexical::tokenize;
use tempfile::TempDir;

pub const DIMS: usize = 16;

/// Deterministic bag-of-words embedder: every token adds 1.0 to the
/// dimension picked by its byte sum.
pub struct HashEmbedder {
    name: String,
    dims: usize,
    fail: bool,
    texts_embedded: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self::with_dims(DIMS)
    }

    pub fn with_dims(dims: usize) -> Self {
        Self {
            name: "hash-bow".to_string(),
            dims,
            fail: false,
            texts_embedded: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn texts_embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }
}

pub fn bag_of_words(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    for token in tokenize(text) {
        let bucket = token.bytes().map(|b| b as usize).sum::<usize>() % dims;
        v[bucket] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if self.fail {
            bail!("embedding service unavailable");
        }
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| bag_of_words(t, self.dims)).collect())
    }
}

pub struct TestEnv {
    pub tmp: TempDir,
    pub root: PathBuf,
    pub store: PathBuf,
}

impl TestEnv {
    /// Three small documents, three sentences each.
    pub fn new() -> Self {
        let env = Self::empty();
        env.write(
            "alpha.md",
            "# Rust\n\nRust is a systems language. It has ownership rules. Borrowing is checked at compile time.\n",
        );
        env.write(
            "beta.txt",
            "Tokio is an async runtime. It schedules tasks. Timers are built in.\n",
        );
        env.write(
            "notes/gamma.md",
            "# Cooking\n\nPasta needs salted water. Boil it for ten minutes. Drain and serve.\n",
        );
        env
    }

    pub fn empty() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("files");
        let store = tmp.path().join("data");
        fs::create_dir_all(&root).unwrap();
        Self { tmp, root, store }
    }

    pub fn write(&self, rel: &str, content: &str) {
        self.write_bytes(rel, content.as_bytes());
    }

    pub fn write_bytes(&self, rel: &str, content: &[u8]) {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.root.join(rel)).unwrap();
    }

    /// Window of two sentences, one shared: three sentences give two chunks.
    pub fn config_toml(&self, extra: &str) -> String {
        format!(
            r#"
[store]
dir = "{store}"

[sources]
root = "{root}"

[splitter]
sent_window_size = 2
sent_window_overlap = 1

{extra}
"#,
            store = toml_path(&self.store),
            root = toml_path(&self.root),
            extra = extra,
        )
    }

    pub fn config(&self) -> Config {
        Config::from_toml_str(&self.config_toml("")).unwrap()
    }

    pub fn read_store(&self, name: &str) -> String {
        fs::read_to_string(self.store.join(name)).unwrap()
    }
}

/// Forward slashes keep Windows paths valid inside TOML basic strings.
pub fn toml_path(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}
