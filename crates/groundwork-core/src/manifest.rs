//! Manifest and change detector.
//!
//! The manifest is the change-tracking ledger for ingestion: one entry per
//! source file (hash, chunk count, timestamp), the chunking config and its
//! fingerprint, and the provenance of the last semantic index build.
//!
//! [`detect_changes`] classifies every scanned file against the manifest:
//!
//! | Kind | Condition |
//! |------|-----------|
//! | `New` | path absent from the manifest |
//! | `Changed` | content hash differs, or the config fingerprint differs |
//! | `Unchanged` | hash equal and config fingerprint equal |
//! | `Deleted` | path in the manifest but absent from the scan |
//!
//! Invariant: the chunk ranges referenced by all entries equal the chunk
//! store contents exactly. [`Manifest::validate`] enforces it on load.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::chunk::ChunkingConfig;
use crate::error::{GroundworkError, Result};
use crate::store::ChunkStore;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub config: ManifestConfig,
    /// Keyed by source path; ordered so serialization is deterministic.
    pub files: BTreeMap<String, ManifestEntry>,
    #[serde(default)]
    pub semantic_index: Option<IndexBuildRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestConfig {
    pub sent_window_size: usize,
    pub sent_window_overlap: usize,
    pub config_fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub doc_id: String,
    pub content_hash: String,
    pub chunks_count: usize,
    pub updated_at: String,
}

/// Provenance of the vectors behind the semantic index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexBuildRecord {
    pub vectors_count: usize,
    pub embedding_dim: usize,
    pub model_identifier: String,
    pub built_at: String,
    pub config_fingerprint: String,
}

impl ManifestConfig {
    fn from_chunking(config: &ChunkingConfig) -> Self {
        Self {
            sent_window_size: config.window_size,
            sent_window_overlap: config.overlap,
            config_fingerprint: config.fingerprint(),
        }
    }
}

impl Manifest {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            config: ManifestConfig::from_chunking(config),
            files: BTreeMap::new(),
            semantic_index: None,
        }
    }

    pub fn fingerprint_matches(&self, config: &ChunkingConfig) -> bool {
        self.config.config_fingerprint == config.fingerprint()
    }

    pub fn set_chunking_config(&mut self, config: &ChunkingConfig) {
        self.config = ManifestConfig::from_chunking(config);
    }

    pub fn total_chunks(&self) -> usize {
        self.files.values().map(|e| e.chunks_count).sum()
    }

    /// Fail if the recorded index dimension differs from the configured model.
    pub fn check_dimension(&self, configured_dims: usize) -> Result<()> {
        match &self.semantic_index {
            Some(record) if record.embedding_dim != configured_dims => {
                Err(GroundworkError::DimensionMismatch {
                    stored: record.embedding_dim,
                    configured: configured_dims,
                })
            }
            _ => Ok(()),
        }
    }

    /// Check the chunk-range invariant against the store.
    ///
    /// Every entry must own exactly `0..chunks_count` under its `doc_id`,
    /// doc IDs must be unique, and the store must hold nothing else.
    pub fn validate(&self, store: &ChunkStore) -> Result<()> {
        self.check_schema()?;

        let mut doc_ids = HashSet::new();
        for (path, entry) in &self.files {
            if !doc_ids.insert(entry.doc_id.as_str()) {
                return Err(GroundworkError::ManifestInvalid(format!(
                    "doc_id {} is referenced by more than one file ({})",
                    entry.doc_id, path
                )));
            }
            if !store.has_contiguous_range(&entry.doc_id, entry.chunks_count) {
                return Err(GroundworkError::ManifestInvalid(format!(
                    "{}: expected chunks {}#0..{} in the chunk store",
                    path, entry.doc_id, entry.chunks_count
                )));
            }
        }

        let referenced = self.total_chunks();
        if referenced != store.len() {
            return Err(GroundworkError::ManifestInvalid(format!(
                "manifest references {} chunks but the store holds {}",
                referenced,
                store.len()
            )));
        }
        Ok(())
    }

    /// Restore the chunk-range invariant one document at a time.
    ///
    /// Entries whose range the store does not hold exactly, or that share a
    /// doc ID, are dropped along with their chunks; chunks no remaining
    /// entry owns are purged. Everything else is kept as is, so the next
    /// change detection re-chunks only the dropped paths.
    pub fn reconcile(&mut self, store: &mut ChunkStore) -> Result<Reconciliation> {
        self.check_schema()?;

        let mut owners: HashMap<String, usize> = HashMap::new();
        for entry in self.files.values() {
            *owners.entry(entry.doc_id.clone()).or_insert(0) += 1;
        }
        let dropped: Vec<String> = self
            .files
            .iter()
            .filter(|(_, e)| {
                owners.get(&e.doc_id).copied().unwrap_or(0) > 1
                    || !store.has_contiguous_range(&e.doc_id, e.chunks_count)
            })
            .map(|(path, _)| path.clone())
            .collect();
        for path in &dropped {
            if let Some(entry) = self.files.remove(path) {
                store.purge_document(&entry.doc_id);
            }
        }

        let owned: HashSet<&str> = self.files.values().map(|e| e.doc_id.as_str()).collect();
        let orphans: Vec<String> = store
            .counts_by_doc()
            .into_keys()
            .filter(|doc_id| !owned.contains(doc_id))
            .map(str::to_string)
            .collect();
        let orphaned_chunks = orphans.iter().map(|d| store.purge_document(d)).sum();

        Ok(Reconciliation {
            dropped,
            orphaned_chunks,
        })
    }

    fn check_schema(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(GroundworkError::ManifestInvalid(format!(
                "unsupported schema_version {} (expected {})",
                self.schema_version, SCHEMA_VERSION
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        Ok(text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// What [`Manifest::reconcile`] had to repair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Paths whose entries were dropped; they will classify as new.
    pub dropped: Vec<String>,
    /// Chunks removed because no entry owned them.
    pub orphaned_chunks: usize,
}

impl Reconciliation {
    pub fn is_clean(&self) -> bool {
        self.dropped.is_empty() && self.orphaned_chunks == 0
    }
}

/// Per-file classification for one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    New,
    Changed,
    Unchanged,
    Deleted,
}

impl ChangeKind {
    /// Whether the file must be (re)loaded and chunked.
    pub fn needs_chunking(&self) -> bool {
        matches!(self, ChangeKind::New | ChangeKind::Changed)
    }
}

/// A source file observed by the current scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedFile {
    pub path: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeCounts {
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    /// Sorted by path.
    pub changes: Vec<FileChange>,
    /// True when the recorded config fingerprint differs from the active one.
    pub config_changed: bool,
}

impl ChangeSet {
    pub fn counts(&self) -> ChangeCounts {
        let mut counts = ChangeCounts::default();
        for change in &self.changes {
            match change.kind {
                ChangeKind::New => counts.new += 1,
                ChangeKind::Changed => counts.changed += 1,
                ChangeKind::Unchanged => counts.unchanged += 1,
                ChangeKind::Deleted => counts.deleted += 1,
            }
        }
        counts
    }

    pub fn kind_of(&self, path: &str) -> Option<ChangeKind> {
        self.changes
            .iter()
            .find(|c| c.path == path)
            .map(|c| c.kind)
    }

    /// True when nothing needs to be written.
    pub fn is_noop(&self) -> bool {
        self.changes.iter().all(|c| c.kind == ChangeKind::Unchanged)
    }
}

/// Classify every scanned file, plus every manifest entry missing from the scan.
pub fn detect_changes(
    manifest: &Manifest,
    scanned: &[ScannedFile],
    config: &ChunkingConfig,
) -> ChangeSet {
    let config_changed = !manifest.fingerprint_matches(config);
    let mut changes = Vec::with_capacity(scanned.len());
    let mut seen = HashSet::with_capacity(scanned.len());

    for file in scanned {
        seen.insert(file.path.as_str());
        let kind = match manifest.files.get(&file.path) {
            None => ChangeKind::New,
            Some(_) if config_changed => ChangeKind::Changed,
            Some(entry) if entry.content_hash != file.content_hash => ChangeKind::Changed,
            Some(_) => ChangeKind::Unchanged,
        };
        changes.push(FileChange {
            path: file.path.clone(),
            kind,
        });
    }

    for path in manifest.files.keys() {
        if !seen.contains(path.as_str()) {
            changes.push(FileChange {
                path: path.clone(),
                kind: ChangeKind::Deleted,
            });
        }
    }

    changes.sort_by(|a, b| a.path.cmp(&b.path));
    ChangeSet {
        changes,
        config_changed,
    }
}
