//! On-disk layout of the store directory.
//!
//! ```text
//! <store.dir>/
//!   chunks.jsonl    one Chunk per line, document order
//!   manifest.json   change-tracking ledger
//!   vectors.jsonl   {chunk_id, hash, vector} per embedded chunk
//!   journal.jsonl   per-file commits not yet folded into the two above
//!   ingest.lock     advisory lock held by the active ingestion run
//! ```
//!
//! Chunk store, manifest and vectors are replaced atomically: the new
//! content goes to a sibling temp file which is then renamed over the old
//! one. The journal is append-only and synced after every record. A missing
//! file reads as empty state.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use groundwork_core::embedding::{decode_vector, encode_vector};
use groundwork_core::manifest::{Manifest, ManifestEntry};
use groundwork_core::models::Chunk;
use groundwork_core::store::ChunkStore;
use groundwork_core::{GroundworkError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct StorePaths {
    dir: PathBuf,
}

impl StorePaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn chunks(&self) -> PathBuf {
        self.dir.join("chunks.jsonl")
    }

    pub fn manifest(&self) -> PathBuf {
        self.dir.join("manifest.json")
    }

    pub fn vectors(&self) -> PathBuf {
        self.dir.join("vectors.jsonl")
    }

    pub fn journal(&self) -> PathBuf {
        self.dir.join("journal.jsonl")
    }

    pub fn lock(&self) -> PathBuf {
        self.dir.join("ingest.lock")
    }
}

/// Write `contents` to `path` via temp file + rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn load_chunk_store(paths: &StorePaths) -> Result<ChunkStore> {
    match read_optional(&paths.chunks())? {
        Some(text) => ChunkStore::from_jsonl(&text),
        None => Ok(ChunkStore::new()),
    }
}

pub fn save_chunk_store(paths: &StorePaths, store: &ChunkStore) -> Result<()> {
    write_atomic(&paths.chunks(), store.to_jsonl()?.as_bytes())
}

/// `Ok(None)` when no manifest has been written yet.
pub fn load_manifest(paths: &StorePaths) -> Result<Option<Manifest>> {
    read_optional(&paths.manifest())?
        .map(|text| Manifest::from_json(&text))
        .transpose()
}

pub fn save_manifest(paths: &StorePaths, manifest: &Manifest) -> Result<()> {
    write_atomic(&paths.manifest(), manifest.to_json()?.as_bytes())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Remove chunk store, manifest, journal and vector cache.
pub fn wipe(paths: &StorePaths) -> Result<()> {
    for path in [
        paths.chunks(),
        paths.manifest(),
        paths.journal(),
        paths.vectors(),
    ] {
        remove_if_present(&path)?;
    }
    Ok(())
}

pub fn remove_vectors(paths: &StorePaths) -> Result<()> {
    remove_if_present(&paths.vectors())
}

/// One file's committed ingestion result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub path: String,
    pub doc_id: String,
    /// Chunking fingerprint the chunks were produced under.
    pub config_fingerprint: String,
    /// `None` records a deletion.
    pub entry: Option<ManifestEntry>,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

/// Append handle on `journal.jsonl`.
#[derive(Debug)]
pub struct Journal {
    file: File,
}

impl Journal {
    pub fn open(paths: &StorePaths) -> Result<Self> {
        std::fs::create_dir_all(paths.dir())?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(paths.journal())?;
        Ok(Self { file })
    }

    /// Append one record and sync it to disk before returning.
    pub fn append(&mut self, record: &JournalRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// Records in append order. Reading stops at the first line that does not
/// parse: a run killed mid-append leaves at most one torn record, last.
pub fn load_journal(paths: &StorePaths) -> Result<Vec<JournalRecord>> {
    let Some(text) = read_optional(&paths.journal())? else {
        return Ok(Vec::new());
    };
    let mut records = Vec::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(line = n + 1, error = %e, "ignoring torn journal tail");
                break;
            }
        }
    }
    Ok(records)
}

pub fn remove_journal(paths: &StorePaths) -> Result<()> {
    remove_if_present(&paths.journal())
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorRecord {
    chunk_id: String,
    hash: String,
    /// Base64 of little-endian f32 bytes.
    vector: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedVector {
    pub hash: String,
    pub vector: Vec<f32>,
}

/// Embeddings keyed by chunk ID, valid only while the chunk hash matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorCache {
    entries: BTreeMap<String, CachedVector>,
}

impl VectorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached vector for `chunk_id`, if it was computed from text with `hash`.
    pub fn get(&self, chunk_id: &str, hash: &str) -> Option<&[f32]> {
        self.entries
            .get(chunk_id)
            .filter(|c| c.hash == hash)
            .map(|c| c.vector.as_slice())
    }

    pub fn insert(&mut self, chunk_id: String, hash: String, vector: Vec<f32>) {
        self.entries.insert(chunk_id, CachedVector { hash, vector });
    }

    /// Sorted `(chunk_id, vector)` pairs for building a semantic index.
    pub fn vectors(&self) -> Vec<(String, Vec<f32>)> {
        self.entries
            .iter()
            .map(|(id, c)| (id.clone(), c.vector.clone()))
            .collect()
    }

    pub fn to_jsonl(&self) -> Result<String> {
        let mut out = String::new();
        for (chunk_id, cached) in &self.entries {
            let record = VectorRecord {
                chunk_id: chunk_id.clone(),
                hash: cached.hash.clone(),
                vector: encode_vector(&cached.vector),
            };
            out.push_str(&serde_json::to_string(&record)?);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn from_jsonl(text: &str) -> Result<Self> {
        let mut cache = Self::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let record: VectorRecord = serde_json::from_str(line)?;
            let vector = decode_vector(&record.vector).map_err(|e| {
                GroundworkError::ManifestInvalid(format!(
                    "vector for {} is not valid: {}",
                    record.chunk_id, e
                ))
            })?;
            cache.insert(record.chunk_id, record.hash, vector);
        }
        Ok(cache)
    }
}

pub fn load_vectors(paths: &StorePaths) -> Result<VectorCache> {
    match read_optional(&paths.vectors())? {
        Some(text) => VectorCache::from_jsonl(&text),
        None => Ok(VectorCache::new()),
    }
}

pub fn save_vectors(paths: &StorePaths, cache: &VectorCache) -> Result<()> {
    write_atomic(&paths.vectors(), cache.to_jsonl()?.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundwork_core::chunk::ChunkingConfig;
    use tempfile::TempDir;

    #[test]
    fn test_missing_files_read_as_empty() {
        let tmp = TempDir::new().unwrap();
        let paths = StorePaths::new(tmp.path().join("store"));
        assert!(load_chunk_store(&paths).unwrap().is_empty());
        assert!(load_manifest(&paths).unwrap().is_none());
        assert!(load_vectors(&paths).unwrap().is_empty());
    }

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_temp() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/file.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        assert!(!tmp.path().join("nested/file.json.tmp").exists());
    }

    #[test]
    fn test_manifest_persists() {
        let tmp = TempDir::new().unwrap();
        let paths = StorePaths::new(tmp.path());
        let manifest = Manifest::new(&ChunkingConfig::new(4, 1).unwrap());
        save_manifest(&paths, &manifest).unwrap();
        assert_eq!(load_manifest(&paths).unwrap(), Some(manifest));
    }

    #[test]
    fn test_vector_cache_matches_on_hash() {
        let tmp = TempDir::new().unwrap();
        let paths = StorePaths::new(tmp.path());
        let mut cache = VectorCache::new();
        cache.insert("d#0".into(), "h0".into(), vec![0.5, -1.0]);
        save_vectors(&paths, &cache).unwrap();

        let loaded = load_vectors(&paths).unwrap();
        assert_eq!(loaded.get("d#0", "h0"), Some(&[0.5f32, -1.0][..]));
        assert_eq!(loaded.get("d#0", "other"), None);
        assert_eq!(loaded.get("d#1", "h0"), None);
    }

    fn record(path: &str, entry: Option<ManifestEntry>) -> JournalRecord {
        JournalRecord {
            path: path.to_string(),
            doc_id: format!("doc_{}", path),
            config_fingerprint: "fp".to_string(),
            entry,
            chunks: vec![],
        }
    }

    #[test]
    fn test_journal_appends_and_stops_at_torn_tail() {
        let tmp = TempDir::new().unwrap();
        let paths = StorePaths::new(tmp.path().join("store"));
        assert!(load_journal(&paths).unwrap().is_empty());

        let kept = ManifestEntry {
            doc_id: "doc_a.md".to_string(),
            content_hash: "h".to_string(),
            chunks_count: 0,
            updated_at: "2024-01-01T00:00:00Z".to_string(),
        };
        let mut journal = Journal::open(&paths).unwrap();
        journal.append(&record("a.md", Some(kept))).unwrap();
        journal.append(&record("b.md", None)).unwrap();
        drop(journal);

        let mut file = OpenOptions::new().append(true).open(paths.journal()).unwrap();
        file.write_all(b"{\"path\":\"c.md\",\"doc_").unwrap();

        let records = load_journal(&paths).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].path, "a.md");
        assert!(records[0].entry.is_some());
        assert_eq!(records[1].entry, None);

        remove_journal(&paths).unwrap();
        assert!(!paths.journal().exists());
    }

    #[test]
    fn test_wipe_removes_state() {
        let tmp = TempDir::new().unwrap();
        let paths = StorePaths::new(tmp.path());
        save_chunk_store(&paths, &ChunkStore::new()).unwrap();
        save_vectors(&paths, &VectorCache::new()).unwrap();
        Journal::open(&paths).unwrap();
        wipe(&paths).unwrap();
        assert!(!paths.chunks().exists());
        assert!(!paths.journal().exists());
        assert!(!paths.vectors().exists());
        wipe(&paths).unwrap();
    }
}
