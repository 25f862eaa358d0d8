//! Incremental rebuild orchestrator.
//!
//! One run:
//!
//! 1. Take the run lock; with `--reseed`, wipe the store directory state.
//! 2. Load manifest and chunk store, replay any journal left by an
//!    interrupted run, then reconcile the pair per document: entries whose
//!    chunk range is missing or wrong are dropped (and re-chunked below),
//!    orphan chunks are purged. Only an unreadable pair is discarded whole.
//! 3. Refuse to continue if the recorded embedding dimension differs from
//!    the configured model.
//! 4. Scan sources, stream-hash every file in parallel, classify against
//!    the manifest.
//! 5. Read, decode and chunk new/changed files in parallel. A file that
//!    fails to load is reported and skipped; its manifest entry and chunks
//!    stay as they were.
//! 6. Commit each file's result as one synced journal record, in path
//!    order, and apply it in memory.
//! 7. Bring the semantic index up to date, reusing cached vectors for
//!    chunks whose text did not change.
//! 8. Compact: write chunk store and manifest once, then drop the journal.
//!
//! A run where nothing changed writes nothing.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use groundwork_core::chunk::{chunk_document, ChunkingConfig};
use groundwork_core::embedding::EmbeddingProvider;
use groundwork_core::hash::{doc_id_for_path, hash_bytes};
use groundwork_core::manifest::{
    detect_changes, ChangeCounts, ChangeKind, IndexBuildRecord, Manifest, ManifestEntry,
    ScannedFile,
};
use groundwork_core::models::{Chunk, DocumentRef};
use groundwork_core::semantic::SemanticIndex;
use groundwork_core::store::ChunkStore;
use groundwork_core::GroundworkError;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::{create_provider, embed_in_batches};
use crate::loader::{self, SourceFile};
use crate::lock::RunLock;
use crate::storage::{self, Journal, JournalRecord, StorePaths, VectorCache};

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    /// Discard chunk store, manifest and vector cache before the run.
    pub reseed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedFile {
    pub path: String,
    pub reason: String,
}

/// State of the semantic index after a run.
#[derive(Debug, Clone, PartialEq)]
pub enum SemanticState {
    /// No embedding provider configured.
    Disabled,
    /// Already covered every chunk; nothing embedded.
    Current { vectors: usize },
    Rebuilt {
        vectors: usize,
        reused: usize,
        embedded: usize,
    },
    /// Embedding failed; the previous vectors and record were kept.
    Stale { reason: String },
}

impl fmt::Display for SemanticState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticState::Disabled => write!(f, "disabled"),
            SemanticState::Current { vectors } => write!(f, "up to date ({} vectors)", vectors),
            SemanticState::Rebuilt {
                vectors,
                reused,
                embedded,
            } => write!(
                f,
                "rebuilt ({} vectors: {} reused, {} embedded)",
                vectors, reused, embedded
            ),
            SemanticState::Stale { reason } => {
                write!(f, "stale, lexical retrieval only ({})", reason)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    /// Files that failed to load are counted in `failed`, not here.
    pub counts: ChangeCounts,
    pub failed: Vec<FailedFile>,
    pub total_chunks: usize,
    pub config_changed: bool,
    /// Why stored state was discarded, when it was.
    pub rebuilt_from_scratch: Option<String>,
    /// Paths whose stored chunks disagreed with the manifest and were
    /// re-chunked, sorted.
    pub repaired: Vec<String>,
    pub semantic: SemanticState,
}

struct LoadedState {
    manifest: Manifest,
    store: ChunkStore,
    discarded: Option<String>,
    repaired: Vec<String>,
    persisted: bool,
}

struct HashedFile {
    file: SourceFile,
    content_hash: String,
}

struct ChunkedDoc {
    doc_id: String,
    content_hash: String,
    chunks: Vec<Chunk>,
}

pub struct Ingestor {
    config: Config,
    paths: StorePaths,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl Ingestor {
    pub fn new(config: Config, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        let paths = StorePaths::new(&config.store.dir);
        Self {
            config,
            paths,
            embedder,
        }
    }

    /// Build with the embedding provider named in the config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        Ok(Self::new(config.clone(), embedder))
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub async fn run(&self, options: IngestOptions) -> Result<IngestReport> {
        let chunking = self.config.chunking()?;
        let mut lock = RunLock::open(&self.paths.lock())?;
        let _guard = lock.try_acquire()?;

        if options.reseed {
            info!(dir = %self.paths.dir().display(), "reseed: discarding chunk store, manifest and vectors");
            storage::wipe(&self.paths)?;
        }

        let LoadedState {
            mut manifest,
            mut store,
            discarded,
            repaired,
            persisted,
        } = self.load_state(&chunking)?;

        if let Some(embedder) = &self.embedder {
            manifest.check_dimension(embedder.dims())?;
        }

        let files = loader::scan_sources(&self.config.sources)?;
        info!(
            files = files.len(),
            root = %self.config.sources.root.display(),
            "scanned sources"
        );

        let (mut hashed, mut failed) = hash_sources(files).await;
        let unreadable: HashSet<String> = failed.iter().map(|f| f.path.clone()).collect();

        let scanned: Vec<ScannedFile> = hashed
            .values()
            .map(|r| ScannedFile {
                path: r.file.path.clone(),
                content_hash: r.content_hash.clone(),
            })
            .collect();
        let mut changes = detect_changes(&manifest, &scanned, &chunking);
        // An unreadable file is not a deleted one.
        changes
            .changes
            .retain(|c| !(c.kind == ChangeKind::Deleted && unreadable.contains(&c.path)));
        if changes.config_changed {
            info!("chunking config changed; every file will be re-chunked");
        }

        let to_chunk: Vec<(SourceFile, String)> = changes
            .changes
            .iter()
            .filter(|c| c.kind.needs_chunking())
            .filter_map(|c| hashed.remove(&c.path))
            .map(|h| {
                let doc_id = manifest
                    .files
                    .get(&h.file.path)
                    .map(|e| e.doc_id.clone())
                    .unwrap_or_else(|| doc_id_for_path(&h.file.path));
                (h.file, doc_id)
            })
            .collect();
        drop(hashed);

        let created_at = Utc::now().to_rfc3339();
        let (mut chunked, load_failures) = chunk_files(to_chunk, chunking, &created_at).await;
        let not_loaded: HashSet<&str> = load_failures.iter().map(|f| f.path.as_str()).collect();
        changes
            .changes
            .retain(|c| !(c.kind.needs_chunking() && not_loaded.contains(c.path.as_str())));
        failed.extend(load_failures);
        failed.sort_by(|a, b| a.path.cmp(&b.path));

        let mut dirty = !persisted;
        let fingerprint = chunking.fingerprint();
        let mut journal: Option<Journal> = None;
        for change in &changes.changes {
            let record = match change.kind {
                ChangeKind::Unchanged => {
                    debug!(path = %change.path, "unchanged");
                    continue;
                }
                ChangeKind::Deleted => {
                    let Some(entry) = manifest.files.get(&change.path) else {
                        continue;
                    };
                    info!(path = %change.path, chunks = entry.chunks_count, "deleted");
                    JournalRecord {
                        path: change.path.clone(),
                        doc_id: entry.doc_id.clone(),
                        config_fingerprint: fingerprint.clone(),
                        entry: None,
                        chunks: Vec::new(),
                    }
                }
                ChangeKind::New | ChangeKind::Changed => {
                    let Some(doc) = chunked.remove(&change.path) else {
                        continue;
                    };
                    let count = doc.chunks.len();
                    info!(path = %change.path, kind = ?change.kind, chunks = count, "indexed");
                    JournalRecord {
                        path: change.path.clone(),
                        doc_id: doc.doc_id.clone(),
                        config_fingerprint: fingerprint.clone(),
                        entry: Some(ManifestEntry {
                            doc_id: doc.doc_id,
                            content_hash: doc.content_hash,
                            chunks_count: count,
                            updated_at: created_at.clone(),
                        }),
                        chunks: doc.chunks,
                    }
                }
            };

            if journal.is_none() {
                journal = Some(Journal::open(&self.paths)?);
            }
            if let Some(writer) = journal.as_mut() {
                writer.append(&record)?;
            }
            apply_record(&mut manifest, &mut store, record);
        }
        let journaled = journal.is_some();
        drop(journal);

        if changes.config_changed {
            if failed.is_empty() {
                manifest.set_chunking_config(&chunking);
                dirty = true;
            } else {
                // Keeping the old fingerprint makes the next run re-chunk everything again.
                warn!(
                    failed = failed.len(),
                    "some files failed to load; chunking config change will be retried next run"
                );
            }
        }

        let (semantic, semantic_changed) =
            self.refresh_semantic(&store, &mut manifest, &chunking).await?;

        if dirty || journaled || semantic_changed {
            self.compact(&store, &manifest)?;
        }

        let counts = changes.counts();
        info!(
            new = counts.new,
            changed = counts.changed,
            unchanged = counts.unchanged,
            deleted = counts.deleted,
            failed = failed.len(),
            chunks = store.len(),
            "ingest complete"
        );

        Ok(IngestReport {
            counts,
            failed,
            total_chunks: store.len(),
            config_changed: changes.config_changed,
            rebuilt_from_scratch: discarded,
            repaired,
            semantic,
        })
    }

    fn load_state(&self, chunking: &ChunkingConfig) -> Result<LoadedState> {
        let journal_found = self.paths.journal().exists();
        let records = storage::load_journal(&self.paths).unwrap_or_else(|e| {
            warn!(error = %e, "journal unreadable; ignoring it");
            Vec::new()
        });

        let mut manifest = match storage::load_manifest(&self.paths) {
            Ok(Some(manifest)) => manifest,
            // A first run that was interrupted leaves only a journal.
            Ok(None) if !records.is_empty() => Manifest::new(chunking),
            Ok(None) => {
                let reason = match storage::load_chunk_store(&self.paths) {
                    Ok(store) if store.is_empty() => None,
                    Ok(store) => Some(format!(
                        "chunk store holds {} chunks but there is no manifest",
                        store.len()
                    )),
                    Err(e) => Some(format!("chunk store unreadable: {}", e)),
                };
                return self.start_fresh(chunking, reason);
            }
            Err(e) => return self.start_fresh(chunking, Some(format!("manifest unreadable: {}", e))),
        };

        let mut store = match storage::load_chunk_store(&self.paths) {
            Ok(store) => store,
            Err(e) => {
                return self.start_fresh(chunking, Some(format!("chunk store unreadable: {}", e)))
            }
        };

        let replayed = records.len();
        let mut repaired: BTreeSet<String> =
            replay_journal(&mut manifest, &mut store, records).into_iter().collect();
        if replayed > 0 {
            info!(records = replayed, "replayed ingestion journal from an interrupted run");
        }

        let reconciled = match manifest.reconcile(&mut store) {
            Ok(reconciled) => reconciled,
            Err(e) => return self.start_fresh(chunking, Some(e.to_string())),
        };
        if !reconciled.is_clean() {
            warn!(
                dropped = ?reconciled.dropped,
                orphaned_chunks = reconciled.orphaned_chunks,
                "manifest and chunk store disagreed; affected files will be re-chunked"
            );
        }
        repaired.extend(reconciled.dropped.iter().cloned());

        // Fold the journal in now so this run appends to an empty one.
        if journal_found {
            self.compact(&store, &manifest)?;
        }

        Ok(LoadedState {
            manifest,
            store,
            discarded: None,
            repaired: repaired.into_iter().collect(),
            persisted: journal_found || reconciled.is_clean(),
        })
    }

    fn start_fresh(&self, chunking: &ChunkingConfig, reason: Option<String>) -> Result<LoadedState> {
        if let Some(reason) = &reason {
            warn!(reason = %reason, "discarding stored state; rebuilding from scratch");
        }
        storage::remove_journal(&self.paths)?;
        Ok(LoadedState {
            manifest: Manifest::new(chunking),
            store: ChunkStore::new(),
            discarded: reason,
            repaired: Vec::new(),
            persisted: false,
        })
    }

    /// Write chunk store then manifest, then drop the journal they now cover.
    fn compact(&self, store: &ChunkStore, manifest: &Manifest) -> Result<()> {
        storage::save_chunk_store(&self.paths, store)?;
        storage::save_manifest(&self.paths, manifest)?;
        storage::remove_journal(&self.paths)?;
        Ok(())
    }

    /// Returns the new state and whether the manifest record changed.
    async fn refresh_semantic(
        &self,
        store: &ChunkStore,
        manifest: &mut Manifest,
        chunking: &ChunkingConfig,
    ) -> Result<(SemanticState, bool)> {
        let Some(embedder) = &self.embedder else {
            let had_record = manifest.semantic_index.take().is_some();
            storage::remove_vectors(&self.paths)?;
            return Ok((SemanticState::Disabled, had_record));
        };

        let model = embedder.model_name().to_string();
        let fingerprint = chunking.fingerprint();
        let record_matches = manifest
            .semantic_index
            .as_ref()
            .is_some_and(|r| r.model_identifier == model && r.embedding_dim == embedder.dims());

        let cache = if record_matches {
            storage::load_vectors(&self.paths).unwrap_or_else(|e| {
                warn!(error = %e, "vector cache unreadable; re-embedding everything");
                VectorCache::new()
            })
        } else {
            VectorCache::new()
        };

        let mut next = VectorCache::new();
        let mut pending: Vec<&Chunk> = Vec::new();
        for chunk in store.chunks() {
            match cache.get(&chunk.id, &chunk.hash) {
                Some(vector) => next.insert(chunk.id.clone(), chunk.hash.clone(), vector.to_vec()),
                None => pending.push(chunk),
            }
        }
        let reused = next.len();

        let up_to_date = pending.is_empty()
            && next == cache
            && manifest.semantic_index.as_ref().is_some_and(|r| {
                r.vectors_count == next.len() && r.config_fingerprint == fingerprint
            });
        if record_matches && up_to_date {
            debug!(vectors = next.len(), "semantic index up to date");
            return Ok((SemanticState::Current { vectors: next.len() }, false));
        }

        let texts: Vec<String> = pending.iter().map(|c| c.text.clone()).collect();
        info!(reused, to_embed = texts.len(), model = %model, "rebuilding semantic index");

        let vectors =
            match embed_in_batches(embedder.as_ref(), &texts, self.config.embedding.batch_size)
                .await
            {
                Ok(vectors) => vectors,
                Err(e) => {
                    if matches!(
                        e.downcast_ref::<GroundworkError>(),
                        Some(GroundworkError::DimensionMismatch { .. })
                    ) {
                        return Err(e);
                    }
                    warn!(
                        error = %format!("{:#}", e),
                        "embedding failed; semantic index is stale, lexical retrieval still available"
                    );
                    return Ok((
                        SemanticState::Stale {
                            reason: format!("{:#}", e),
                        },
                        false,
                    ));
                }
            };

        let embedded = vectors.len();
        for (chunk, vector) in pending.iter().zip(vectors) {
            next.insert(chunk.id.clone(), chunk.hash.clone(), vector);
        }

        let index = SemanticIndex::build(embedder.dims(), &model, next.vectors())?;
        storage::save_vectors(&self.paths, &next)?;
        manifest.semantic_index = Some(IndexBuildRecord {
            vectors_count: index.len(),
            embedding_dim: index.dim(),
            model_identifier: model,
            built_at: Utc::now().to_rfc3339(),
            config_fingerprint: fingerprint,
        });
        info!(vectors = index.len(), reused, embedded, "semantic index rebuilt");

        Ok((
            SemanticState::Rebuilt {
                vectors: index.len(),
                reused,
                embedded,
            },
            true,
        ))
    }
}

/// Fold one committed file result into the in-memory state.
fn apply_record(manifest: &mut Manifest, store: &mut ChunkStore, record: JournalRecord) {
    match record.entry {
        Some(entry) => {
            store.replace_document(&record.doc_id, record.chunks);
            manifest.files.insert(record.path, entry);
        }
        None => {
            manifest.files.remove(&record.path);
            store.purge_document(&record.doc_id);
        }
    }
}

/// Apply journal records in order. A record chunked under a different
/// config than the manifest's is not trusted: its path is dropped so it
/// re-chunks. Returns the dropped paths.
fn replay_journal(
    manifest: &mut Manifest,
    store: &mut ChunkStore,
    records: Vec<JournalRecord>,
) -> Vec<String> {
    let mut dropped = Vec::new();
    for record in records {
        if record.entry.is_some() && record.config_fingerprint != manifest.config.config_fingerprint
        {
            if let Some(entry) = manifest.files.remove(&record.path) {
                store.purge_document(&entry.doc_id);
            }
            store.purge_document(&record.doc_id);
            dropped.push(record.path);
            continue;
        }
        apply_record(manifest, store, record);
    }
    dropped
}

async fn hash_sources(files: Vec<SourceFile>) -> (BTreeMap<String, HashedFile>, Vec<FailedFile>) {
    let mut tasks = JoinSet::new();
    for file in files {
        tasks.spawn_blocking(move || {
            let result = loader::hash_file(&file);
            (file, result)
        });
    }

    let mut hashed = BTreeMap::new();
    let mut failed = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((file, Ok(content_hash))) => {
                hashed.insert(file.path.clone(), HashedFile { file, content_hash });
            }
            Ok((file, Err(e))) => {
                warn!(path = %file.path, error = %e, "failed to read source file");
                failed.push(FailedFile {
                    path: file.path,
                    reason: e.to_string(),
                });
            }
            Err(e) => warn!(error = %e, "hash task failed"),
        }
    }
    (hashed, failed)
}

async fn chunk_files(
    files: Vec<(SourceFile, String)>,
    chunking: ChunkingConfig,
    created_at: &str,
) -> (BTreeMap<String, ChunkedDoc>, Vec<FailedFile>) {
    let mut tasks = JoinSet::new();
    for (file, doc_id) in files {
        let created_at = created_at.to_string();
        tasks.spawn_blocking(move || {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                load_and_chunk(&file, &doc_id, &chunking, &created_at)
            }))
            .unwrap_or_else(|_| {
                Err(GroundworkError::Load {
                    path: file.path.clone(),
                    reason: "decoder panicked".to_string(),
                })
            });
            (file.path, doc_id, outcome)
        });
    }

    let mut chunked = BTreeMap::new();
    let mut failed = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((path, doc_id, Ok((content_hash, chunks)))) => {
                chunked.insert(
                    path,
                    ChunkedDoc {
                        doc_id,
                        content_hash,
                        chunks,
                    },
                );
            }
            Ok((path, _, Err(e))) => {
                warn!(path = %path, error = %e, "failed to load; skipping until next run");
                failed.push(FailedFile {
                    path,
                    reason: e.to_string(),
                });
            }
            Err(e) => warn!(error = %e, "chunking task failed"),
        }
    }
    (chunked, failed)
}

/// Read, decode and chunk one file. The returned hash is of the bytes that
/// were chunked; they are dropped before returning.
fn load_and_chunk(
    file: &SourceFile,
    doc_id: &str,
    chunking: &ChunkingConfig,
    created_at: &str,
) -> Result<(String, Vec<Chunk>), GroundworkError> {
    let bytes = loader::read_bytes(file)?;
    let content_hash = hash_bytes(&bytes);
    let units = loader::load_units(file, &bytes)?;
    let doc = DocumentRef {
        doc_id,
        source_path: &file.path,
        source_type: file.source_type(),
    };
    Ok((content_hash, chunk_document(&doc, &units, chunking, created_at)))
}

/// `gw ingest`: run the orchestrator and print a summary.
pub async fn run_ingest(config: &Config, reseed: bool) -> Result<()> {
    let ingestor = Ingestor::from_config(config)?;
    let report = ingestor.run(IngestOptions { reseed }).await?;

    println!("ingest {}", config.sources.root.display());
    if let Some(reason) = &report.rebuilt_from_scratch {
        println!("  rebuilt from scratch: {}", reason);
    }
    for path in &report.repaired {
        println!("  repaired: {}", path);
    }
    if report.config_changed {
        println!("  chunking config changed: all files re-chunked");
    }
    println!("  new: {}", report.counts.new);
    println!("  changed: {}", report.counts.changed);
    println!("  unchanged: {}", report.counts.unchanged);
    println!("  deleted: {}", report.counts.deleted);
    println!("  failed: {}", report.failed.len());
    for f in &report.failed {
        println!("    {}: {}", f.path, f.reason);
    }
    println!("  total chunks: {}", report.total_chunks);
    println!("  semantic index: {}", report.semantic);
    println!("ok");
    Ok(())
}
