//! Atomically swappable index state for concurrent readers.
//!
//! Indexes are immutable once built. A rebuild happens off to the side and
//! is published with a single reference swap, so a reader holding an
//! `Arc` from [`IndexHandle::load`] always sees one complete snapshot.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::error::{GroundworkError, Result};
use crate::lexical::LexicalIndex;
use crate::models::Chunk;
use crate::semantic::SemanticIndex;
use crate::store::ChunkStore;

pub struct IndexHandle<T> {
    current: RwLock<Arc<T>>,
}

impl<T> IndexHandle<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Current snapshot. Cheap: clones an `Arc` under a read lock.
    pub fn load(&self) -> Arc<T> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Swap in `next`, returning the snapshot it replaced.
    pub fn publish(&self, next: T) -> Arc<T> {
        let next = Arc::new(next);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, next)
    }
}

impl<T: Default> Default for IndexHandle<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Everything a query reads: chunk text plus both derived indexes.
#[derive(Debug, Default)]
pub struct CorpusSnapshot {
    chunks: HashMap<String, Chunk>,
    lexical: Option<LexicalIndex>,
    semantic: Option<SemanticIndex>,
}

impl CorpusSnapshot {
    /// A snapshot with no indexes built yet.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from the chunk store. A semantic index that does not cover the
    /// store exactly is discarded, leaving lexical retrieval only.
    pub fn build(store: &ChunkStore, semantic: Option<SemanticIndex>) -> Self {
        let lexical = match LexicalIndex::build(store.chunks()) {
            Ok(index) => Some(index),
            Err(e) => {
                warn!(error = %e, "failed to build lexical index; serving semantic only");
                None
            }
        };
        let semantic = match semantic {
            Some(index) if index.covers(store) => Some(index),
            Some(index) => {
                warn!(
                    vectors = index.len(),
                    chunks = store.len(),
                    "semantic index does not match the chunk store; serving lexical only"
                );
                None
            }
            None => None,
        };
        let chunks = store
            .chunks()
            .iter()
            .map(|c| (c.id.clone(), c.clone()))
            .collect();
        Self {
            chunks,
            lexical,
            semantic,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk(&self, id: &str) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    pub fn lexical(&self) -> Result<&LexicalIndex> {
        self.lexical
            .as_ref()
            .ok_or(GroundworkError::IndexUnavailable("lexical"))
    }

    pub fn semantic(&self) -> Result<&SemanticIndex> {
        self.semantic
            .as_ref()
            .ok_or(GroundworkError::IndexUnavailable("semantic"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            doc_id: "d".to_string(),
            source_path: "d.md".to_string(),
            source_type: SourceType::Flat,
            page: None,
            heading_path: vec![],
            text: text.to_string(),
            created_at: String::new(),
            hash: String::new(),
        }
    }

    #[test]
    fn test_publish_swaps_and_old_readers_keep_their_snapshot() {
        let handle = IndexHandle::new(1u32);
        let before = handle.load();
        let replaced = handle.publish(2);
        assert_eq!(*before, 1);
        assert_eq!(*replaced, 1);
        assert_eq!(*handle.load(), 2);
    }

    #[test]
    fn test_empty_snapshot_has_no_indexes() {
        let snap = CorpusSnapshot::empty();
        assert!(matches!(
            snap.lexical(),
            Err(GroundworkError::IndexUnavailable("lexical"))
        ));
        assert!(snap.semantic().is_err());
    }

    #[test]
    fn test_build_discards_non_covering_semantic_index() {
        let store = ChunkStore::from_chunks(vec![chunk("d#0", "one"), chunk("d#1", "two")]);
        let partial =
            SemanticIndex::build(2, "m", vec![("d#0".to_string(), vec![1.0, 0.0])]).unwrap();
        let snap = CorpusSnapshot::build(&store, Some(partial));
        assert!(snap.semantic().is_err());
        assert!(snap.lexical().is_ok());
        assert_eq!(snap.len(), 2);

        let full = SemanticIndex::build(
            2,
            "m",
            vec![
                ("d#0".to_string(), vec![1.0, 0.0]),
                ("d#1".to_string(), vec![0.0, 1.0]),
            ],
        )
        .unwrap();
        let snap = CorpusSnapshot::build(&store, Some(full));
        assert!(snap.semantic().is_ok());
        assert_eq!(snap.chunk("d#1").map(|c| c.text.as_str()), Some("two"));
    }

    #[test]
    fn test_concurrent_readers_see_complete_snapshots() {
        let handle = Arc::new(IndexHandle::new(vec![0u32; 64]));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let h = Arc::clone(&handle);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let snap = h.load();
                        let first = snap[0];
                        assert!(snap.iter().all(|v| *v == first));
                    }
                })
            })
            .collect();
        for gen in 1..50u32 {
            handle.publish(vec![gen; 64]);
        }
        for r in readers {
            r.join().unwrap();
        }
    }
}
