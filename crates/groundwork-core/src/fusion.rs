//! Rank-normalized weighted fusion of the semantic and lexical lists.
//!
//! Raw cosine similarity and BM25 scores live on unrelated scales, so each
//! list is converted to a rank score first:
//!
//! ```text
//! rank_score = 1 - (rank - 1) / list_length        (rank is 1-based)
//! fused      = α · semantic_rank_score + (1 - α) · keyword_rank_score
//! ```
//!
//! A chunk missing from one list scores `0` on that side. Output is every
//! chunk in the union, sorted by fused score descending with ties broken by
//! chunk ID ascending.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::{FusedCandidate, RetrievalCandidate};

/// Rank score of a 1-based `rank` within a list of `list_len` entries.
pub fn rank_score(rank: usize, list_len: usize) -> f64 {
    if list_len == 0 || rank == 0 || rank > list_len {
        return 0.0;
    }
    1.0 - (rank - 1) as f64 / list_len as f64
}

/// Fuse two ranked lists with weight `alpha` on the semantic side.
pub fn fuse(
    semantic: &[RetrievalCandidate],
    keyword: &[RetrievalCandidate],
    alpha: f64,
) -> Vec<FusedCandidate> {
    let alpha = alpha.clamp(0.0, 1.0);
    let mut by_id: HashMap<&str, (Option<usize>, Option<usize>)> = HashMap::new();

    for c in semantic {
        let slot = by_id.entry(c.chunk_id.as_str()).or_insert((None, None));
        slot.0 = Some(slot.0.map_or(c.rank, |r| r.min(c.rank)));
    }
    for c in keyword {
        let slot = by_id.entry(c.chunk_id.as_str()).or_insert((None, None));
        slot.1 = Some(slot.1.map_or(c.rank, |r| r.min(c.rank)));
    }

    let mut fused: Vec<FusedCandidate> = by_id
        .into_iter()
        .map(|(chunk_id, (semantic_rank, keyword_rank))| {
            let s = semantic_rank.map_or(0.0, |r| rank_score(r, semantic.len()));
            let k = keyword_rank.map_or(0.0, |r| rank_score(r, keyword.len()));
            FusedCandidate {
                chunk_id: chunk_id.to_string(),
                semantic_rank,
                keyword_rank,
                fused_score: alpha * s + (1.0 - alpha) * k,
            }
        })
        .collect();

    sort_fused(&mut fused);
    fused
}

/// Descending fused score, then ascending chunk ID.
pub fn sort_fused(candidates: &mut [FusedCandidate]) {
    candidates.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}
