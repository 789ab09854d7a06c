//! Weighted min-max fusion of sparse and dense rankings.

use std::collections::BTreeMap;
use std::sync::Arc;

use dq_core::{Chunk, ChunkId, ScoredCandidate};
use dq_index::{RankedList, Signal};

/// Min-max normalize a ranked list into [0, 1], keyed by chunk id.
///
/// Lists where lower raw scores are better are inverted so that 1.0 is
/// always the best hit. A list whose scores are all equal (including a
/// single-hit list) normalizes every member to 1.0. Non-finite scores are
/// skipped.
pub fn normalize(list: &RankedList) -> BTreeMap<ChunkId, f32> {
    let finite = || list.hits.iter().filter(|h| h.score.is_finite());

    let (min, max) = finite().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), h| {
        (lo.min(h.score), hi.max(h.score))
    });
    let range = max - min;

    finite()
        .map(|hit| {
            let norm = if range <= 0.0 || !range.is_finite() {
                1.0
            } else if list.higher_is_better {
                (hit.score - min) / range
            } else {
                (max - hit.score) / range
            };
            (hit.chunk.id.clone(), norm)
        })
        .collect()
}

/// Merges sparse and dense candidate lists into one fused ranking.
#[derive(Debug, Clone, Copy)]
pub struct HybridMerger {
    /// Weight of the dense signal, in [0, 1]; sparse gets `1 - weight`.
    pub weight: f32,

    /// Number of candidates kept after fusion.
    pub merge_pool: usize,
}

#[derive(Default)]
struct Entry {
    chunk: Option<Arc<Chunk>>,
    sparse_raw: Option<f32>,
    dense_raw: Option<f32>,
    sparse_norm: f32,
    dense_norm: f32,
}

impl HybridMerger {
    pub fn new(weight: f32, merge_pool: usize) -> Self {
        Self { weight, merge_pool }
    }

    /// Fuse the two lists.
    ///
    /// `fused = weight * dense_norm + (1 - weight) * sparse_norm`, where a
    /// chunk missing from one list contributes 0 for that signal. Output is
    /// sorted by fused score descending, ties by chunk id ascending, and
    /// truncated to the merge pool.
    pub fn merge(&self, sparse: &RankedList, dense: &RankedList) -> Vec<ScoredCandidate> {
        if sparse.is_empty() && dense.is_empty() {
            return Vec::new();
        }

        let mut entries: BTreeMap<ChunkId, Entry> = BTreeMap::new();

        for list in [sparse, dense] {
            let normalized = normalize(list);
            for hit in &list.hits {
                let Some(&norm) = normalized.get(&hit.chunk.id) else {
                    continue;
                };
                let entry = entries.entry(hit.chunk.id.clone()).or_default();
                entry.chunk.get_or_insert_with(|| hit.chunk.clone());
                match list.signal {
                    Signal::Sparse => {
                        entry.sparse_raw = Some(hit.score);
                        entry.sparse_norm = norm;
                    }
                    Signal::Dense => {
                        entry.dense_raw = Some(hit.score);
                        entry.dense_norm = norm;
                    }
                }
            }
        }

        let mut candidates: Vec<ScoredCandidate> = entries
            .into_values()
            .filter_map(|entry| {
                let chunk = entry.chunk?;
                Some(ScoredCandidate {
                    chunk,
                    sparse_score: entry.sparse_raw,
                    dense_score: entry.dense_raw,
                    fused_score: self.weight * entry.dense_norm
                        + (1.0 - self.weight) * entry.sparse_norm,
                    rerank_score: None,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.fused_score
                .total_cmp(&a.fused_score)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        candidates.truncate(self.merge_pool);
        candidates
    }
}
