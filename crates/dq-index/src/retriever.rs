//! Common search interface over the sparse and dense indexes.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;

use dq_core::{Chunk, Result};

/// Which retrieval signal produced a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Sparse,
    Dense,
}

/// A chunk with a raw score from one index.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Arc<Chunk>,
    pub score: f32,
}

/// Ranked output of one index, scores in that index's native scale.
#[derive(Debug, Clone)]
pub struct RankedList {
    /// Producing index.
    pub signal: Signal,

    /// Whether larger scores are better. False for distance metrics.
    pub higher_is_better: bool,

    /// Hits, best first.
    pub hits: Vec<SearchHit>,
}

impl RankedList {
    /// An empty list for the given signal.
    pub fn empty(signal: Signal) -> Self {
        Self {
            signal,
            higher_is_better: true,
            hits: Vec::new(),
        }
    }

    /// Build a list, sorting best first with chunk id tie-breaks.
    pub fn sorted(signal: Signal, higher_is_better: bool, mut hits: Vec<SearchHit>) -> Self {
        hits.sort_by(|a, b| {
            let by_score = if higher_is_better {
                b.score.total_cmp(&a.score)
            } else {
                a.score.total_cmp(&b.score)
            };
            match by_score {
                Ordering::Equal => a.chunk.id.cmp(&b.chunk.id),
                other => other,
            }
        });
        Self {
            signal,
            higher_is_better,
            hits,
        }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// A source of ranked candidates for a query.
///
/// Implemented by [`SparseIndex`](crate::SparseIndex) and
/// [`DenseIndex`](crate::DenseIndex); the merger only sees [`RankedList`]s.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Top-`k` chunks for the query text.
    async fn retrieve(&self, query: &str, k: usize) -> Result<RankedList>;
}
