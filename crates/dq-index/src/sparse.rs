//! In-memory BM25 index over chunks.
//!
//! Maps normalized terms to postings lists of (chunk id, term frequency).
//! Chunk lengths and the average length are computed over chunk text since
//! chunks are the retrieval unit. Scores are raw BM25 and are not normalized
//! here.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use dq_core::{Bm25Config, Chunk, ChunkId, Result, Tokenizer};

use crate::retriever::{RankedList, Retriever, SearchHit, Signal};
use crate::tokenizer::SimpleTokenizer;

/// A single entry in a term's postings list.
#[derive(Debug, Clone)]
struct Posting {
    chunk_id: ChunkId,
    term_frequency: u32,
}

#[derive(Debug)]
struct IndexedChunk {
    chunk: Arc<Chunk>,
    length: u32,
    /// Distinct terms, for removal.
    terms: Vec<String>,
}

#[derive(Debug, Default)]
struct SparseState {
    postings: HashMap<String, Vec<Posting>>,
    chunks: HashMap<ChunkId, IndexedChunk>,
    total_length: u64,
}

impl SparseState {
    fn remove(&mut self, id: &ChunkId) -> bool {
        let Some(entry) = self.chunks.remove(id) else {
            return false;
        };
        self.total_length -= entry.length as u64;
        for term in &entry.terms {
            if let Some(list) = self.postings.get_mut(term) {
                list.retain(|p| &p.chunk_id != id);
                if list.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        true
    }

    fn average_length(&self) -> f32 {
        if self.chunks.is_empty() {
            return 0.0;
        }
        self.total_length as f32 / self.chunks.len() as f32
    }
}

/// BM25 keyword index.
///
/// Readers share a read lock; each chunk is inserted under one write-lock
/// acquisition, so a search never sees a chunk's postings without its length
/// or vice versa.
pub struct SparseIndex {
    state: RwLock<SparseState>,
    tokenizer: Arc<dyn Tokenizer>,
    k1: f32,
    b: f32,
}

impl SparseIndex {
    /// Create an empty index with the default tokenizer.
    pub fn new(config: &Bm25Config) -> Self {
        Self::with_tokenizer(config, Arc::new(SimpleTokenizer))
    }

    /// Create an empty index with a custom tokenizer.
    pub fn with_tokenizer(config: &Bm25Config, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            state: RwLock::new(SparseState::default()),
            tokenizer,
            k1: config.k1,
            b: config.b,
        }
    }

    /// Add chunks to the index, replacing chunks with the same id.
    ///
    /// Chunks without any terms are skipped. Returns the number indexed.
    pub fn index(&self, chunks: &[Arc<Chunk>]) -> usize {
        let mut indexed = 0;
        for chunk in chunks {
            if self.index_chunk(chunk) {
                indexed += 1;
            }
        }
        debug!("Indexed {} of {} chunks", indexed, chunks.len());
        indexed
    }

    fn index_chunk(&self, chunk: &Arc<Chunk>) -> bool {
        let tokens = self.tokenizer.tokenize(&chunk.text);
        if tokens.is_empty() {
            return false;
        }

        let mut frequencies: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *frequencies.entry(token.clone()).or_insert(0) += 1;
        }
        let length = tokens.len() as u32;

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.remove(&chunk.id);

        let mut terms = Vec::with_capacity(frequencies.len());
        for (term, term_frequency) in frequencies {
            state.postings.entry(term.clone()).or_default().push(Posting {
                chunk_id: chunk.id.clone(),
                term_frequency,
            });
            terms.push(term);
        }
        state.total_length += length as u64;
        state.chunks.insert(
            chunk.id.clone(),
            IndexedChunk {
                chunk: chunk.clone(),
                length,
                terms,
            },
        );
        true
    }

    /// Remove chunks by id. Returns the number removed.
    pub fn remove(&self, ids: &[ChunkId]) -> usize {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        ids.iter().filter(|id| state.remove(id)).count()
    }

    /// Top-`k` chunks by BM25 score, descending, ties broken by lower chunk id.
    ///
    /// An empty query, or one with no indexed terms, yields no results.
    pub fn search(&self, query: &str, k: usize) -> Vec<SearchHit> {
        let query_terms = self.tokenizer.tokenize(query);
        if query_terms.is_empty() || k == 0 {
            return Vec::new();
        }

        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.chunks.is_empty() {
            return Vec::new();
        }

        let n = state.chunks.len() as f32;
        let avg_length = state.average_length();
        let mut scores: HashMap<&ChunkId, f32> = HashMap::new();

        for term in &query_terms {
            let Some(postings) = state.postings.get(term) else {
                continue;
            };
            let df = postings.len() as f32;
            // IDF: ln(1 + (N - df + 0.5) / (df + 0.5)), always positive
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();

            for posting in postings {
                let length = state
                    .chunks
                    .get(&posting.chunk_id)
                    .map(|c| c.length as f32)
                    .unwrap_or(avg_length);
                let tf = posting.term_frequency as f32;
                let norm = 1.0 - self.b + self.b * length / avg_length;
                let score = idf * (tf * (self.k1 + 1.0)) / (tf + self.k1 * norm);

                *scores.entry(&posting.chunk_id).or_insert(0.0) += score;
            }
        }

        let hits: Vec<SearchHit> = scores
            .into_iter()
            .filter_map(|(id, score)| {
                state.chunks.get(id).map(|entry| SearchHit {
                    chunk: entry.chunk.clone(),
                    score,
                })
            })
            .collect();

        let mut ranked = RankedList::sorted(Signal::Sparse, true, hits).hits;
        ranked.truncate(k);
        ranked
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .chunks
            .len()
    }

    /// Check whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct terms.
    pub fn vocabulary_size(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .postings
            .len()
    }

    /// Average chunk length in tokens.
    pub fn average_length(&self) -> f32 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .average_length()
    }
}

#[async_trait]
impl Retriever for SparseIndex {
    async fn retrieve(&self, query: &str, k: usize) -> Result<RankedList> {
        Ok(RankedList {
            signal: Signal::Sparse,
            higher_is_better: true,
            hits: self.search(query, k),
        })
    }
}
