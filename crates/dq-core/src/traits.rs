//! Core traits defining the interfaces between components and the external
//! services the engine consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ScoreScale, SimilarityMetric};

/// Embedding service.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of chunk texts.
    ///
    /// The default implementation embeds one text at a time.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed_query(text).await?);
        }
        Ok(embeddings)
    }

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;
}

/// A nearest-neighbour hit returned by a vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    /// Record id as passed to `upsert`.
    pub id: String,

    /// Similarity in the store's native scale (see [`VectorStore::metric`]).
    pub score: f32,

    /// Metadata stored with the vector.
    pub metadata: serde_json::Value,
}

/// External vector similarity service.
///
/// Records are namespaced by collection. An upsert of a single id must be
/// atomic: a concurrent query sees either the old record or the new one.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace a vector.
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
        metadata: serde_json::Value,
    ) -> Result<()>;

    /// Return the `k` nearest records to `vector`.
    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<VectorHit>>;

    /// Delete records by id. Unknown ids are ignored.
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()>;

    /// Scale of the scores returned by `query`.
    fn metric(&self) -> SimilarityMetric;
}

/// External cross-encoder reranking service.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score each document against the query. The output is aligned by
    /// index with `documents`.
    async fn rerank(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>>;

    /// Native scale of the returned scores.
    fn scale(&self) -> ScoreScale;
}

/// Text normalization and splitting for the sparse index.
pub trait Tokenizer: Send + Sync {
    /// Split text into normalized terms.
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Chunking parameters, in characters.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Maximum characters per chunk.
    pub max_chars: usize,

    /// Characters shared between consecutive chunks.
    pub overlap_chars: usize,

    /// How far before the hard budget a paragraph or sentence boundary may be
    /// used as the split point.
    pub boundary_tolerance: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: 512,
            overlap_chars: 80,
            boundary_tolerance: 100,
        }
    }
}

/// Chunking strategy trait.
pub trait Chunker: Send + Sync {
    /// Split text into ordered, overlapping pieces that cover it without gaps.
    fn chunk(&self, content: &str, config: &ChunkConfig) -> Result<Vec<ChunkData>>;
}

/// Raw chunk data before id and page assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkData {
    /// Chunk text content.
    pub content: String,

    /// Token count.
    pub token_count: usize,

    /// First character offset (inclusive).
    pub start_offset: usize,

    /// Last character offset (exclusive).
    pub end_offset: usize,
}
