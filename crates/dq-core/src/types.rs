//! Core domain types for the retrieval engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::RagError;

/// Stable chunk identifier: owning document plus sequence number.
///
/// Ordering is by document id, then sequence. All ranking tie-breaks use
/// this ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId {
    /// Owning document.
    pub document_id: String,

    /// Position of the chunk within its document (0-based).
    pub seq: u32,
}

impl ChunkId {
    /// Create a chunk id.
    pub fn new(document_id: impl Into<String>, seq: u32) -> Self {
        Self {
            document_id: document_id.into(),
            seq,
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.document_id, self.seq)
    }
}

impl FromStr for ChunkId {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (doc, seq) = s
            .rsplit_once(':')
            .ok_or_else(|| RagError::invalid_argument(format!("malformed chunk id: {}", s)))?;
        let seq = seq
            .parse::<u32>()
            .map_err(|_| RagError::invalid_argument(format!("malformed chunk id: {}", s)))?;
        Ok(Self::new(doc, seq))
    }
}

/// Half-open character span `[start, end)` within a document's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

impl CharSpan {
    /// Number of characters covered.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Check whether the span is empty.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// A chunk of a document, the unit of retrieval.
///
/// Chunks are immutable once built and are shared between indexes and
/// query results through `Arc<Chunk>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier.
    pub id: ChunkId,

    /// Page the chunk is attributed to, if the document is paginated.
    pub page_number: Option<u32>,

    /// First character offset in the document's extracted text.
    pub start_offset: usize,

    /// One past the last character offset.
    pub end_offset: usize,

    /// Chunk text content.
    pub text: String,

    /// Token count (from the configured counter).
    pub token_count: u32,

    /// Blake3 hash of the chunk text.
    #[serde(with = "hex_hash")]
    pub content_hash: [u8; 32],
}

impl Chunk {
    /// Create a new chunk.
    pub fn new(
        id: ChunkId,
        text: impl Into<String>,
        start_offset: usize,
        end_offset: usize,
        page_number: Option<u32>,
        token_count: u32,
    ) -> Self {
        let text = text.into();
        let content_hash = *blake3::hash(text.as_bytes()).as_bytes();

        Self {
            id,
            page_number,
            start_offset,
            end_offset,
            text,
            token_count,
            content_hash,
        }
    }

    /// Owning document id.
    pub fn document_id(&self) -> &str {
        &self.id.document_id
    }

    /// Character span of the chunk.
    pub fn span(&self) -> CharSpan {
        CharSpan {
            start: self.start_offset,
            end: self.end_offset,
        }
    }
}

/// A document handed to the engine for ingestion.
///
/// Text is already extracted; binary formats are parsed upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInput {
    /// Caller-assigned document id.
    pub id: String,

    /// Display name (file name, title). Falls back to the id.
    pub name: Option<String>,

    /// Extracted plain text.
    pub text: String,

    /// Character offsets at which each page starts, ascending.
    /// `None` for unpaginated sources.
    pub page_breaks: Option<Vec<usize>>,
}

impl DocumentInput {
    /// Create an unpaginated document.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            text: text.into(),
            page_breaks: None,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the page start offsets.
    pub fn with_page_breaks(mut self, page_breaks: Vec<usize>) -> Self {
        self.page_breaks = Some(page_breaks);
        self
    }

    /// Name shown in citations.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Blake3 hash of the text, used to detect unchanged re-ingests.
    pub fn content_hash(&self) -> [u8; 32] {
        *blake3::hash(self.text.as_bytes()).as_bytes()
    }
}

/// How a vector store reports similarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Cosine similarity in [-1, 1], higher is closer.
    Cosine,
    /// Unbounded inner product, higher is closer.
    InnerProduct,
    /// Distance >= 0, lower is closer.
    Distance,
}

impl SimilarityMetric {
    /// Whether larger raw scores mean more similar.
    pub fn higher_is_better(&self) -> bool {
        !matches!(self, Self::Distance)
    }
}

/// Native scale of a reranking service's scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreScale {
    /// Already in [0, 1].
    UnitInterval,
    /// Raw logits; mapped through a sigmoid.
    Logit,
    /// Arbitrary real scores; min-max normalized per result set.
    Unbounded,
}

/// A chunk with provenance-tagged scores, created fresh per query.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    /// Shared reference to the indexed chunk.
    pub chunk: Arc<Chunk>,

    /// Raw BM25 score, if the sparse index returned this chunk.
    pub sparse_score: Option<f32>,

    /// Raw similarity in the vector store's scale, if the dense index returned it.
    pub dense_score: Option<f32>,

    /// Weighted combination of the normalized scores.
    pub fused_score: f32,

    /// Reranking service score; authoritative when set.
    pub rerank_score: Option<f32>,
}

impl ScoredCandidate {
    /// The score that determines final ordering.
    pub fn final_score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.fused_score)
    }
}

/// A citation-ready source in a retrieval result.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    /// Result rank (1-indexed).
    pub rank: u32,

    /// The matched chunk.
    pub chunk: Arc<Chunk>,

    /// Authoritative internal score (rerank score if reranked, else fused).
    pub final_score: f32,

    /// User-facing relevance in [0, 1].
    pub relevance_score: f32,

    /// Owning document id.
    pub document_id: String,

    /// Document display name.
    pub document_name: String,

    /// Page number; absent when the document had no pagination.
    pub page_number: Option<u32>,

    /// Character span in the document.
    pub span: CharSpan,

    /// Short excerpt for display.
    pub snippet: String,

    /// Raw BM25 score.
    pub sparse_score: Option<f32>,

    /// Raw dense score.
    pub dense_score: Option<f32>,

    /// Raw rerank score.
    pub rerank_score: Option<f32>,
}

impl Source {
    /// Exact chunk text.
    pub fn text(&self) -> &str {
        &self.chunk.text
    }
}

/// Final ordered output of one retrieval call.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    /// The original query.
    pub query: String,

    /// Ranked sources.
    pub sources: Vec<Source>,

    /// Whether the reranking service ordered these sources.
    pub used_reranking: bool,

    /// Whether dense retrieval was skipped because a dependency failed.
    pub dense_unavailable: bool,

    /// Wall-clock latency of the call.
    pub query_latency_ms: u64,
}

impl RetrievalResult {
    /// An empty, successful result.
    pub fn empty(query: &str, dense_unavailable: bool, query_latency_ms: u64) -> Self {
        Self {
            query: query.to_string(),
            sources: Vec::new(),
            used_reranking: false,
            dense_unavailable,
            query_latency_ms,
        }
    }

    /// Number of sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check whether no sources were found.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Outcome of ingesting one document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    /// Document id.
    pub document_id: String,

    /// Chunks now indexed for the document.
    pub chunks: usize,

    /// Whether embeddings were stored. False when the embedding service or
    /// vector store was unavailable; the chunks remain keyword-searchable.
    pub dense_indexed: bool,

    /// True when the text matched the already-indexed version.
    pub unchanged: bool,
}

/// Statistics about one collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    /// Collection name.
    pub collection: String,

    /// Number of documents.
    pub documents: u64,

    /// Number of chunks.
    pub chunks: u64,

    /// Distinct terms in the sparse index.
    pub vocabulary: u64,

    /// Average chunk length in tokens.
    pub avg_chunk_tokens: f32,
}

/// Hex (de)serialization for blake3 hashes.
mod hex_hash {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        hex::encode(value).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        let bytes = hex::decode(&hex).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("invalid hash length"))
    }
}
