//! Dense index adapter over an external vector store.
//!
//! Stores chunk embeddings in a [`VectorStore`] under the collection's
//! namespace and resolves nearest-neighbour hits back to registered chunks.
//! Every call to the embedding service and the vector store is bounded by
//! its own timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use dq_core::{Chunk, ChunkId, Embedder, RagError, Result, SimilarityMetric, VectorStore};

use crate::registry::ChunkRegistry;
use crate::retriever::{RankedList, Retriever, SearchHit, Signal};

/// Deadlines for the dense path's external calls.
#[derive(Debug, Clone, Copy)]
pub struct DenseTimeouts {
    pub embed: Duration,
    pub vector_store: Duration,
}

impl Default for DenseTimeouts {
    fn default() -> Self {
        Self {
            embed: Duration::from_secs(3),
            vector_store: Duration::from_secs(2),
        }
    }
}

/// Run `future` with a deadline, mapping expiry to [`RagError::Timeout`].
pub async fn with_timeout<T>(
    operation: &str,
    limit: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(RagError::timeout(operation, limit.as_millis() as u64)),
    }
}

/// Vector store adapter for one collection.
pub struct DenseIndex<E, V> {
    embedder: Arc<E>,
    store: Arc<V>,
    collection: String,
    registry: ChunkRegistry,
    timeouts: DenseTimeouts,
}

impl<E, V> DenseIndex<E, V>
where
    E: Embedder,
    V: VectorStore,
{
    /// Create an adapter for `collection`.
    pub fn new(
        embedder: Arc<E>,
        store: Arc<V>,
        collection: impl Into<String>,
        registry: ChunkRegistry,
        timeouts: DenseTimeouts,
    ) -> Self {
        Self {
            embedder,
            store,
            collection: collection.into(),
            registry,
            timeouts,
        }
    }

    /// Scale of the scores returned by [`search`](Self::search).
    pub fn metric(&self) -> SimilarityMetric {
        self.store.metric()
    }

    /// Store one chunk's embedding.
    pub async fn upsert(&self, chunk: &Chunk, embedding: Vec<f32>) -> Result<()> {
        let metadata = json!({
            "document_id": chunk.document_id(),
            "seq": chunk.id.seq,
            "page_number": chunk.page_number,
            "start_offset": chunk.start_offset,
            "end_offset": chunk.end_offset,
        });
        let id = chunk.id.to_string();

        with_timeout(
            "vector store upsert",
            self.timeouts.vector_store,
            self.store.upsert(&self.collection, &id, embedding, metadata),
        )
        .await
    }

    /// Embed and store a batch of chunks.
    ///
    /// Returns the number stored. Fails on the first embedding or store error.
    pub async fn upsert_chunks(&self, chunks: &[Arc<Chunk>]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let embeddings = with_timeout(
            "embedding",
            self.timeouts.embed,
            self.embedder.embed_documents(&texts),
        )
        .await?;

        if embeddings.len() != chunks.len() {
            return Err(RagError::embedding(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            self.upsert(chunk, embedding).await?;
        }

        debug!(
            "Stored {} embeddings in collection {}",
            chunks.len(),
            self.collection
        );
        Ok(chunks.len())
    }

    /// Nearest chunks to an already computed query embedding, in the store's
    /// native scale. Hits for unregistered chunks are dropped.
    pub async fn search(&self, query_embedding: &[f32], k: usize) -> Result<RankedList> {
        if k == 0 {
            return Ok(RankedList::empty(Signal::Dense));
        }

        let raw = with_timeout(
            "vector store query",
            self.timeouts.vector_store,
            self.store.query(&self.collection, query_embedding, k),
        )
        .await?;

        let mut hits = Vec::with_capacity(raw.len());
        for hit in raw {
            if !hit.score.is_finite() {
                warn!("Dropping vector hit {} with non-finite score", hit.id);
                continue;
            }
            let chunk = hit
                .id
                .parse::<ChunkId>()
                .ok()
                .and_then(|id| self.registry.get(&id));
            match chunk {
                Some(chunk) => hits.push(SearchHit {
                    chunk,
                    score: hit.score,
                }),
                None => debug!("Vector hit {} has no registered chunk", hit.id),
            }
        }

        let mut list = RankedList::sorted(Signal::Dense, self.metric().higher_is_better(), hits);
        list.hits.truncate(k);
        Ok(list)
    }

    /// Remove chunk embeddings.
    pub async fn remove(&self, ids: &[ChunkId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = ids.iter().map(ChunkId::to_string).collect();
        with_timeout(
            "vector store delete",
            self.timeouts.vector_store,
            self.store.delete(&self.collection, &ids),
        )
        .await
    }
}

#[async_trait]
impl<E, V> Retriever for DenseIndex<E, V>
where
    E: Embedder,
    V: VectorStore,
{
    /// Embed the query once, then search the vector store.
    async fn retrieve(&self, query: &str, k: usize) -> Result<RankedList> {
        let embedding = with_timeout(
            "embedding",
            self.timeouts.embed,
            self.embedder.embed_query(query),
        )
        .await?;

        if embedding.len() != self.embedder.dimension() {
            return Err(RagError::embedding(format!(
                "query embedding has dimension {}, expected {}",
                embedding.len(),
                self.embedder.dimension()
            )));
        }

        self.search(&embedding, k).await
    }
}
