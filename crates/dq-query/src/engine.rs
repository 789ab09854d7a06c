//! Retrieval engine: ingestion and hybrid query pipeline.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use dq_chunk::{build_chunks, WindowChunker};
use dq_core::{
    Chunk, ChunkId, Chunker, DocumentInput, Embedder, EngineConfig, IndexStats, IngestReport,
    RagError, Reranker, Result, RetrievalResult, Tokenizer, VectorStore,
};
use dq_index::{
    ChunkRegistry, DenseIndex, DenseTimeouts, RankedList, Retriever, Signal, SimpleTokenizer,
    SparseIndex,
};

use crate::citation::CitationExtractor;
use crate::fusion::HybridMerger;
use crate::rerank::RerankStage;

/// Bookkeeping for one ingested document.
#[derive(Debug, Clone)]
struct DocumentEntry {
    name: String,
    content_hash: [u8; 32],
    chunk_ids: Vec<ChunkId>,
    dense_indexed: bool,
}

/// Indexes and document table of one collection.
struct Collection<E, V> {
    registry: ChunkRegistry,
    sparse: SparseIndex,
    dense: DenseIndex<E, V>,
    documents: RwLock<BTreeMap<String, DocumentEntry>>,
    /// Serializes ingestion and removal so document entries and index
    /// contents change together.
    writer: Mutex<()>,
}

impl<E, V> Collection<E, V> {
    fn document(&self, id: &str) -> Option<DocumentEntry> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn document_names(&self) -> HashMap<String, String> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, entry)| (id.clone(), entry.name.clone()))
            .collect()
    }
}

/// Hybrid retrieval engine.
///
/// Holds one sparse index, one dense adapter and one document table per
/// collection. Queries run the sparse and dense paths concurrently, fuse
/// them, optionally rerank, and return citation-ready sources. Failures of
/// the embedding service, vector store or reranking service degrade the
/// result instead of failing it.
pub struct RetrievalEngine<E, V> {
    config: EngineConfig,
    embedder: Arc<E>,
    store: Arc<V>,
    chunker: Arc<dyn Chunker>,
    tokenizer: Arc<dyn Tokenizer>,
    reranker: Option<Arc<dyn Reranker>>,
    citations: CitationExtractor,
    collections: RwLock<HashMap<String, Arc<Collection<E, V>>>>,
}

impl<E, V> RetrievalEngine<E, V>
where
    E: Embedder + 'static,
    V: VectorStore + 'static,
{
    /// Create an engine. Fails with [`RagError::Config`] on invalid tunables.
    pub fn new(config: EngineConfig, embedder: Arc<E>, store: Arc<V>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            embedder,
            store,
            chunker: Arc::new(WindowChunker::new()),
            tokenizer: Arc::new(SimpleTokenizer),
            reranker: None,
            citations: CitationExtractor::new(),
            collections: RwLock::new(HashMap::new()),
        })
    }

    /// Use a reranking service for the final ordering.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Replace the tokenizer used by the sparse index and citation snippets.
    ///
    /// Applies to collections created afterwards.
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.citations = CitationExtractor::with_tokenizer(tokenizer.clone());
        self.tokenizer = tokenizer;
        self
    }

    /// Replace the chunking strategy.
    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    /// Effective configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn collection(&self, name: &str) -> Option<Arc<Collection<E, V>>> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn collection_or_create(&self, name: &str) -> Arc<Collection<E, V>> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        collections
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating collection {}", name);
                let registry = ChunkRegistry::new();
                let timeouts = DenseTimeouts {
                    embed: self.config.timeouts.embed(),
                    vector_store: self.config.timeouts.vector_store(),
                };
                Arc::new(Collection {
                    sparse: SparseIndex::with_tokenizer(&self.config.bm25, self.tokenizer.clone()),
                    dense: DenseIndex::new(
                        self.embedder.clone(),
                        self.store.clone(),
                        name,
                        registry.clone(),
                        timeouts,
                    ),
                    registry,
                    documents: RwLock::new(BTreeMap::new()),
                    writer: Mutex::new(()),
                })
            })
            .clone()
    }

    /// Chunk a document and add it to both indexes of `collection`.
    ///
    /// Re-ingesting identical text is a no-op; changed text replaces the
    /// document's previous chunks. If embedding or the vector store fails,
    /// the chunks stay keyword-searchable and the report says
    /// `dense_indexed: false`.
    pub async fn ingest_document(
        &self,
        collection: &str,
        document: DocumentInput,
    ) -> Result<IngestReport> {
        if document.id.trim().is_empty() {
            return Err(RagError::invalid_argument("document id must not be empty"));
        }

        let start = Instant::now();
        let index = self.collection_or_create(collection);
        let _writer = index.writer.lock().await;

        let content_hash = document.content_hash();
        let previous = index.document(&document.id);
        if let Some(entry) = &previous {
            if entry.content_hash == content_hash {
                debug!("Document {} unchanged, skipping", document.id);
                let dense_indexed = entry.dense_indexed || self.reembed(&index, &document.id).await;
                return Ok(IngestReport {
                    document_id: document.id,
                    chunks: entry.chunk_ids.len(),
                    dense_indexed,
                    unchanged: true,
                });
            }
        }

        let chunks: Vec<Arc<Chunk>> = build_chunks(
            self.chunker.as_ref(),
            &document,
            &self.config.chunking.to_chunk_config(),
        )?
        .into_iter()
        .map(Arc::new)
        .collect();

        // No table entry while the indexes are being rewritten.
        index
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&document.id);
        let stale = self.drop_chunks(&index, &document.id).await;
        if !stale.is_empty() {
            debug!("Replaced {} chunks of document {}", stale.len(), document.id);
        }

        for chunk in &chunks {
            index.registry.insert(chunk.clone());
        }
        index.sparse.index(&chunks);

        let dense_indexed = match index.dense.upsert_chunks(&chunks).await {
            Ok(_) => true,
            Err(e) => {
                degraded(&e, &format!("Dense indexing of document {}", document.id));
                false
            }
        };

        let chunk_ids: Vec<ChunkId> = chunks.iter().map(|c| c.id.clone()).collect();
        index
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                document.id.clone(),
                DocumentEntry {
                    name: document.display_name().to_string(),
                    content_hash,
                    chunk_ids,
                    dense_indexed,
                },
            );

        info!(
            "Ingested document {} into {}: {} chunks in {}ms",
            document.id,
            collection,
            chunks.len(),
            start.elapsed().as_millis()
        );

        Ok(IngestReport {
            document_id: document.id,
            chunks: chunks.len(),
            dense_indexed,
            unchanged: false,
        })
    }

    /// Remove a document and its chunks. Returns the number of chunks removed.
    pub async fn remove_document(&self, collection: &str, document_id: &str) -> Result<usize> {
        let not_found = || RagError::DocumentNotFound {
            id: document_id.to_string(),
        };
        let index = self.collection(collection).ok_or_else(not_found)?;
        let _writer = index.writer.lock().await;

        let entry = index
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(document_id)
            .ok_or_else(not_found)?;

        self.drop_chunks(&index, document_id).await;
        info!(
            "Removed document {} from {} ({} chunks)",
            document_id,
            collection,
            entry.chunk_ids.len()
        );
        Ok(entry.chunk_ids.len())
    }

    /// Drop every registered chunk of a document from all three indexes.
    async fn drop_chunks(&self, index: &Collection<E, V>, document_id: &str) -> Vec<ChunkId> {
        let ids = index.registry.remove_document(document_id);
        index.sparse.remove(&ids);
        if let Err(e) = index.dense.remove(&ids).await {
            warn!("Failed to delete vectors of document {}: {}", document_id, e);
        }
        ids
    }

    /// Retry embedding an unchanged document whose vectors are missing.
    async fn reembed(&self, index: &Collection<E, V>, document_id: &str) -> bool {
        let chunks = index.registry.document_chunks(document_id);
        match index.dense.upsert_chunks(&chunks).await {
            Ok(_) => {
                if let Some(entry) = index
                    .documents
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get_mut(document_id)
                {
                    entry.dense_indexed = true;
                }
                info!("Embedded previously keyword-only document {}", document_id);
                true
            }
            Err(e) => {
                degraded(&e, &format!("Dense indexing of document {}", document_id));
                false
            }
        }
    }

    /// Statistics for a collection. Unknown collections report zeros.
    pub fn stats(&self, collection: &str) -> IndexStats {
        let Some(index) = self.collection(collection) else {
            return IndexStats {
                collection: collection.to_string(),
                ..Default::default()
            };
        };

        let documents = index
            .documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();

        IndexStats {
            collection: collection.to_string(),
            documents: documents as u64,
            chunks: index.sparse.len() as u64,
            vocabulary: index.sparse.vocabulary_size() as u64,
            avg_chunk_tokens: index.sparse.average_length(),
        }
    }

    /// Retrieve the `top_k_final` most relevant sources for `query`.
    ///
    /// `top_k_final` is clamped to the merge pool size. Never fails: an
    /// unknown collection or a query matching nothing yields an empty result,
    /// and dependency failures are reported through `dense_unavailable` and
    /// `used_reranking`.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k_final: usize,
        collection: &str,
    ) -> RetrievalResult {
        let start = Instant::now();
        let elapsed = |start: Instant| start.elapsed().as_millis() as u64;

        let retrieval = &self.config.retrieval;
        let top_k = top_k_final.min(retrieval.merge_pool);

        let index = match self.collection(collection) {
            Some(index) if top_k > 0 && !query.trim().is_empty() => index,
            _ => return RetrievalResult::empty(query, false, elapsed(start)),
        };

        let pool = retrieval.candidate_pool;
        let (sparse, dense) = tokio::join!(
            index.sparse.retrieve(query, pool),
            index.dense.retrieve(query, pool)
        );

        let sparse = sparse.unwrap_or_else(|e| {
            warn!("Keyword search failed: {}", e);
            RankedList::empty(Signal::Sparse)
        });
        let (dense, dense_unavailable) = match dense {
            Ok(list) => (list, false),
            Err(e) => {
                degraded(&e, "Dense retrieval");
                (RankedList::empty(Signal::Dense), true)
            }
        };

        debug!(
            "Sparse search returned {} results, dense search returned {} results",
            sparse.len(),
            dense.len()
        );

        let merger = HybridMerger::new(retrieval.hybrid_weight, retrieval.merge_pool);
        let merged = merger.merge(&sparse, &dense);
        if merged.is_empty() {
            return RetrievalResult::empty(query, dense_unavailable, elapsed(start));
        }

        let stage = RerankStage::new(self.reranker.clone(), self.config.timeouts.rerank());
        let reranked = stage.rerank(query, merged, top_k).await;

        let sources = self.citations.extract(
            query,
            &reranked.candidates,
            stage.scale(),
            &index.document_names(),
        );

        let latency_ms = elapsed(start);
        info!(
            "Retrieved {} sources for {:?} in {}ms (reranked: {}, dense: {})",
            sources.len(),
            query,
            latency_ms,
            reranked.used_reranking,
            !dense_unavailable
        );

        RetrievalResult {
            query: query.to_string(),
            sources,
            used_reranking: reranked.used_reranking,
            dense_unavailable,
            query_latency_ms: latency_ms,
        }
    }
}

/// Log a dense-path failure the engine works around. Errors outside the
/// collaborator taxonomy point at a bug rather than an outage.
fn degraded(e: &RagError, context: &str) {
    if e.is_recoverable() {
        warn!("{} unavailable ({}), using keyword search only", context, e);
    } else {
        error!("{} failed unexpectedly ({}), using keyword search only", context, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use dq_core::{ScoreScale, SimilarityMetric, VectorHit};
    use dq_embed::HashingEmbedder;
    use dq_index::InMemoryVectorStore;

    use crate::rerank::LexicalReranker;

    const PHRASE: &str = " quarterly revenue reconciliation ";
    const MARKER: &str = " pelican ";

    fn filler(len: usize) -> String {
        "lorem ipsum dolor sit amet ".chars().cycle().take(len).collect()
    }

    /// 1500 characters, three pages, no paragraph or sentence boundaries.
    /// The phrase only falls inside the second chunk and the marker only
    /// inside the third.
    fn scenario_document() -> DocumentInput {
        let mut text = filler(600);
        text.push_str(PHRASE);
        text.push_str(&filler(1000 - text.len()));
        text.push_str(MARKER);
        text.push_str(&filler(1500 - text.len()));
        assert_eq!(text.chars().count(), 1500);

        DocumentInput::new("report", text)
            .with_name("Annual Report.pdf")
            .with_page_breaks(vec![0, 500, 1000])
    }

    /// Embeds by concept presence: finance words, bird words, filler words.
    struct ConceptEmbedder;

    impl ConceptEmbedder {
        fn vector(text: &str) -> Vec<f32> {
            let has = |words: &[&str]| {
                if words.iter().any(|w| text.contains(w)) {
                    1.0
                } else {
                    0.0
                }
            };
            vec![
                has(&["quarterly", "revenue", "earnings"]),
                has(&["pelican", "seabird"]),
                has(&["lorem", "ipsum"]),
            ]
        }
    }

    #[async_trait]
    impl Embedder for ConceptEmbedder {
        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            Ok(Self::vector(text))
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Err(RagError::embedding("service unavailable"))
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    struct DownReranker;

    #[async_trait]
    impl Reranker for DownReranker {
        async fn rerank(&self, _query: &str, _documents: &[&str]) -> Result<Vec<f32>> {
            Err(RagError::rerank("connection refused"))
        }

        fn scale(&self) -> ScoreScale {
            ScoreScale::Logit
        }
    }

    /// Stalls on any text mentioning "delta".
    struct StallingEmbedder(HashingEmbedder);

    #[async_trait]
    impl Embedder for StallingEmbedder {
        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("delta") {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.0.embed_query(text).await
        }

        fn dimension(&self) -> usize {
            self.0.dimension()
        }
    }

    /// Fails while `down` is set.
    struct FlakyEmbedder {
        down: AtomicBool,
        inner: HashingEmbedder,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            if self.down.load(Ordering::SeqCst) {
                return Err(RagError::embedding("quota exceeded"));
            }
            self.inner.embed_query(text).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    /// Accepts writes, never answers queries.
    struct SilentStore;

    #[async_trait]
    impl VectorStore for SilentStore {
        async fn upsert(
            &self,
            _collection: &str,
            _id: &str,
            _vector: Vec<f32>,
            _metadata: serde_json::Value,
        ) -> Result<()> {
            Ok(())
        }

        async fn query(
            &self,
            _collection: &str,
            _vector: &[f32],
            _k: usize,
        ) -> Result<Vec<VectorHit>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }

        async fn delete(&self, _collection: &str, _ids: &[String]) -> Result<()> {
            Ok(())
        }

        fn metric(&self) -> SimilarityMetric {
            SimilarityMetric::Cosine
        }
    }

    fn engine<E: Embedder + 'static>(embedder: E) -> RetrievalEngine<E, InMemoryVectorStore> {
        engine_with(EngineConfig::default(), embedder)
    }

    fn engine_with<E: Embedder + 'static>(
        config: EngineConfig,
        embedder: E,
    ) -> RetrievalEngine<E, InMemoryVectorStore> {
        RetrievalEngine::new(config, Arc::new(embedder), Arc::new(InMemoryVectorStore::new()))
            .unwrap()
    }

    fn seqs(result: &RetrievalResult) -> Vec<u32> {
        result.sources.iter().map(|s| s.chunk.id.seq).collect()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;

        let err = RetrievalEngine::new(
            config,
            Arc::new(HashingEmbedder::new()),
            Arc::new(InMemoryVectorStore::new()),
        )
        .err()
        .unwrap();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[tokio::test]
    async fn test_scenario_chunking_and_pages() {
        let engine = engine(ConceptEmbedder);
        let report = engine
            .ingest_document("docs", scenario_document())
            .await
            .unwrap();

        assert_eq!(report.chunks, 4);
        assert!(report.dense_indexed);
        assert!(!report.unchanged);

        let index = engine.collection("docs").unwrap();
        let chunks = index.registry.document_chunks("report");
        let spans: Vec<(usize, usize)> =
            chunks.iter().map(|c| (c.start_offset, c.end_offset)).collect();
        assert_eq!(spans, vec![(0, 512), (432, 944), (864, 1376), (1296, 1500)]);

        let pages: Vec<Option<u32>> = chunks.iter().map(|c| c.page_number).collect();
        assert_eq!(pages, vec![Some(1), Some(2), Some(3), Some(3)]);
    }

    #[tokio::test]
    async fn test_scenario_exact_phrase_hits_second_chunk() {
        let engine = engine(ConceptEmbedder);
        engine
            .ingest_document("docs", scenario_document())
            .await
            .unwrap();

        let index = engine.collection("docs").unwrap();
        let sparse = index
            .sparse
            .retrieve("quarterly revenue reconciliation", 20)
            .await
            .unwrap();
        assert_eq!(sparse.hits[0].chunk.id, ChunkId::new("report", 1));

        let result = engine
            .retrieve("quarterly revenue reconciliation", 5, "docs")
            .await;
        assert_eq!(result.sources[0].chunk.id.seq, 1);
        assert_eq!(result.sources[0].page_number, Some(2));
        assert_eq!(result.sources[0].document_name, "Annual Report.pdf");
        assert_eq!(result.sources[0].relevance_score, 1.0);
    }

    #[tokio::test]
    async fn test_scenario_paraphrase_served_by_dense() {
        let engine = engine(ConceptEmbedder);
        engine
            .ingest_document("docs", scenario_document())
            .await
            .unwrap();

        let index = engine.collection("docs").unwrap();
        let sparse = index.sparse.retrieve("seabird sighting", 20).await.unwrap();
        assert!(sparse.is_empty());

        let result = engine.retrieve("seabird sighting", 5, "docs").await;
        assert!(!result.dense_unavailable);
        assert_eq!(result.sources[0].chunk.id.seq, 2);
        assert_eq!(result.sources[0].sparse_score, None);
        assert!(result.sources[0].dense_score.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_reranker_keeps_merged_order() {
        let plain = engine(HashingEmbedder::new());
        let with_down = engine(HashingEmbedder::new()).with_reranker(Arc::new(DownReranker));

        for engine in [&plain, &with_down] {
            engine
                .ingest_document("docs", scenario_document())
                .await
                .unwrap();
        }

        let expected = plain.retrieve("revenue amet pelican", 3, "docs").await;
        let result = with_down.retrieve("revenue amet pelican", 3, "docs").await;

        assert!(!result.used_reranking);
        assert!(result.len() <= 3);
        assert_eq!(seqs(&result), seqs(&expected));
        assert!(result.sources.iter().all(|s| s.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn test_reranker_orders_results() {
        let mut config = EngineConfig::default();
        config.chunking.chunk_size = 60;
        config.chunking.chunk_overlap = 10;
        config.chunking.boundary_tolerance = 50;

        let engine = engine_with(config, HashingEmbedder::new())
            .with_reranker(Arc::new(LexicalReranker::new()));
        let text = "Shipping takes five days.\n\n\
                    Refunds are issued within thirty days of purchase.\n\n\
                    Contact support by email.";
        let report = engine
            .ingest_document("docs", DocumentInput::new("policy", text))
            .await
            .unwrap();
        assert!(report.chunks > 1);

        let result = engine.retrieve("refunds purchase", 5, "docs").await;
        assert!(result.used_reranking);
        assert!(result.len() > 1);
        assert!(result.sources[0].text().contains("Refunds"));
        assert_eq!(result.sources[0].rerank_score, Some(1.0));
        assert_eq!(result.sources[0].relevance_score, 1.0);
    }

    #[tokio::test]
    async fn test_unpaginated_sources_have_no_page() {
        let engine = engine(HashingEmbedder::new());
        let mut document = scenario_document();
        document.page_breaks = None;
        engine.ingest_document("docs", document).await.unwrap();

        let result = engine.retrieve("lorem pelican", 5, "docs").await;
        assert!(!result.is_empty());
        assert!(result.sources.iter().all(|s| s.page_number.is_none()));
    }

    #[tokio::test]
    async fn test_embedding_outage_degrades_to_sparse() {
        let engine = engine(DownEmbedder);
        let report = engine
            .ingest_document("docs", scenario_document())
            .await
            .unwrap();
        assert!(!report.dense_indexed);
        assert_eq!(report.chunks, 4);

        let result = engine
            .retrieve("quarterly revenue reconciliation", 5, "docs")
            .await;
        assert!(result.dense_unavailable);
        assert_eq!(result.sources[0].chunk.id.seq, 1);
        assert!(result.sources.iter().all(|s| s.dense_score.is_none()));
    }

    #[tokio::test]
    async fn test_empty_and_unknown() {
        let engine = engine(HashingEmbedder::new());
        engine
            .ingest_document("docs", scenario_document())
            .await
            .unwrap();

        assert!(engine.retrieve("   ", 5, "docs").await.is_empty());
        assert!(engine.retrieve("lorem", 0, "docs").await.is_empty());
        assert!(engine.retrieve("lorem", 5, "missing").await.is_empty());
    }

    #[tokio::test]
    async fn test_top_k_clamped_to_merge_pool() {
        let engine = engine(HashingEmbedder::new());
        for i in 0..10 {
            engine
                .ingest_document("docs", DocumentInput::new(format!("doc-{}", i), filler(1500)))
                .await
                .unwrap();
        }

        let result = engine.retrieve("lorem ipsum", 500, "docs").await;
        assert_eq!(result.len(), engine.config().retrieval.merge_pool);
        let ranks: Vec<u32> = result.sources.iter().map(|s| s.rank).collect();
        assert_eq!(ranks, (1..=result.len() as u32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_reingest_and_remove() {
        let engine = engine(HashingEmbedder::new());
        let first = engine
            .ingest_document("docs", DocumentInput::new("notes", "alpha beta gamma"))
            .await
            .unwrap();
        assert!(!first.unchanged);

        let again = engine
            .ingest_document("docs", DocumentInput::new("notes", "alpha beta gamma"))
            .await
            .unwrap();
        assert!(again.unchanged);
        assert_eq!(again.chunks, 1);

        engine
            .ingest_document("docs", DocumentInput::new("notes", "delta epsilon"))
            .await
            .unwrap();
        let stale = engine.retrieve("alpha", 5, "docs").await;
        assert!(stale.sources.iter().all(|s| !s.text().contains("alpha")));
        let fresh = engine.retrieve("delta", 5, "docs").await;
        assert_eq!(fresh.sources[0].text(), "delta epsilon");

        let stats = engine.stats("docs");
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.vocabulary, 2);

        assert_eq!(engine.remove_document("docs", "notes").await.unwrap(), 1);
        assert!(engine.retrieve("delta", 5, "docs").await.is_empty());
        assert_eq!(engine.stats("docs").chunks, 0);

        let err = engine.remove_document("docs", "notes").await.unwrap_err();
        assert_eq!(err.error_code(), "DOCUMENT_NOT_FOUND");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_replacement_is_not_mistaken_for_old_text() {
        let engine = engine(StallingEmbedder(HashingEmbedder::new()));
        engine
            .ingest_document("docs", DocumentInput::new("notes", "alpha beta gamma"))
            .await
            .unwrap();

        let replace = engine.ingest_document("docs", DocumentInput::new("notes", "delta epsilon"));
        let cancelled = tokio::time::timeout(Duration::from_millis(50), replace).await;
        assert!(cancelled.is_err());

        let report = engine
            .ingest_document("docs", DocumentInput::new("notes", "alpha beta gamma"))
            .await
            .unwrap();
        assert!(!report.unchanged);
        assert!(report.dense_indexed);

        let index = engine.collection("docs").unwrap();
        assert!(index.sparse.search("delta", 5).is_empty());
        let hits = index.sparse.search("alpha", 5);
        assert_eq!(hits[0].chunk.text, "alpha beta gamma");
        assert_eq!(engine.stats("docs").chunks, 1);
        assert_eq!(engine.stats("docs").documents, 1);
    }

    #[tokio::test]
    async fn test_unchanged_reingest_restores_embeddings() {
        let engine = engine(FlakyEmbedder {
            down: AtomicBool::new(true),
            inner: HashingEmbedder::new(),
        });
        let first = engine
            .ingest_document("docs", DocumentInput::new("notes", "alpha beta gamma"))
            .await
            .unwrap();
        assert!(!first.dense_indexed);

        engine.embedder.down.store(false, Ordering::SeqCst);
        let again = engine
            .ingest_document("docs", DocumentInput::new("notes", "alpha beta gamma"))
            .await
            .unwrap();
        assert!(again.unchanged);
        assert!(again.dense_indexed);

        let index = engine.collection("docs").unwrap();
        assert!(index.document("notes").unwrap().dense_indexed);

        let result = engine.retrieve("alpha", 5, "docs").await;
        assert!(!result.dense_unavailable);
        assert!(result.sources[0].dense_score.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vector_store_timeout_degrades_to_sparse() {
        let engine = RetrievalEngine::new(
            EngineConfig::default(),
            Arc::new(HashingEmbedder::new()),
            Arc::new(SilentStore),
        )
        .unwrap();
        let report = engine
            .ingest_document("docs", scenario_document())
            .await
            .unwrap();
        assert!(report.dense_indexed);

        let result = engine
            .retrieve("quarterly revenue reconciliation", 5, "docs")
            .await;
        assert!(result.dense_unavailable);
        assert_eq!(result.sources[0].chunk.id.seq, 1);
        assert!(result.sources.iter().all(|s| s.dense_score.is_none()));
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let engine = engine(HashingEmbedder::new());
        engine
            .ingest_document("a", DocumentInput::new("one", "shared words here"))
            .await
            .unwrap();
        engine
            .ingest_document("b", DocumentInput::new("two", "shared words there"))
            .await
            .unwrap();

        let result = engine.retrieve("shared words", 5, "a").await;
        assert_eq!(result.len(), 1);
        assert_eq!(result.sources[0].document_id, "one");
        assert_eq!(engine.stats("b").documents, 1);
    }

    #[tokio::test]
    async fn test_deterministic_rankings() {
        let engine = engine(HashingEmbedder::new());
        engine
            .ingest_document("docs", scenario_document())
            .await
            .unwrap();

        let first = seqs(&engine.retrieve("dolor sit revenue", 5, "docs").await);
        for _ in 0..5 {
            assert_eq!(seqs(&engine.retrieve("dolor sit revenue", 5, "docs").await), first);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ingest_and_query() {
        let engine = Arc::new(engine(HashingEmbedder::new()));
        engine
            .ingest_document("docs", scenario_document())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    let text = format!("{} concurrent ingest {}", filler(700), i);
                    engine
                        .ingest_document("docs", DocumentInput::new(format!("extra-{}", i), text))
                        .await
                        .map(|_| ())
                } else {
                    let result = engine.retrieve("quarterly revenue", 5, "docs").await;
                    assert!(!result.is_empty());
                    Ok(())
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(engine.stats("docs").documents, 5);
    }
}
