//! dq-query - Hybrid retrieval and ranking engine
//!
//! This crate ties the indexes together into the query pipeline:
//!
//! 1. Sparse (BM25) and dense (vector) retrieval run concurrently
//! 2. [`HybridMerger`] min-max normalizes and fuses the two rankings
//! 3. [`RerankStage`] optionally re-scores the merged pool, falling back to
//!    the merged order when the service is unavailable
//! 4. [`CitationExtractor`] turns the final chunks into [`Source`] records
//!
//! # Example
//!
//! ```rust,ignore
//! use dq_query::RetrievalEngine;
//! use std::sync::Arc;
//!
//! let engine = RetrievalEngine::new(config, Arc::new(embedder), Arc::new(store))?;
//! engine.ingest_document("docuquery", document).await?;
//! let result = engine.retrieve("refund policy", 5, "docuquery").await;
//! ```

mod citation;
mod engine;
mod fusion;
mod rerank;

pub use citation::{relevance_scores, CitationExtractor, SNIPPET_MAX_CHARS};
pub use engine::RetrievalEngine;
pub use fusion::{normalize, HybridMerger};
pub use rerank::{LexicalReranker, RerankStage, Reranked};

// Re-export for convenience
pub use dq_core::{IngestReport, RetrievalResult, Source};
