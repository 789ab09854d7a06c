//! dq-index - Sparse and dense retrieval indexes
//!
//! The sparse side is an in-memory BM25 inverted index. The dense side is an
//! adapter over an external [`VectorStore`](dq_core::VectorStore); an
//! in-process [`InMemoryVectorStore`] is included for tests and local use.
//! Both implement [`Retriever`] and return a [`RankedList`] in their native
//! score scale.

mod dense;
mod memory;
mod registry;
mod retriever;
mod sparse;
mod tokenizer;

pub use dense::{with_timeout, DenseIndex, DenseTimeouts};
pub use memory::InMemoryVectorStore;
pub use registry::ChunkRegistry;
pub use retriever::{RankedList, Retriever, SearchHit, Signal};
pub use sparse::SparseIndex;
pub use tokenizer::SimpleTokenizer;
