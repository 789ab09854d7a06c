//! dq-chunk - Document chunking
//!
//! This crate splits extracted document text into overlapping, position-tracked
//! chunks and attributes each chunk to a page.
//!
//! - [`WindowChunker`]: fixed-budget windows that prefer paragraph, line and
//!   sentence boundaries, with exact overlap between neighbours.
//! - [`build_chunks`]: runs a chunker over a [`DocumentInput`] and assigns
//!   chunk ids and page numbers.
//!
//! # Example
//!
//! ```rust
//! use dq_chunk::{build_chunks, ChunkConfig, WindowChunker};
//! use dq_core::DocumentInput;
//!
//! let doc = DocumentInput::new("readme", "Hello world.");
//! let chunks = build_chunks(&WindowChunker::new(), &doc, &ChunkConfig::default()).unwrap();
//! assert_eq!(chunks.len(), 1);
//! ```

mod pages;
mod window;

pub use pages::{assign_page, build_chunks, validate_page_breaks};
pub use window::{validate, WindowChunker, Windows};

// Re-export types for convenience
pub use dq_core::{ChunkConfig, ChunkData, Chunker};
