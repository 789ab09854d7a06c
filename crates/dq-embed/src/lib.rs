//! dq-embed - Local embedding service
//!
//! Provides [`HashingEmbedder`], a deterministic feature-hashing embedder
//! that needs no model files. It stands in for a hosted embedding service
//! in tests and in the CLI.

mod hashing;

pub use hashing::HashingEmbedder;

// Re-export the Embedder trait for convenience
pub use dq_core::Embedder;
