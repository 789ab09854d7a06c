//! Shared chunk registry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use dq_core::{Chunk, ChunkId};

/// Concurrent map from chunk id to the shared chunk.
///
/// Cloning the registry clones the handle, not the contents. The dense index
/// uses it to resolve vector store hits back to chunks; a hit whose chunk is
/// not registered is never returned.
#[derive(Debug, Clone, Default)]
pub struct ChunkRegistry {
    chunks: Arc<RwLock<HashMap<ChunkId, Arc<Chunk>>>>,
}

impl ChunkRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chunk, replacing any chunk with the same id.
    pub fn insert(&self, chunk: Arc<Chunk>) {
        self.chunks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chunk.id.clone(), chunk);
    }

    /// Look up a chunk.
    pub fn get(&self, id: &ChunkId) -> Option<Arc<Chunk>> {
        self.chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Chunks of one document, in sequence order.
    pub fn document_chunks(&self, document_id: &str) -> Vec<Arc<Chunk>> {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let mut found: Vec<Arc<Chunk>> = chunks
            .values()
            .filter(|c| c.document_id() == document_id)
            .cloned()
            .collect();
        found.sort_by_key(|c| c.id.seq);
        found
    }

    /// Drop all chunks of a document. Returns the removed ids in sequence order.
    pub fn remove_document(&self, document_id: &str) -> Vec<ChunkId> {
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed: Vec<ChunkId> = chunks
            .keys()
            .filter(|id| id.document_id == document_id)
            .cloned()
            .collect();
        for id in &removed {
            chunks.remove(id);
        }
        removed.sort();
        removed
    }

    /// Number of registered chunks.
    pub fn len(&self) -> usize {
        self.chunks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
