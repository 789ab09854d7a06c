//! In-process vector store.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use dq_core::{RagError, Result, SimilarityMetric, VectorHit, VectorStore};

struct Record {
    vector: Vec<f32>,
    metadata: serde_json::Value,
}

/// Brute-force cosine similarity store, namespaced by collection.
///
/// Suitable for tests, the CLI and small corpora. Vectors in a collection
/// must share the dimension of the first vector stored there.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, HashMap<String, Record>>>,
}

impl InMemoryVectorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vectors in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map_or(0, HashMap::len)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let records = collections.entry(collection.to_string()).or_default();

        if let Some(existing) = records.values().next() {
            if existing.vector.len() != vector.len() {
                return Err(RagError::vector_store(format!(
                    "dimension mismatch in {}: expected {}, got {}",
                    collection,
                    existing.vector.len(),
                    vector.len()
                )));
            }
        }

        records.insert(id.to_string(), Record { vector, metadata });
        Ok(())
    }

    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(records) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits = Vec::with_capacity(records.len());
        for (id, record) in records {
            if record.vector.len() != vector.len() {
                return Err(RagError::vector_store(format!(
                    "query dimension {} does not match collection {} ({})",
                    vector.len(),
                    collection,
                    record.vector.len()
                )));
            }
            hits.push(VectorHit {
                id: id.clone(),
                score: cosine_similarity(vector, &record.vector),
                metadata: record.metadata.clone(),
            });
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(records) = collections.get_mut(collection) {
            for id in ids {
                records.remove(id);
            }
        }
        Ok(())
    }

    fn metric(&self) -> SimilarityMetric {
        SimilarityMetric::Cosine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let store = InMemoryVectorStore::new();
        store.upsert("c", "a", vec![1.0, 0.0], json!({})).await.unwrap();
        store.upsert("c", "b", vec![0.0, 1.0], json!({})).await.unwrap();
        store.upsert("c", "z", vec![0.7, 0.7], json!({"k": 1})).await.unwrap();

        let hits = store.query("c", &[1.0, 1.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "z");
        assert_eq!(hits[0].metadata, json!({"k": 1}));
        // a and b tie; id breaks it
        assert_eq!(hits[1].id, "a");
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let store = InMemoryVectorStore::new();
        store.upsert("one", "x", vec![1.0], json!(null)).await.unwrap();

        assert!(store.query("two", &[1.0], 5).await.unwrap().is_empty());
        assert_eq!(store.count("one"), 1);
        assert_eq!(store.count("two"), 0);
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete() {
        let store = InMemoryVectorStore::new();
        store.upsert("c", "x", vec![1.0, 0.0], json!(null)).await.unwrap();
        store.upsert("c", "x", vec![0.0, 1.0], json!(null)).await.unwrap();
        assert_eq!(store.count("c"), 1);

        let hits = store.query("c", &[0.0, 1.0], 1).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        store.delete("c", &["x".to_string(), "missing".to_string()]).await.unwrap();
        assert_eq!(store.count("c"), 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let store = InMemoryVectorStore::new();
        store.upsert("c", "x", vec![1.0, 0.0], json!(null)).await.unwrap();

        assert!(store.upsert("c", "y", vec![1.0], json!(null)).await.is_err());
        assert!(store.query("c", &[1.0, 0.0, 0.0], 1).await.is_err());
    }
}
