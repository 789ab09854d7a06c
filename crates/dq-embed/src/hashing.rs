//! Feature-hashing embedder.

use async_trait::async_trait;
use tracing::debug;

use dq_core::{Embedder, RagError, Result};

const DEFAULT_DIMENSION: usize = 256;

/// Embeds text by hashing lowercased words and adjacent word pairs into a
/// fixed number of signed buckets, then L2 normalizing.
///
/// Texts sharing vocabulary land close together under cosine similarity.
/// The output depends only on the text and the dimension, so embeddings are
/// stable across processes.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Create an embedder with the default dimension (256).
    pub fn new() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
        }
    }

    /// Create an embedder with a custom dimension.
    pub fn with_dimension(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::invalid_argument(
                "embedding dimension must be greater than 0",
            ));
        }
        Ok(Self { dimension })
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        let mut embedding = vec![0.0f32; self.dimension];
        for word in &words {
            self.add_feature(&mut embedding, word.as_bytes(), 1.0);
        }
        for pair in words.windows(2) {
            let feature = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut embedding, feature.as_bytes(), 0.5);
        }

        l2_normalize(embedding)
    }

    fn add_feature(&self, embedding: &mut [f32], feature: &[u8], weight: f32) {
        let hash = blake3::hash(feature);
        let bytes = hash.as_bytes();
        let mut index = [0u8; 8];
        index.copy_from_slice(&bytes[..8]);
        let bucket = (u64::from_le_bytes(index) % self.dimension as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        embedding[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }

    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        debug!("Embedding batch: size={}", texts.len());
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
