//! Configuration types for the retrieval engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{RagError, Result};
use crate::traits::ChunkConfig;

/// Main configuration for the retrieval engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Chunking configuration.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// BM25 parameters.
    #[serde(default)]
    pub bm25: Bm25Config,

    /// Retrieval and fusion configuration.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Per-call timeouts for external services.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Chunking configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared between consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Window before the hard budget searched for a paragraph or sentence break.
    #[serde(default = "default_boundary_tolerance")]
    pub boundary_tolerance: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 80,
            boundary_tolerance: 100,
        }
    }
}

impl ChunkingConfig {
    /// Parameters for the chunker.
    pub fn to_chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            max_chars: self.chunk_size,
            overlap_chars: self.chunk_overlap,
            boundary_tolerance: self.boundary_tolerance,
        }
    }
}

/// BM25 parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bm25Config {
    /// Term frequency saturation.
    #[serde(default = "default_k1")]
    pub k1: f32,

    /// Length normalization (0 = none, 1 = full).
    #[serde(default = "default_b")]
    pub b: f32,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Retrieval and fusion configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Hybrid weight (0 = keyword only, 1 = vector only).
    #[serde(default = "default_hybrid_weight")]
    pub hybrid_weight: f32,

    /// Results requested from each of the sparse and dense indexes.
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,

    /// Fused candidates handed to the reranker.
    #[serde(default = "default_merge_pool")]
    pub merge_pool: usize,

    /// Default number of sources returned.
    #[serde(default = "default_final_count")]
    pub final_count: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_weight: 0.5,
            candidate_pool: 40,
            merge_pool: 20,
            final_count: 5,
        }
    }
}

/// Timeouts for the external suspension points, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Embedding service call.
    #[serde(default = "default_embed_timeout")]
    pub embed_ms: u64,

    /// Vector store round trip.
    #[serde(default = "default_vector_store_timeout")]
    pub vector_store_ms: u64,

    /// Reranking service call.
    #[serde(default = "default_rerank_timeout")]
    pub rerank_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embed_ms: 3000,
            vector_store_ms: 2000,
            rerank_ms: 3000,
        }
    }
}

impl TimeoutConfig {
    pub fn embed(&self) -> Duration {
        Duration::from_millis(self.embed_ms)
    }

    pub fn vector_store(&self) -> Duration {
        Duration::from_millis(self.vector_store_ms)
    }

    pub fn rerank(&self) -> Duration {
        Duration::from_millis(self.rerank_ms)
    }
}

// Default value functions

fn default_chunk_size() -> usize {
    512
}

fn default_chunk_overlap() -> usize {
    80
}

fn default_boundary_tolerance() -> usize {
    100
}

fn default_k1() -> f32 {
    1.5
}

fn default_b() -> f32 {
    0.75
}

fn default_hybrid_weight() -> f32 {
    0.5
}

fn default_candidate_pool() -> usize {
    40
}

fn default_merge_pool() -> usize {
    20
}

fn default_final_count() -> usize {
    5
}

fn default_embed_timeout() -> u64 {
    3000
}

fn default_vector_store_timeout() -> u64 {
    2000
}

fn default_rerank_timeout() -> u64 {
    3000
}

impl EngineConfig {
    /// Load configuration from file. The result is validated.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RagError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("docuquery").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("docuquery.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Reject invalid tunables.
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        if chunking.chunk_size == 0 {
            return Err(RagError::config("chunk_size must be greater than 0"));
        }
        if chunking.chunk_overlap >= chunking.chunk_size {
            return Err(RagError::config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunking.chunk_overlap, chunking.chunk_size
            )));
        }

        let bm25 = &self.bm25;
        if !bm25.k1.is_finite() || bm25.k1 < 0.0 {
            return Err(RagError::config(format!(
                "bm25.k1 must be a non-negative number, got {}",
                bm25.k1
            )));
        }
        if !(0.0..=1.0).contains(&bm25.b) {
            return Err(RagError::config(format!(
                "bm25.b must be in [0, 1], got {}",
                bm25.b
            )));
        }

        let retrieval = &self.retrieval;
        if !(0.0..=1.0).contains(&retrieval.hybrid_weight) {
            return Err(RagError::config(format!(
                "hybrid_weight must be in [0, 1], got {}",
                retrieval.hybrid_weight
            )));
        }
        if retrieval.candidate_pool == 0 || retrieval.merge_pool == 0 {
            return Err(RagError::config("candidate pools must be greater than 0"));
        }
        if retrieval.final_count > retrieval.merge_pool {
            return Err(RagError::config(format!(
                "final_count ({}) must not exceed merge_pool ({})",
                retrieval.final_count, retrieval.merge_pool
            )));
        }

        let timeouts = &self.timeouts;
        if timeouts.embed_ms == 0 || timeouts.vector_store_ms == 0 || timeouts.rerank_ms == 0 {
            return Err(RagError::config("timeouts must be greater than 0"));
        }

        Ok(())
    }
}
