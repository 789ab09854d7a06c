//! Second-pass reranking of the merged candidate pool.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use dq_core::{RagError, Reranker, Result, ScoreScale, ScoredCandidate, Tokenizer};
use dq_index::{with_timeout, SimpleTokenizer};

/// Result of a reranking pass.
#[derive(Debug)]
pub struct Reranked {
    /// Final candidates, best first.
    pub candidates: Vec<ScoredCandidate>,

    /// Whether the service's scores determined the order.
    pub used_reranking: bool,
}

/// Calls an optional reranking service and falls back to the merged order
/// whenever the service is missing or misbehaves.
pub struct RerankStage {
    reranker: Option<Arc<dyn Reranker>>,
    timeout: Duration,
}

impl RerankStage {
    pub fn new(reranker: Option<Arc<dyn Reranker>>, timeout: Duration) -> Self {
        Self { reranker, timeout }
    }

    /// Declared score scale of the configured service.
    pub fn scale(&self) -> Option<ScoreScale> {
        self.reranker.as_ref().map(|r| r.scale())
    }

    /// Rerank `pool` (already in merged order) and keep the best `top_k`.
    ///
    /// Never fails: any service problem yields the first `top_k` of `pool`
    /// unchanged with `used_reranking = false`.
    pub async fn rerank(&self, query: &str, pool: Vec<ScoredCandidate>, top_k: usize) -> Reranked {
        let Some(reranker) = &self.reranker else {
            return fallback(pool, top_k);
        };
        if pool.is_empty() {
            return fallback(pool, top_k);
        }

        match self.score(reranker.as_ref(), query, &pool).await {
            Ok(scores) => {
                let mut candidates: Vec<ScoredCandidate> = pool
                    .into_iter()
                    .zip(scores)
                    .map(|(mut candidate, score)| {
                        candidate.rerank_score = Some(score);
                        candidate
                    })
                    .collect();

                candidates.sort_by(|a, b| {
                    let a_score = a.rerank_score.unwrap_or(f32::NEG_INFINITY);
                    let b_score = b.rerank_score.unwrap_or(f32::NEG_INFINITY);
                    b_score
                        .total_cmp(&a_score)
                        .then_with(|| b.fused_score.total_cmp(&a.fused_score))
                        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
                });
                candidates.truncate(top_k);

                debug!("Reranked pool down to {} candidates", candidates.len());
                Reranked {
                    candidates,
                    used_reranking: true,
                }
            }
            Err(e) => {
                warn!("Reranking unavailable ({}), keeping merged order", e);
                fallback(pool, top_k)
            }
        }
    }

    /// Call the service and validate its output.
    async fn score(
        &self,
        reranker: &dyn Reranker,
        query: &str,
        pool: &[ScoredCandidate],
    ) -> Result<Vec<f32>> {
        let texts: Vec<&str> = pool.iter().map(|c| c.chunk.text.as_str()).collect();
        let scores = with_timeout("rerank", self.timeout, reranker.rerank(query, &texts)).await?;

        if scores.len() != pool.len() {
            return Err(RagError::rerank(format!(
                "expected {} scores, got {}",
                pool.len(),
                scores.len()
            )));
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(RagError::rerank("non-finite score in response"));
        }
        Ok(scores)
    }
}

fn fallback(mut pool: Vec<ScoredCandidate>, top_k: usize) -> Reranked {
    pool.truncate(top_k);
    Reranked {
        candidates: pool,
        used_reranking: false,
    }
}

/// Local reranker scoring documents by query-term coverage.
///
/// Score is the fraction of distinct query terms present in the document,
/// so it already lies in [0, 1].
pub struct LexicalReranker {
    tokenizer: Arc<dyn Tokenizer>,
}

impl LexicalReranker {
    pub fn new() -> Self {
        Self::with_tokenizer(Arc::new(SimpleTokenizer))
    }

    pub fn with_tokenizer(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }
}

impl Default for LexicalReranker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reranker for LexicalReranker {
    async fn rerank(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        let terms: HashSet<String> = self.tokenizer.tokenize(query).into_iter().collect();
        if terms.is_empty() {
            return Ok(vec![0.0; documents.len()]);
        }

        Ok(documents
            .iter()
            .map(|doc| {
                let words: HashSet<String> = self.tokenizer.tokenize(doc).into_iter().collect();
                let matched = terms.iter().filter(|t| words.contains(*t)).count();
                matched as f32 / terms.len() as f32
            })
            .collect())
    }

    fn scale(&self) -> ScoreScale {
        ScoreScale::UnitInterval
    }
}
